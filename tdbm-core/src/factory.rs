//! Bean classes, class resolution and construction.
//!
//! Beans are built in two phases: the factory allocates a default instance of
//! the resolved class, then calls [`Bean::populate`] with the row data. No
//! user-facing constructor runs during hydration.

use crate::error::{Error, Result};
use crate::hydrator::BeanData;
use crate::schema::Schema;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tdbm_api::Value;

/// A hydrated domain object.
pub trait Bean: Any + Send + Sync + fmt::Debug {
    /// Fills a freshly allocated bean from row data. Called once, by the factory.
    fn populate(&mut self, class: &ResolvedClass, data: &BeanData) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Shared handle to a bean owned by a session's identity cache.
///
/// Clones point to the same instance; use [`BeanRef::ptr_eq`] to compare
/// identities.
#[derive(Clone)]
pub struct BeanRef(Arc<RwLock<Box<dyn Bean>>>);

impl BeanRef {
    pub fn new(bean: Box<dyn Bean>) -> Self {
        Self(Arc::new(RwLock::new(bean)))
    }

    pub fn ptr_eq(a: &BeanRef, b: &BeanRef) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<dyn Bean>> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Box<dyn Bean>> {
        self.0.write()
    }

    /// Runs `f` on the bean if it is a `T`.
    pub fn with<T: Bean, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.0.read();
        guard.as_any().downcast_ref::<T>().map(f)
    }

    /// Runs `f` on the bean mutably if it is a `T`.
    pub fn with_mut<T: Bean, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.0.write();
        guard.as_any_mut().downcast_mut::<T>().map(f)
    }
}

impl fmt::Debug for BeanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(bean) => f.debug_tuple("BeanRef").field(&**bean).finish(),
            None => f.write_str("BeanRef(<locked>)"),
        }
    }
}

/// Bean backed directly by its row data.
///
/// Used for classes registered with [`BeanFactory::register_generic`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenericBean {
    class_name: String,
    main_table: String,
    data: BeanData,
}

impl GenericBean {
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn main_table(&self) -> &str {
        &self.main_table
    }

    pub fn data(&self) -> &BeanData {
        &self.data
    }

    /// Looks `column` up in the main table first, then in parent tables.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(&self.main_table, column).or_else(|| {
            self.data
                .tables()
                .find_map(|(_, columns)| columns.get(column))
        })
    }

    pub fn get_in(&self, table: &str, column: &str) -> Option<&Value> {
        self.data.get(table, column)
    }

    /// Sets `column` on whichever table owns it, defaulting to the main table.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        let value = value.into();
        let owner = if self.data.get(&self.main_table, column).is_some() {
            self.main_table.clone()
        } else {
            self.data
                .tables()
                .find(|(_, columns)| columns.contains_key(column))
                .map(|(table, _)| table.to_string())
                .unwrap_or_else(|| self.main_table.clone())
        };
        self.data.insert(&owner, column, value);
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "class": self.class_name,
            "table": self.main_table,
            "data": self.data,
        })
    }
}

impl Bean for GenericBean {
    fn populate(&mut self, class: &ResolvedClass, data: &BeanData) -> Result<()> {
        self.class_name = class.class_name.clone();
        self.main_table = class.main_table.clone();
        self.data = data.clone();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Outcome of class resolution for one table group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClass {
    pub class_name: String,
    /// Table whose primary key identifies the bean.
    pub main_table: String,
}

/// Chooses the bean class for a table group's data.
pub trait ClassResolver: Send + Sync {
    /// Returns `None` when the group carries no row (e.g. an unmatched outer join).
    ///
    /// `hint` is an explicit class requested by the caller; it takes
    /// precedence over the class derived from the schema.
    fn resolve(
        &self,
        schema: &Schema,
        data: &BeanData,
        hint: Option<&str>,
    ) -> Result<Option<ResolvedClass>>;
}

/// Resolves the class of the most-derived table present in the group.
#[derive(Debug, Clone, Copy, Default)]
pub struct InheritanceResolver;

impl ClassResolver for InheritanceResolver {
    fn resolve(
        &self,
        schema: &Schema,
        data: &BeanData,
        hint: Option<&str>,
    ) -> Result<Option<ResolvedClass>> {
        let Some(main_table) = schema.main_table(data) else {
            return Ok(None);
        };
        let class_name = match hint {
            Some(h) => h.to_string(),
            None => schema.class_name_for(main_table),
        };
        Ok(Some(ResolvedClass {
            class_name,
            main_table: main_table.to_string(),
        }))
    }
}

/// Single-table inheritance: a discriminator column of the main table selects
/// the class. Unmapped or missing discriminators fall back to inheritance
/// resolution.
#[derive(Debug, Clone)]
pub struct DiscriminatorResolver {
    column: String,
    classes: BTreeMap<String, String>,
}

impl DiscriminatorResolver {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            classes: BTreeMap::new(),
        }
    }

    pub fn map(mut self, discriminator: impl Into<String>, class_name: impl Into<String>) -> Self {
        self.classes.insert(discriminator.into(), class_name.into());
        self
    }
}

impl ClassResolver for DiscriminatorResolver {
    fn resolve(
        &self,
        schema: &Schema,
        data: &BeanData,
        hint: Option<&str>,
    ) -> Result<Option<ResolvedClass>> {
        let Some(mut resolved) = InheritanceResolver.resolve(schema, data, hint)? else {
            return Ok(None);
        };
        if hint.is_none()
            && let Some(value) = data.get(&resolved.main_table, &self.column)
            && !value.is_null()
            && let Some(class_name) = self.classes.get(&value.to_string())
        {
            resolved.class_name = class_name.clone();
        }
        Ok(Some(resolved))
    }
}

type Allocator = Arc<dyn Fn() -> Box<dyn Bean> + Send + Sync>;

/// Registry of constructible bean classes.
#[derive(Clone, Default)]
pub struct BeanFactory {
    allocators: HashMap<String, Allocator>,
}

impl BeanFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `class_name`. Instances start from `T::default()`.
    pub fn register<T: Bean + Default>(&mut self, class_name: impl Into<String>) -> &mut Self {
        self.allocators.insert(
            class_name.into(),
            Arc::new(|| Box::new(T::default()) as Box<dyn Bean>),
        );
        self
    }

    /// Registers `class_name` as a [`GenericBean`].
    pub fn register_generic(&mut self, class_name: impl Into<String>) -> &mut Self {
        self.register::<GenericBean>(class_name)
    }

    pub fn with<T: Bean + Default>(mut self, class_name: impl Into<String>) -> Self {
        self.register::<T>(class_name);
        self
    }

    pub fn with_generic(mut self, class_name: impl Into<String>) -> Self {
        self.register_generic(class_name);
        self
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.allocators.contains_key(class_name)
    }

    /// Allocates and populates a bean of `class.class_name`.
    pub fn construct(&self, class: &ResolvedClass, data: &BeanData) -> Result<BeanRef> {
        let allocate = self
            .allocators
            .get(&class.class_name)
            .ok_or_else(|| Error::UnknownBeanClass(class.class_name.clone()))?;
        let mut bean = allocate();
        bean.populate(class, data)?;
        Ok(BeanRef::new(bean))
    }
}

impl fmt::Debug for BeanFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.allocators.keys().collect();
        names.sort();
        f.debug_struct("BeanFactory").field("classes", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;

    #[derive(Debug, Default)]
    struct User {
        id: i64,
        name: String,
        populated: usize,
    }

    impl Bean for User {
        fn populate(&mut self, _: &ResolvedClass, data: &BeanData) -> Result<()> {
            self.id = data.get("users", "id").and_then(Value::as_i64).unwrap_or_default();
            self.name = data
                .get("users", "name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            self.populated += 1;
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn class(name: &str, table: &str) -> ResolvedClass {
        ResolvedClass {
            class_name: name.into(),
            main_table: table.into(),
        }
    }

    #[test]
    fn constructs_registered_class_from_data() {
        let factory = BeanFactory::new().with::<User>("User");
        let data = BeanData::new().with("users", "id", 5i64).with("users", "name", "Ada");
        let bean = factory.construct(&class("User", "users"), &data).unwrap();
        let (id, name, populated) = bean.with(|u: &User| (u.id, u.name.clone(), u.populated)).unwrap();
        assert_eq!((id, name.as_str(), populated), (5, "Ada", 1));
        assert!(bean.with(|_: &GenericBean| ()).is_none());
    }

    #[test]
    fn unknown_class_is_an_error() {
        let factory = BeanFactory::new();
        let err = factory
            .construct(&class("Ghost", "ghosts"), &BeanData::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownBeanClass(name) if name == "Ghost"));
    }

    #[test]
    fn generic_bean_reads_parent_columns_and_sets_owner() {
        let factory = BeanFactory::new().with_generic("User");
        let data = BeanData::new()
            .with("persons", "id", 1i64)
            .with("persons", "name", "Ada")
            .with("users", "id", 1i64)
            .with("users", "login", "ada");
        let bean = factory.construct(&class("User", "users"), &data).unwrap();
        bean.with_mut(|b: &mut GenericBean| b.set("name", "Grace")).unwrap();
        bean.with(|b: &GenericBean| {
            assert_eq!(b.get("login"), Some(&Value::from("ada")));
            assert_eq!(b.get_in("persons", "name"), Some(&Value::from("Grace")));
            assert!(b.get_in("users", "name").is_none());
        })
        .unwrap();
    }

    #[test]
    fn hint_overrides_schema_class() {
        let schema = Schema::new().with_table("users", TableSchema::new(["id"]).class("User"));
        let data = BeanData::new().with("users", "id", 1i64);
        let resolved = InheritanceResolver
            .resolve(&schema, &data, Some("Admin"))
            .unwrap()
            .unwrap();
        assert_eq!(resolved, class("Admin", "users"));
        let resolved = InheritanceResolver.resolve(&schema, &data, None).unwrap().unwrap();
        assert_eq!(resolved, class("User", "users"));
    }

    #[test]
    fn discriminator_selects_class() {
        let schema = Schema::new().with_table("animals", TableSchema::new(["id"]));
        let resolver = DiscriminatorResolver::new("kind").map("cat", "Cat").map("dog", "Dog");
        let cat = BeanData::new().with("animals", "id", 1i64).with("animals", "kind", "cat");
        let fish = BeanData::new().with("animals", "id", 2i64).with("animals", "kind", "fish");
        assert_eq!(
            resolver.resolve(&schema, &cat, None).unwrap().unwrap().class_name,
            "Cat"
        );
        assert_eq!(
            resolver.resolve(&schema, &fish, None).unwrap().unwrap().class_name,
            "animals"
        );
    }
}
