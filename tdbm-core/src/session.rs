use crate::error::Result;
use crate::factory::{BeanFactory, BeanRef, ClassResolver, InheritanceResolver, ResolvedClass};
use crate::hydrator::BeanData;
use crate::identity::{IdentityHash, ObjectStorage};
use crate::schema::Schema;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Session behavior switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Deduplicate beans by row identity. Turning this off builds a fresh
    /// bean for every fetched row and is only meant for debugging hydration.
    #[serde(default = "default_true")]
    pub cache_beans: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { cache_beans: true }
    }
}

/// Unit-of-work scope shared by every iterator built from it.
///
/// Cloning a session yields another handle to the same identity cache, so
/// beans fetched through different queries of one session are the same
/// instances.
///
/// # Concurrency
///
/// Lookups and inserts share one lock and an occupied identity is never
/// replaced, so at most one bean is stored per `(table, identity)` even if
/// handles are used from several threads. Beans are constructed outside the
/// lock.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    schema: Schema,
    factory: BeanFactory,
    resolver: Arc<dyn ClassResolver>,
    config: SessionConfig,
    storage: Mutex<ObjectStorage>,
}

impl Session {
    pub fn new(schema: Schema, factory: BeanFactory) -> Self {
        Self::with_options(
            schema,
            factory,
            Arc::new(InheritanceResolver),
            SessionConfig::default(),
        )
    }

    pub fn with_options(
        schema: Schema,
        factory: BeanFactory,
        resolver: Arc<dyn ClassResolver>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                schema,
                factory,
                resolver,
                config,
                storage: Mutex::new(ObjectStorage::new()),
            }),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn factory(&self) -> &BeanFactory {
        &self.inner.factory
    }

    pub fn resolver(&self) -> &dyn ClassResolver {
        self.inner.resolver.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Number of beans held by the identity cache.
    pub fn cached_beans(&self) -> usize {
        self.inner.storage.lock().len()
    }

    pub fn lookup(&self, table: &str, hash: &IdentityHash) -> Option<BeanRef> {
        self.inner.storage.lock().get(table, hash)
    }

    /// Returns the bean cached for `(class.main_table, hash)`, or constructs
    /// one from `data` and caches it.
    pub fn get_or_create(
        &self,
        class: &ResolvedClass,
        hash: IdentityHash,
        data: &BeanData,
    ) -> Result<BeanRef> {
        if !self.inner.config.cache_beans {
            return self.inner.factory.construct(class, data);
        }
        let hit = self.lookup(&class.main_table, &hash);
        let slot = match hit {
            Some(bean) => Slot::Cached(bean),
            None => Slot::Built(self.inner.factory.construct(class, data)?),
        };
        let mut storage = self.inner.storage.lock();
        Ok(store(&mut storage, class, hash, slot))
    }

    /// Get-or-create for every table group of one row, all or nothing.
    ///
    /// Missing beans are constructed outside the cache lock, so
    /// [`Bean::populate`](crate::Bean::populate) may use the session. They are
    /// stored only once every group of the row has been built; if any
    /// construction fails the cache is left as it was. A bean stored by
    /// another handle in the meantime wins over the one built here.
    ///
    /// A cached bean is returned as is: later fetches never overwrite fields
    /// the application may have changed since the first hydration.
    pub fn get_or_create_row(
        &self,
        groups: &[(ResolvedClass, IdentityHash, &BeanData)],
    ) -> Result<Vec<BeanRef>> {
        let factory = &self.inner.factory;
        if !self.inner.config.cache_beans {
            return groups
                .iter()
                .map(|(class, _, data)| factory.construct(class, data))
                .collect();
        }

        let hits: Vec<Option<BeanRef>> = {
            let storage = self.inner.storage.lock();
            groups
                .iter()
                .map(|(class, hash, _)| storage.get(&class.main_table, hash))
                .collect()
        };
        let slots = groups
            .iter()
            .zip(hits)
            .map(|((class, _, data), hit)| match hit {
                Some(bean) => Ok(Slot::Cached(bean)),
                None => factory.construct(class, data).map(Slot::Built),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut storage = self.inner.storage.lock();
        let beans = groups
            .iter()
            .zip(slots)
            .map(|((class, hash, _), slot)| store(&mut storage, class, hash.clone(), slot))
            .collect();
        Ok(beans)
    }

    /// Whether both handles share one identity cache.
    pub fn same_session(a: &Session, b: &Session) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

enum Slot {
    Cached(BeanRef),
    Built(BeanRef),
}

fn store(
    storage: &mut ObjectStorage,
    class: &ResolvedClass,
    hash: IdentityHash,
    slot: Slot,
) -> BeanRef {
    let (bean, created) = match slot {
        Slot::Cached(bean) => (bean, false),
        Slot::Built(bean) => storage.get_or_insert(&class.main_table, hash, bean),
    };
    trace!(
        table = %class.main_table,
        class = %class.class_name,
        hit = !created,
        "identity cache lookup"
    );
    bean
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("schema", &self.inner.schema)
            .field("factory", &self.inner.factory)
            .field("config", &self.inner.config)
            .field("cached_beans", &self.cached_beans())
            .finish()
    }
}
