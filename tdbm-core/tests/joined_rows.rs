use std::sync::Arc;
use tdbm_api::Value;
use tdbm_core::{
    BeanFactory, BeanRef, ColumnCatalog, ColumnDescriptor, ColumnType, DiscriminatorResolver,
    Error, GenericBean, IdentityHash, QueryPlan, ResultIterator, Schema, Session, SessionConfig,
    TableSchema,
};
use tdbm_memory::{MemoryConnection, NamedTemplateEngine};

const USERS_WITH_COUNTRY: &str = "SELECT u.id, u.name, c.id, c.label FROM users u LEFT JOIN countries c ON c.id = u.country_id";

fn schema() -> Schema {
    Schema::new()
        .with_table("users", TableSchema::new(["id"]).class("User"))
        .with_table("countries", TableSchema::new(["id"]).class("Country"))
}

fn factory() -> BeanFactory {
    BeanFactory::new().with_generic("User").with_generic("Country")
}

fn country_catalog() -> ColumnCatalog {
    ColumnCatalog::new(vec![
        ColumnDescriptor::new("u", "users", "id", ColumnType::Integer),
        ColumnDescriptor::new("u", "users", "name", ColumnType::String),
        ColumnDescriptor::new("c", "countries", "id", ColumnType::Integer),
        ColumnDescriptor::new("c", "countries", "label", ColumnType::String),
    ])
    .unwrap()
}

fn country_rows() -> Vec<Vec<Value>> {
    vec![
        vec![Value::Int(1), "ada".into(), Value::Int(33), "France".into()],
        vec![Value::Int(2), "bob".into(), Value::Int(33), "France".into()],
        vec![Value::Int(3), "eve".into(), Value::Null, Value::Null],
    ]
}

fn run(session: &Session, catalog: ColumnCatalog, sql: &str, rows: Vec<Vec<Value>>) -> Vec<BeanRef> {
    let conn = MemoryConnection::new();
    conn.register(sql, rows);
    ResultIterator::new(
        Arc::new(conn),
        Arc::new(NamedTemplateEngine),
        session.clone(),
        QueryPlan::new(sql, "SELECT 0", catalog),
    )
    .to_vec()
    .unwrap()
}

fn class_of(bean: &BeanRef) -> String {
    bean.with(|b: &GenericBean| b.class_name().to_string())
        .unwrap_or_default()
}

#[test]
fn secondary_groups_are_hydrated_but_not_surfaced() {
    let session = Session::new(schema(), factory());
    let users = run(&session, country_catalog(), USERS_WITH_COUNTRY, country_rows());

    assert_eq!(users.len(), 3);
    assert!(users.iter().all(|b| class_of(b) == "User"));

    // Three users plus the single shared country; the unmatched join adds nothing.
    assert_eq!(session.cached_beans(), 4);
    let france = session
        .lookup("countries", &IdentityHash::from_values(&[Value::Int(33)]))
        .unwrap();
    assert_eq!(class_of(&france), "Country");
}

#[test]
fn cached_primary_rows_still_hydrate_their_joins() {
    let session = Session::new(schema(), factory());
    let catalog = ColumnCatalog::new(vec![ColumnDescriptor::new(
        "u",
        "users",
        "id",
        ColumnType::Integer,
    )])
    .unwrap();
    let plain = run(&session, catalog, "SELECT id FROM users", vec![vec![Value::Int(1)]]);
    assert_eq!(session.cached_beans(), 1);

    let joined = run(&session, country_catalog(), USERS_WITH_COUNTRY, country_rows());
    assert!(BeanRef::ptr_eq(&plain[0], &joined[0]));
    assert!(
        session
            .lookup("countries", &IdentityHash::from_values(&[Value::Int(33)]))
            .is_some()
    );
}

#[test]
fn primary_group_without_identity_is_an_error() {
    let session = Session::new(schema(), factory());
    let conn = MemoryConnection::new();
    conn.register(
        USERS_WITH_COUNTRY,
        vec![vec![Value::Null, Value::Null, Value::Int(33), "France".into()]],
    );
    let mut it = ResultIterator::new(
        Arc::new(conn.clone()),
        Arc::new(NamedTemplateEngine),
        session.clone(),
        QueryPlan::new(USERS_WITH_COUNTRY, "SELECT 0", country_catalog()),
    );
    assert!(matches!(it.rewind(), Err(Error::EmptyTableGroup(g)) if g == "u"));
    assert_eq!(session.cached_beans(), 0);
    assert_eq!(conn.open_statements(), 0);
}

#[test]
fn inherited_tables_resolve_to_the_most_derived_class() {
    let schema = Schema::new()
        .with_table("persons", TableSchema::new(["id"]).class("Person"))
        .with_table("employees", TableSchema::new(["id"]).extends("persons").class("Employee"));
    let session = Session::new(
        schema,
        BeanFactory::new().with_generic("Person").with_generic("Employee"),
    );
    let catalog = ColumnCatalog::new(vec![
        ColumnDescriptor::new("p", "persons", "id", ColumnType::Integer),
        ColumnDescriptor::new("p", "persons", "name", ColumnType::String),
        ColumnDescriptor::new("p", "employees", "id", ColumnType::Integer),
        ColumnDescriptor::new("p", "employees", "salary", ColumnType::Float),
    ])
    .unwrap();
    let rows = vec![
        vec![Value::Int(1), "ada".into(), Value::Int(1), "1200.5".into()],
        vec![Value::Int(2), "bob".into(), Value::Null, Value::Null],
    ];
    let beans = run(
        &session,
        catalog,
        "SELECT p.id, p.name, e.id, e.salary FROM persons p LEFT JOIN employees e ON e.id = p.id",
        rows,
    );

    assert_eq!(class_of(&beans[0]), "Employee");
    assert_eq!(class_of(&beans[1]), "Person");
    let (table, name, salary) = beans[0]
        .with(|b: &GenericBean| {
            (
                b.main_table().to_string(),
                b.get("name").cloned(),
                b.get("salary").cloned(),
            )
        })
        .unwrap();
    assert_eq!(table, "employees");
    assert_eq!(name, Some(Value::from("ada")));
    assert_eq!(salary, Some(Value::Float(1200.5)));
    assert!(
        session
            .lookup("employees", &IdentityHash::from_values(&[Value::Int(1)]))
            .is_some()
    );
    assert!(
        session
            .lookup("persons", &IdentityHash::from_values(&[Value::Int(2)]))
            .is_some()
    );
}

#[test]
fn discriminator_resolver_picks_class_per_row() {
    let session = Session::with_options(
        Schema::new().with_table("animals", TableSchema::new(["id"])),
        BeanFactory::new().with_generic("Cat").with_generic("Dog"),
        Arc::new(DiscriminatorResolver::new("kind").map("cat", "Cat").map("dog", "Dog")),
        SessionConfig::default(),
    );
    let catalog = ColumnCatalog::new(vec![
        ColumnDescriptor::new("a", "animals", "id", ColumnType::Integer),
        ColumnDescriptor::new("a", "animals", "kind", ColumnType::String),
    ])
    .unwrap();
    let beans = run(
        &session,
        catalog,
        "SELECT id, kind FROM animals",
        vec![vec![Value::Int(1), "dog".into()], vec![Value::Int(2), "cat".into()]],
    );
    let classes: Vec<_> = beans.iter().map(class_of).collect();
    assert_eq!(classes, vec!["Dog", "Cat"]);
}

#[test]
fn composite_keys_identify_rows() {
    let session = Session::new(
        Schema::new().with_table("memberships", TableSchema::new(["user_id", "group_id"])),
        BeanFactory::new().with_generic("memberships"),
    );
    let catalog = ColumnCatalog::new(vec![
        ColumnDescriptor::new("m", "memberships", "user_id", ColumnType::Integer),
        ColumnDescriptor::new("m", "memberships", "group_id", ColumnType::Integer),
    ])
    .unwrap();
    let beans = run(
        &session,
        catalog,
        "SELECT user_id, group_id FROM memberships",
        vec![
            vec![Value::Int(1), Value::Int(2)],
            vec![Value::Int(2), Value::Int(1)],
            vec![Value::Int(1), Value::Int(2)],
        ],
    );
    assert!(BeanRef::ptr_eq(&beans[0], &beans[2]));
    assert!(!BeanRef::ptr_eq(&beans[0], &beans[1]));
    assert_eq!(session.cached_beans(), 2);
}

#[test]
fn failing_secondary_group_caches_nothing_from_the_row() {
    let schema = Schema::new()
        .with_table("users", TableSchema::new(["id"]).class("User"))
        .with_table("countries", TableSchema::new(["id"]).class("Ghost"));
    let session = Session::new(schema, BeanFactory::new().with_generic("User"));
    let conn = MemoryConnection::new();
    conn.register(
        USERS_WITH_COUNTRY,
        vec![vec![Value::Int(1), "ada".into(), Value::Int(33), "France".into()]],
    );
    let mut it = ResultIterator::new(
        Arc::new(conn.clone()),
        Arc::new(NamedTemplateEngine),
        session.clone(),
        QueryPlan::new(USERS_WITH_COUNTRY, "SELECT 0", country_catalog()),
    );

    assert!(matches!(it.rewind(), Err(Error::UnknownBeanClass(c)) if c == "Ghost"));
    assert_eq!(session.cached_beans(), 0);
    assert!(
        session
            .lookup("users", &IdentityHash::from_values(&[Value::Int(1)]))
            .is_none()
    );
    assert_eq!(conn.open_statements(), 0);
}
