use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Error type returned by database collaborators (templating engine, driver).
///
/// Collaborators are external to the mapping layer, so their failures are
/// carried opaquely and wrapped by the caller.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One row as handed out by the driver, in result-column order.
pub type RawRow = Vec<Value>;

/// Column values exchanged with the database.
///
/// The same type is used for raw driver values and for converted native
/// values; column converters map one to the other.
///
/// - Null: SQL NULL
/// - Bool: true/false
/// - Int: 64-bit signed integers
/// - Float: 64-bit floating point
/// - String: UTF-8 text
/// - Bytes: raw binary data
/// - DateTime: 64-bit signed microseconds since Unix epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(i64),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) | Value::DateTime(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::DateTime(_) => "datetime",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Bytes(bytes) => {
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Value::DateTime(us) => write!(f, "{us}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Named query parameters.
///
/// Ordered so that template expansion and logging are deterministic.
///
/// # Example
///
/// ```
/// use tdbm_api::{Params, Value};
///
/// let mut params = Params::new();
/// params.insert("name", Value::String("Alice".to_string()));
/// assert_eq!(params.get("name"), Some(&Value::String("Alice".to_string())));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params {
    inner: BTreeMap<String, Value>,
}

impl Params {
    /// Creates a new empty parameters map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a parameter value, replacing any previous value for `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.inner.insert(name.into(), value.into());
    }

    /// Builder-style variant of [`Params::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.inner.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// Expands a query template plus parameters into literal SQL.
pub trait TemplateEngine: Send + Sync {
    fn build(&self, template: &str, params: &Params) -> Result<String, DriverError>;
}

/// Dialect-specific SQL rewriting and value formats.
pub trait Dialect: Send + Sync {
    /// Short name of the dialect (e.g. `"generic"`).
    fn name(&self) -> &str;

    /// Rewrites `sql` so that at most `limit` rows are returned, skipping the
    /// first `offset` rows. `None` leaves the corresponding bound unset.
    fn modify_limit_query(&self, sql: &str, limit: Option<u64>, offset: Option<u64>) -> String;

    /// `chrono` format string used for textual date-time columns.
    fn datetime_format(&self) -> &str {
        "%Y-%m-%d %H:%M:%S"
    }
}

/// A live, forward-only result cursor.
///
/// Implementors own a database-side resource. `close` must release it and be
/// safe to call more than once.
pub trait Statement {
    /// Advances one row. Returns `Ok(None)` once the result set is exhausted.
    fn fetch_row(&mut self) -> Result<Option<RawRow>, DriverError>;

    /// Number of rows the statement produces, honoring any limit/offset.
    fn row_count(&self) -> u64;

    fn close(&mut self);
}

/// A database connection able to run queries and scalar lookups.
pub trait Connection {
    type Statement: Statement;

    fn dialect(&self) -> &dyn Dialect;

    /// Executes `sql` and returns a live statement positioned before the first row.
    fn execute(&self, sql: &str, params: &Params) -> Result<Self::Statement, DriverError>;

    /// Executes `sql` and returns the first column of the first row.
    fn fetch_scalar(&self, sql: &str, params: &Params) -> Result<Value, DriverError>;
}
