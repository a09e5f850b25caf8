//! Static per-query column metadata.
//!
//! A [`ColumnCatalog`] maps every result-column position to the table group,
//! table and column it belongs to, plus the converter that turns the driver
//! value into a native one. It is built and validated once per query shape
//! and shared read-only by every row of every run.

use crate::error::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tdbm_api::{Dialect, Value};

/// Converts one raw driver value into its native representation.
pub trait ValueConverter: Send + Sync + fmt::Debug {
    fn convert(&self, raw: Value, dialect: &dyn Dialect) -> std::result::Result<Value, String>;
}

/// Built-in column types.
///
/// NULL converts to NULL for every type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Keeps the driver value untouched.
    #[default]
    Passthrough,
    Integer,
    Float,
    String,
    Boolean,
    Binary,
    /// Microseconds since Unix epoch. Text is parsed with the dialect's format.
    DateTime,
}

impl ValueConverter for ColumnType {
    fn convert(&self, raw: Value, dialect: &dyn Dialect) -> std::result::Result<Value, String> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        match self {
            ColumnType::Passthrough => Ok(raw),
            ColumnType::Integer => to_integer(raw),
            ColumnType::Float => to_float(raw),
            ColumnType::String => to_string(raw),
            ColumnType::Boolean => to_boolean(raw),
            ColumnType::Binary => match raw {
                Value::Bytes(b) => Ok(Value::Bytes(b)),
                Value::String(s) => Ok(Value::Bytes(s.into_bytes())),
                other => Err(mismatch("binary", &other)),
            },
            ColumnType::DateTime => to_datetime(raw, dialect.datetime_format()),
        }
    }
}

fn mismatch(expected: &str, got: &Value) -> String {
    format!("expected {expected}, got {} ({got})", got.type_name())
}

fn to_integer(raw: Value) -> std::result::Result<Value, String> {
    match raw {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(Value::Int(f as i64)),
        Value::String(ref s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| mismatch("integer", &raw)),
        other => Err(mismatch("integer", &other)),
    }
}

fn to_float(raw: Value) -> std::result::Result<Value, String> {
    match raw {
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::String(ref s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| mismatch("float", &raw)),
        other => Err(mismatch("float", &other)),
    }
}

fn to_string(raw: Value) -> std::result::Result<Value, String> {
    match raw {
        Value::String(s) => Ok(Value::String(s)),
        Value::Bytes(b) => String::from_utf8(b)
            .map(Value::String)
            .map_err(|e| format!("invalid utf-8: {e}")),
        other => Ok(Value::String(other.to_string())),
    }
}

fn to_boolean(raw: Value) -> std::result::Result<Value, String> {
    match raw {
        Value::Bool(b) => Ok(Value::Bool(b)),
        Value::Int(i) => Ok(Value::Bool(i != 0)),
        Value::String(ref s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "y" | "yes" => Ok(Value::Bool(true)),
            "0" | "f" | "false" | "n" | "no" => Ok(Value::Bool(false)),
            _ => Err(mismatch("boolean", &raw)),
        },
        other => Err(mismatch("boolean", &other)),
    }
}

fn to_datetime(raw: Value, format: &str) -> std::result::Result<Value, String> {
    match raw {
        Value::DateTime(us) | Value::Int(us) => Ok(Value::DateTime(us)),
        Value::String(ref s) => {
            let s = s.trim();
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(Value::DateTime(dt.and_utc().timestamp_micros()));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| Value::DateTime(dt.and_utc().timestamp_micros()))
                .ok_or_else(|| mismatch("datetime", &raw))
        }
        other => Err(mismatch("datetime", &other)),
    }
}

/// Describes one result column. Its position is its index in the catalog.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub table_group: String,
    pub table: String,
    pub column: String,
    pub converter: Arc<dyn ValueConverter>,
}

impl ColumnDescriptor {
    pub fn new(
        table_group: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        ty: ColumnType,
    ) -> Self {
        Self::with_converter(table_group, table, column, Arc::new(ty))
    }

    pub fn with_converter(
        table_group: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        converter: Arc<dyn ValueConverter>,
    ) -> Self {
        Self {
            table_group: table_group.into(),
            table: table.into(),
            column: column.into(),
            converter,
        }
    }
}

/// Serializable form of a [`ColumnDescriptor`] using a built-in type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Defaults to the table name.
    #[serde(default)]
    pub table_group: Option<String>,
    pub table: String,
    pub column: String,
    #[serde(default, rename = "type")]
    pub ty: ColumnType,
}

impl From<&ColumnSpec> for ColumnDescriptor {
    fn from(spec: &ColumnSpec) -> Self {
        let group = spec.table_group.clone().unwrap_or_else(|| spec.table.clone());
        ColumnDescriptor::new(group, spec.table.clone(), spec.column.clone(), spec.ty)
    }
}

/// Validated, ordered list of column descriptors.
#[derive(Debug, Clone)]
pub struct ColumnCatalog {
    columns: Vec<ColumnDescriptor>,
    /// Table groups in order of first appearance; index 0 is the primary group.
    groups: Vec<String>,
    /// Index into `groups` for each column position.
    group_of: Vec<usize>,
}

impl ColumnCatalog {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::InvalidCatalog("no columns".into()));
        }

        let mut seen = HashSet::with_capacity(columns.len());
        let mut groups: Vec<String> = Vec::new();
        let mut group_of = Vec::with_capacity(columns.len());

        for (position, c) in columns.iter().enumerate() {
            if c.table_group.is_empty() || c.table.is_empty() || c.column.is_empty() {
                return Err(Error::InvalidCatalog(format!(
                    "column {position} has an empty table group, table or column name"
                )));
            }
            if !seen.insert((&c.table_group, &c.table, &c.column)) {
                return Err(Error::InvalidCatalog(format!(
                    "duplicate column {}.{} in table group {}",
                    c.table, c.column, c.table_group
                )));
            }
            let index = match groups.iter().position(|g| g == &c.table_group) {
                Some(i) => i,
                None => {
                    groups.push(c.table_group.clone());
                    groups.len() - 1
                }
            };
            group_of.push(index);
        }

        Ok(Self {
            columns,
            groups,
            group_of,
        })
    }

    pub fn from_specs(specs: &[ColumnSpec]) -> Result<Self> {
        Self::new(specs.iter().map(ColumnDescriptor::from).collect())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn get(&self, position: usize) -> Option<&ColumnDescriptor> {
        self.columns.get(position)
    }

    pub fn table_groups(&self) -> &[String] {
        &self.groups
    }

    /// The group whose bean is surfaced as the iterator's current element.
    pub fn primary_group(&self) -> &str {
        &self.groups[0]
    }

    #[inline]
    pub(crate) fn group_index(&self, position: usize) -> usize {
        self.group_of[position]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdbm_memory::GenericDialect;

    #[test]
    fn groups_follow_first_appearance() {
        let catalog = ColumnCatalog::new(vec![
            ColumnDescriptor::new("u", "users", "id", ColumnType::Integer),
            ColumnDescriptor::new("c", "countries", "id", ColumnType::Integer),
            ColumnDescriptor::new("u", "users", "name", ColumnType::String),
        ])
        .unwrap();
        assert_eq!(catalog.table_groups(), ["u".to_string(), "c".to_string()]);
        assert_eq!(catalog.primary_group(), "u");
        assert_eq!(catalog.group_index(2), 0);
    }

    #[test]
    fn rejects_duplicates_and_empty() {
        assert!(matches!(
            ColumnCatalog::new(vec![]),
            Err(Error::InvalidCatalog(_))
        ));
        let dup = ColumnCatalog::new(vec![
            ColumnDescriptor::new("u", "users", "id", ColumnType::Integer),
            ColumnDescriptor::new("u", "users", "id", ColumnType::Integer),
        ]);
        assert!(matches!(dup, Err(Error::InvalidCatalog(_))));
    }

    #[test]
    fn same_table_in_two_groups_is_allowed() {
        let catalog = ColumnCatalog::new(vec![
            ColumnDescriptor::new("u", "users", "id", ColumnType::Integer),
            ColumnDescriptor::new("manager", "users", "id", ColumnType::Integer),
        ])
        .unwrap();
        assert_eq!(catalog.table_groups().len(), 2);
    }

    #[test]
    fn spec_group_defaults_to_table() {
        let specs: Vec<ColumnSpec> =
            serde_json::from_str(r#"[{"table": "users", "column": "id", "type": "integer"}]"#)
                .unwrap();
        let catalog = ColumnCatalog::from_specs(&specs).unwrap();
        assert_eq!(catalog.primary_group(), "users");
    }

    #[test]
    fn converts_driver_text() {
        let d = GenericDialect;
        assert_eq!(
            ColumnType::Integer.convert(Value::from("42"), &d),
            Ok(Value::Int(42))
        );
        assert_eq!(
            ColumnType::Boolean.convert(Value::from("f"), &d),
            Ok(Value::Bool(false))
        );
        assert_eq!(
            ColumnType::DateTime.convert(Value::from("1970-01-01 00:00:01"), &d),
            Ok(Value::DateTime(1_000_000))
        );
        assert_eq!(
            ColumnType::DateTime.convert(Value::from("1970-01-02"), &d),
            Ok(Value::DateTime(86_400_000_000))
        );
        assert_eq!(
            ColumnType::Binary.convert(Value::from("ab"), &d),
            Ok(Value::Bytes(b"ab".to_vec()))
        );
        assert_eq!(ColumnType::Float.convert(Value::Null, &d), Ok(Value::Null));
        assert!(ColumnType::Integer.convert(Value::from("x"), &d).is_err());
    }
}
