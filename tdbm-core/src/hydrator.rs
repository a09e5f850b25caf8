//! Splits one raw row into per-table-group bean data.

use crate::catalog::ColumnCatalog;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tdbm_api::{Dialect, RawRow, Value};

/// Converted column values of one table, keyed by column name.
pub type TableData = BTreeMap<String, Value>;

/// Column values of every table that composes one logical bean.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BeanData {
    tables: BTreeMap<String, TableData>,
}

impl BeanData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: &str, column: &str, value: Value) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string(), value);
    }

    pub fn with(mut self, table: &str, column: &str, value: impl Into<Value>) -> Self {
        self.insert(table, column, value.into());
        self
    }

    pub fn table(&self, table: &str) -> Option<&TableData> {
        self.tables.get(table)
    }

    pub fn table_mut(&mut self, table: &str) -> Option<&mut TableData> {
        self.tables.get_mut(table)
    }

    pub fn get(&self, table: &str, column: &str) -> Option<&Value> {
        self.tables.get(table).and_then(|t| t.get(column))
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableData)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Bean data of one table group of a hydrated row.
#[derive(Debug, Clone, PartialEq)]
pub struct TableGroup {
    pub name: String,
    pub data: BeanData,
}

/// Converts `row` column by column and files each value under
/// `[table_group][table][column]`.
///
/// Columns are visited in positional order so each converter sees exactly the
/// value the driver produced for its position. The result follows the
/// catalog's table-group order; the first entry is the primary group.
pub fn split(row: RawRow, catalog: &ColumnCatalog, dialect: &dyn Dialect) -> Result<Vec<TableGroup>> {
    if row.len() != catalog.len() {
        return Err(Error::InvalidCatalog(format!(
            "row has {} columns but the catalog describes {}",
            row.len(),
            catalog.len()
        )));
    }

    let mut groups: Vec<TableGroup> = catalog
        .table_groups()
        .iter()
        .map(|name| TableGroup {
            name: name.clone(),
            data: BeanData::new(),
        })
        .collect();

    for (position, raw) in row.into_iter().enumerate() {
        let descriptor = &catalog.columns()[position];
        let value = descriptor
            .converter
            .convert(raw, dialect)
            .map_err(|message| Error::Conversion {
                table: descriptor.table.clone(),
                column: descriptor.column.clone(),
                message,
            })?;
        groups[catalog.group_index(position)].data.insert(
            &descriptor.table,
            &descriptor.column,
            value,
        );
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDescriptor, ColumnType, ValueConverter};
    use std::sync::Arc;
    use tdbm_memory::GenericDialect;

    fn catalog() -> ColumnCatalog {
        ColumnCatalog::new(vec![
            ColumnDescriptor::new("u", "users", "id", ColumnType::Integer),
            ColumnDescriptor::new("u", "persons", "id", ColumnType::Integer),
            ColumnDescriptor::new("u", "persons", "name", ColumnType::String),
            ColumnDescriptor::new("c", "countries", "id", ColumnType::Integer),
        ])
        .unwrap()
    }

    #[test]
    fn splits_joined_row_by_group_and_table() {
        let row = vec![
            Value::from("1"),
            Value::from("1"),
            Value::from("Ada"),
            Value::from("44"),
        ];
        let groups = split(row, &catalog(), &GenericDialect).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "u");
        assert_eq!(groups[0].data.get("users", "id"), Some(&Value::Int(1)));
        assert_eq!(
            groups[0].data.get("persons", "name"),
            Some(&Value::String("Ada".into()))
        );
        assert_eq!(groups[1].data.get("countries", "id"), Some(&Value::Int(44)));
        assert!(!groups[1].data.contains_table("users"));
    }

    #[test]
    fn rejects_row_of_wrong_width() {
        let err = split(vec![Value::Int(1)], &catalog(), &GenericDialect).unwrap_err();
        assert!(matches!(err, Error::InvalidCatalog(_)));
    }

    #[derive(Debug)]
    struct Upper;
    impl ValueConverter for Upper {
        fn convert(&self, raw: Value, _: &dyn Dialect) -> std::result::Result<Value, String> {
            match raw {
                Value::String(s) => Ok(Value::String(s.to_uppercase())),
                _ => Err("not text".into()),
            }
        }
    }

    #[test]
    fn custom_converter_errors_name_the_column() {
        let catalog = ColumnCatalog::new(vec![ColumnDescriptor::with_converter(
            "u",
            "users",
            "login",
            Arc::new(Upper),
        )])
        .unwrap();
        let groups = split(vec![Value::from("ada")], &catalog, &GenericDialect).unwrap();
        assert_eq!(
            groups[0].data.get("users", "login"),
            Some(&Value::String("ADA".into()))
        );

        let err = split(vec![Value::Int(3)], &catalog, &GenericDialect).unwrap_err();
        match err {
            Error::Conversion { table, column, .. } => {
                assert_eq!((table.as_str(), column.as_str()), ("users", "login"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
