use crate::error::{Error, Result};
use crate::hydrator::{BeanData, TableData};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tdbm_api::Value;

/// Mapping metadata for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Primary-key columns, in key order.
    pub primary_key: Vec<String>,
    /// Parent table when this table extends another one (joined inheritance).
    #[serde(default)]
    pub parent: Option<String>,
    /// Bean class for rows of this table. Defaults to the table name.
    #[serde(default)]
    pub class_name: Option<String>,
}

impl TableSchema {
    pub fn new<I, S>(primary_key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            primary_key: primary_key.into_iter().map(Into::into).collect(),
            parent: None,
            class_name: None,
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }
}

/// Table metadata known to a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    tables: BTreeMap<String, TableSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, table: TableSchema) -> Self {
        self.add_table(name, table);
        self
    }

    pub fn add_table(&mut self, name: impl Into<String>, table: TableSchema) {
        self.tables.insert(name.into(), table);
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableSchema)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn class_name_for(&self, table: &str) -> String {
        self.table(table)
            .and_then(|t| t.class_name.clone())
            .unwrap_or_else(|| table.to_string())
    }

    /// Number of ancestors of `table` in the inheritance chain.
    pub fn depth(&self, table: &str) -> usize {
        let mut depth = 0;
        let mut current = table;
        while let Some(parent) = self.table(current).and_then(|t| t.parent.as_deref()) {
            depth += 1;
            // A cyclic declaration cannot be deeper than the schema itself.
            if depth > self.tables.len() {
                break;
            }
            current = parent;
        }
        depth
    }

    /// Picks the table that carries the identity of a table group.
    ///
    /// Only tables whose primary key is at least partly non-NULL take part:
    /// an outer-joined subtype with no matching row is not part of the bean.
    /// Among those, the most-derived table wins. Returns `None` when no table
    /// of the group has a row.
    pub fn main_table<'a>(&self, data: &'a BeanData) -> Option<&'a str> {
        data.tables()
            .filter(|(name, columns)| self.has_identity(name, columns))
            .max_by(|(a, _), (b, _)| self.depth(a).cmp(&self.depth(b)).then(b.cmp(a)))
            .map(|(name, _)| name)
    }

    fn has_identity(&self, table: &str, columns: &TableData) -> bool {
        match self.table(table) {
            Some(schema) => schema
                .primary_key
                .iter()
                .any(|c| columns.get(c).is_some_and(|v| !v.is_null())),
            None => columns.values().any(|v| !v.is_null()),
        }
    }

    /// Ordered primary-key values of `table` taken from `columns`.
    pub fn primary_key_values(&self, table: &str, columns: &TableData) -> Result<Vec<Value>> {
        let schema = self
            .table(table)
            .ok_or_else(|| Error::UnknownTable(table.to_string()))?;
        schema
            .primary_key
            .iter()
            .map(|column| {
                columns
                    .get(column)
                    .cloned()
                    .ok_or_else(|| Error::MissingPrimaryKey {
                        table: table.to_string(),
                        column: column.clone(),
                    })
            })
            .collect()
    }
}
