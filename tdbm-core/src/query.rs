use crate::catalog::{ColumnCatalog, ColumnSpec};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tdbm_api::Params;

/// Everything needed to run one generated query, minus its runtime bounds.
///
/// The catalog is shared, so one plan can back many iterators.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub sql: String,
    pub count_sql: String,
    pub catalog: Arc<ColumnCatalog>,
    /// Explicit class for the primary table group's beans.
    pub class_name: Option<String>,
}

impl QueryPlan {
    pub fn new(
        sql: impl Into<String>,
        count_sql: impl Into<String>,
        catalog: ColumnCatalog,
    ) -> Self {
        Self {
            sql: sql.into(),
            count_sql: count_sql.into(),
            catalog: Arc::new(catalog),
            class_name: None,
        }
    }

    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }
}

/// Serializable query description, as found in configuration files.
///
/// ```json
/// {
///   "sql": "SELECT u.id, u.name FROM users u WHERE u.country = :country",
///   "count_sql": "SELECT COUNT(*) FROM users u WHERE u.country = :country",
///   "params": { "country": "fr" },
///   "limit": 10,
///   "columns": [
///     { "table": "users", "column": "id", "type": "integer" },
///     { "table": "users", "column": "name", "type": "string" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub sql: String,
    pub count_sql: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub class_name: Option<String>,
}

impl QueryDefinition {
    /// Validates the column list and builds a reusable plan.
    pub fn plan(&self) -> Result<QueryPlan> {
        Ok(QueryPlan {
            sql: self.sql.clone(),
            count_sql: self.count_sql.clone(),
            catalog: Arc::new(ColumnCatalog::from_specs(&self.columns)?),
            class_name: self.class_name.clone(),
        })
    }
}
