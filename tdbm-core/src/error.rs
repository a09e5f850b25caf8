use tdbm_api::DriverError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("query execution failed: {source} (sql: {sql})")]
    QueryExecution {
        sql: String,
        #[source]
        source: DriverError,
    },

    #[error("unknown bean class: {0}")]
    UnknownBeanClass(String),

    #[error("invalid cursor state: {0}")]
    InvalidCursorState(&'static str),

    #[error("cannot convert {table}.{column}: {message}")]
    Conversion {
        table: String,
        column: String,
        message: String,
    },

    #[error("invalid column catalog: {0}")]
    InvalidCatalog(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("missing primary key column {table}.{column}")]
    MissingPrimaryKey { table: String, column: String },

    #[error("table group {0} has no row identity")]
    EmptyTableGroup(String),
}
