use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("unbalanced optional section at byte {0}")]
    UnbalancedSection(usize),

    #[error("no result set registered for: {0}")]
    UnknownQuery(String),

    #[error("count query returned no row: {0}")]
    NoCountRow(String),

    #[error("statement already closed")]
    StatementClosed,

    #[error("injected failure: {0}")]
    Injected(String),
}
