//! In-memory implementations of the TDBM database collaborators.
//!
//! - [`NamedTemplateEngine`]: expands `:name` placeholders and optional
//!   `[[ ... ]]` sections.
//! - [`GenericDialect`]: `LIMIT n OFFSET m` rewriting.
//! - [`MemoryConnection`]: serves canned result sets keyed by literal SQL and
//!   records every statement it opens and closes.

pub mod connection;
pub mod dialect;
mod error;
pub mod template;

pub use crate::connection::{Event, MemoryConnection, MemoryStatement};
pub use crate::dialect::GenericDialect;
pub use crate::error::{MemoryError, Result};
pub use crate::template::NamedTemplateEngine;
