//! Runtime result mapping for TDBM.
//!
//! Turns a forward-only database cursor into a resettable, countable sequence
//! of beans, splitting joined rows into per-table-group beans and
//! deduplicating them through a session-scoped identity cache.
//!
//! ```text
//! ResultIterator::rewind/next
//!   -> Cursor::fetch_next
//!   -> hydrator::split            (one BeanData per table group)
//!   -> ClassResolver::resolve     (bean class + main table)
//!   -> Session::get_or_create_row (identity cache, BeanFactory on miss, per row)
//! ```

pub mod catalog;
pub mod cursor;
mod error;
pub mod factory;
pub mod hydrator;
pub mod identity;
pub mod iterator;
pub mod map;
pub mod query;
pub mod schema;
pub mod session;

pub use crate::catalog::{ColumnCatalog, ColumnDescriptor, ColumnSpec, ColumnType, ValueConverter};
pub use crate::cursor::Cursor;
pub use crate::error::{Error, Result};
pub use crate::factory::{
    Bean, BeanFactory, BeanRef, ClassResolver, DiscriminatorResolver, GenericBean,
    InheritanceResolver, ResolvedClass,
};
pub use crate::hydrator::{BeanData, TableData, TableGroup};
pub use crate::identity::{IdentityHash, ObjectStorage};
pub use crate::iterator::{Beans, ResultIterator};
pub use crate::map::MapIterator;
pub use crate::query::{QueryDefinition, QueryPlan};
pub use crate::schema::{Schema, TableSchema};
pub use crate::session::{Session, SessionConfig};
