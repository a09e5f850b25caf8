//! Lazy execution of a query template and of its count companion.
//!
//! The main statement and the full count have independent lifecycles:
//!
//! ```text
//! statement:  NotStarted --execute--> Fetching --end of rows--> Exhausted
//!                 ^                      |   \--driver error--> NotStarted
//!                 +------- reset --------+
//! full count: Unknown --full_count--> Computed --reset(true)--> Unknown
//! ```

use crate::error::{Error, Result};
use std::sync::Arc;
use tdbm_api::{Connection, Dialect, Params, RawRow, Statement, TemplateEngine, Value};
use tracing::{debug, warn};

enum StatementState<S> {
    NotStarted,
    Fetching(S),
    Exhausted,
}

/// Forward-only cursor over one query template.
///
/// Holds at most one open statement. Every transition out of `Fetching`
/// closes it, including error paths and drop.
pub struct Cursor<C: Connection> {
    connection: Arc<C>,
    templates: Arc<dyn TemplateEngine>,
    sql_template: String,
    count_template: String,
    params: Params,
    limit: Option<u64>,
    offset: Option<u64>,
    state: StatementState<C::Statement>,
    /// SQL of the current run, kept for error reporting.
    last_sql: Option<String>,
    /// Rows produced by the current run, honoring limit/offset.
    windowed_count: Option<u64>,
    full_count: Option<u64>,
}

impl<C: Connection> Cursor<C> {
    pub fn new(
        connection: Arc<C>,
        templates: Arc<dyn TemplateEngine>,
        sql_template: impl Into<String>,
        count_template: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            templates,
            sql_template: sql_template.into(),
            count_template: count_template.into(),
            params: Params::new(),
            limit: None,
            offset: None,
            state: StatementState::NotStarted,
            last_sql: None,
            windowed_count: None,
            full_count: None,
        }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.connection.dialect()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Whether a statement has been executed for the current run.
    pub fn is_started(&self) -> bool {
        !matches!(self.state, StatementState::NotStarted)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, StatementState::Exhausted)
    }

    /// Changing the predicate invalidates the cached full count.
    pub fn set_params(&mut self, params: Params) {
        self.params = params;
        self.reset(true);
    }

    pub fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
        self.reset(false);
    }

    pub fn set_offset(&mut self, offset: Option<u64>) {
        self.offset = offset;
        self.reset(false);
    }

    /// Runs the main query, replacing any statement already open.
    pub fn execute(&mut self) -> Result<()> {
        self.reset(false);

        let sql = self
            .templates
            .build(&self.sql_template, &self.params)
            .map_err(|source| Error::QueryExecution {
                sql: self.sql_template.clone(),
                source,
            })?;
        let sql = self
            .connection
            .dialect()
            .modify_limit_query(&sql, self.limit, self.offset);

        debug!(%sql, limit = ?self.limit, offset = ?self.offset, "executing query");
        let statement = self
            .connection
            .execute(&sql, &self.params)
            .map_err(|source| {
                warn!(%sql, error = %source, "query execution failed");
                Error::QueryExecution {
                    sql: sql.clone(),
                    source,
                }
            })?;

        self.windowed_count = Some(statement.row_count());
        self.state = StatementState::Fetching(statement);
        self.last_sql = Some(sql);
        Ok(())
    }

    /// Advances the open statement by one row.
    ///
    /// A driver error closes the statement and returns the cursor to
    /// `NotStarted`; result cursors are not resumable after such a failure.
    pub fn fetch_next(&mut self) -> Result<Option<RawRow>> {
        let outcome = match &mut self.state {
            StatementState::NotStarted => {
                return Err(Error::InvalidCursorState("fetch before execute"));
            }
            StatementState::Exhausted => return Ok(None),
            StatementState::Fetching(statement) => statement.fetch_row(),
        };

        match outcome {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.close_statement();
                self.state = StatementState::Exhausted;
                Ok(None)
            }
            Err(source) => {
                let sql = self.last_sql.clone().unwrap_or_default();
                warn!(%sql, error = %source, "fetch failed, closing statement");
                self.reset(false);
                Err(Error::QueryExecution { sql, source })
            }
        }
    }

    /// Rows the current run yields. Executes the query if it has not run yet.
    pub fn windowed_count(&mut self) -> Result<u64> {
        if !self.is_started() {
            self.execute()?;
        }
        self.windowed_count
            .ok_or(Error::InvalidCursorState("windowed count unavailable"))
    }

    /// Rows matching the predicate, ignoring limit and offset.
    ///
    /// Computed by the count template on first call and cached until the
    /// parameters change.
    pub fn full_count(&mut self) -> Result<u64> {
        if let Some(count) = self.full_count {
            return Ok(count);
        }

        let sql = self
            .templates
            .build(&self.count_template, &self.params)
            .map_err(|source| Error::QueryExecution {
                sql: self.count_template.clone(),
                source,
            })?;
        debug!(%sql, "executing count query");
        let value = self
            .connection
            .fetch_scalar(&sql, &self.params)
            .map_err(|source| Error::QueryExecution {
                sql: sql.clone(),
                source,
            })?;
        let count = count_from_value(&value).ok_or_else(|| Error::QueryExecution {
            sql,
            source: format!("count query returned {} ({value})", value.type_name()).into(),
        })?;

        self.full_count = Some(count);
        Ok(count)
    }

    /// Closes any open statement and forgets the current run.
    pub fn reset(&mut self, invalidate_full_count: bool) {
        self.close_statement();
        self.state = StatementState::NotStarted;
        self.last_sql = None;
        self.windowed_count = None;
        if invalidate_full_count {
            self.full_count = None;
        }
    }

    fn close_statement(&mut self) {
        if let StatementState::Fetching(mut statement) =
            std::mem::replace(&mut self.state, StatementState::NotStarted)
        {
            statement.close();
            debug!(sql = ?self.last_sql, "statement closed");
        }
    }
}

impl<C: Connection> Drop for Cursor<C> {
    fn drop(&mut self) {
        self.close_statement();
    }
}

fn count_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Int(i) => u64::try_from(*i).ok(),
        Value::Float(f) if f.fract() == 0.0 && *f >= 0.0 => Some(*f as u64),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
