use crate::dialect::{GenericDialect, split_window};
use crate::error::MemoryError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tdbm_api::{Connection, Dialect, DriverError, Params, RawRow, Statement, Value};
use tracing::debug;

/// Something the connection was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Execute(String),
    Scalar(String),
    Close(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    result_sets: HashMap<String, Vec<RawRow>>,
    /// Count query SQL -> SQL of the result set it counts.
    counts: HashMap<String, String>,
    scalars: HashMap<String, Value>,
    fail_execute: HashMap<String, String>,
    /// Base SQL -> zero-based row index at which fetching fails.
    fail_fetch: HashMap<String, usize>,
    events: Vec<Event>,
    open_statements: usize,
}

/// Connection serving canned result sets.
///
/// Result sets are keyed by the literal SQL produced by the template engine,
/// so different parameters select different canned results. A trailing
/// `LIMIT`/`OFFSET` window is applied to the canned rows, as a database would.
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnection {
    dialect: GenericDialect,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the rows returned for `sql`.
    pub fn register(&self, sql: impl Into<String>, rows: Vec<RawRow>) -> &Self {
        self.state.lock().result_sets.insert(sql.into(), rows);
        self
    }

    /// Makes `count_sql` return the number of rows registered for `of_sql`.
    pub fn register_count(&self, count_sql: impl Into<String>, of_sql: impl Into<String>) -> &Self {
        self.state.lock().counts.insert(count_sql.into(), of_sql.into());
        self
    }

    pub fn register_scalar(&self, sql: impl Into<String>, value: Value) -> &Self {
        self.state.lock().scalars.insert(sql.into(), value);
        self
    }

    /// Makes executing `sql` (ignoring any window) fail with `message`.
    pub fn fail_on_execute(&self, sql: impl Into<String>, message: impl Into<String>) -> &Self {
        self.state.lock().fail_execute.insert(sql.into(), message.into());
        self
    }

    /// Makes fetching row `row` of `sql` (ignoring any window) fail.
    pub fn fail_on_fetch(&self, sql: impl Into<String>, row: usize) -> &Self {
        self.state.lock().fail_fetch.insert(sql.into(), row);
        self
    }

    /// Removes every injected failure.
    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.fail_execute.clear();
        state.fail_fetch.clear();
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    /// SQL of every executed statement, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Execute(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn scalar_queries(&self) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Scalar(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Statements executed but not closed yet.
    pub fn open_statements(&self) -> usize {
        self.state.lock().open_statements
    }
}

impl Connection for MemoryConnection {
    type Statement = MemoryStatement;

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn execute(&self, sql: &str, _params: &Params) -> Result<MemoryStatement, DriverError> {
        let mut state = self.state.lock();
        state.events.push(Event::Execute(sql.to_string()));

        let (base, limit, offset) = split_window(sql);
        if let Some(message) = state.fail_execute.get(base) {
            return Err(MemoryError::Injected(message.clone()).into());
        }
        let rows = state
            .result_sets
            .get(base)
            .ok_or_else(|| MemoryError::UnknownQuery(base.to_string()))?;

        let offset = offset.unwrap_or(0);
        let window: VecDeque<RawRow> = rows
            .iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        let fail_at = state
            .fail_fetch
            .get(base)
            .and_then(|row| row.checked_sub(offset));

        state.open_statements += 1;
        debug!(%sql, rows = window.len(), "memory statement opened");
        Ok(MemoryStatement {
            sql: sql.to_string(),
            row_count: window.len() as u64,
            rows: window,
            fetched: 0,
            fail_at,
            closed: false,
            state: Arc::clone(&self.state),
        })
    }

    fn fetch_scalar(&self, sql: &str, _params: &Params) -> Result<Value, DriverError> {
        let mut state = self.state.lock();
        state.events.push(Event::Scalar(sql.to_string()));

        let (base, limit, offset) = split_window(sql);
        if let Some(message) = state.fail_execute.get(base) {
            return Err(MemoryError::Injected(message.clone()).into());
        }
        let value = if let Some(v) = state.scalars.get(base) {
            v.clone()
        } else if let Some(target) = state.counts.get(base) {
            let rows = state
                .result_sets
                .get(target)
                .ok_or_else(|| MemoryError::UnknownQuery(target.clone()))?;
            Value::Int(rows.len() as i64)
        } else {
            return Err(MemoryError::UnknownQuery(base.to_string()).into());
        };

        // A scalar query yields one row; a window can only hide it.
        if limit == Some(0) || offset.unwrap_or(0) > 0 {
            return Err(MemoryError::NoCountRow(sql.to_string()).into());
        }
        Ok(value)
    }
}

/// Open cursor over a canned, windowed result set.
#[derive(Debug)]
pub struct MemoryStatement {
    sql: String,
    rows: VecDeque<RawRow>,
    row_count: u64,
    fetched: usize,
    fail_at: Option<usize>,
    closed: bool,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Statement for MemoryStatement {
    fn fetch_row(&mut self) -> Result<Option<RawRow>, DriverError> {
        if self.closed {
            return Err(MemoryError::StatementClosed.into());
        }
        if self.fail_at == Some(self.fetched) {
            return Err(MemoryError::Injected(format!("fetch of row {}", self.fetched)).into());
        }
        let row = self.rows.pop_front();
        if row.is_some() {
            self.fetched += 1;
        }
        Ok(row)
    }

    fn row_count(&self) -> u64 {
        self.row_count
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.state.lock();
        state.open_statements -= 1;
        state.events.push(Event::Close(self.sql.clone()));
    }
}

impl Drop for MemoryStatement {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> MemoryConnection {
        let conn = MemoryConnection::new();
        conn.register(
            "SELECT id FROM t",
            (1..=5).map(|i| vec![Value::Int(i)]).collect(),
        );
        conn.register_count("SELECT COUNT(*) FROM t", "SELECT id FROM t");
        conn
    }

    fn drain(statement: &mut MemoryStatement) -> Vec<RawRow> {
        std::iter::from_fn(|| statement.fetch_row().unwrap()).collect()
    }

    #[test]
    fn applies_window_to_canned_rows() {
        let conn = conn();
        let mut st = conn.execute("SELECT id FROM t LIMIT 2 OFFSET 1", &Params::new()).unwrap();
        assert_eq!(st.row_count(), 2);
        assert_eq!(drain(&mut st), vec![vec![Value::Int(2)], vec![Value::Int(3)]]);
        assert_eq!(conn.open_statements(), 1);
        st.close();
        st.close();
        assert_eq!(conn.open_statements(), 0);
    }

    #[test]
    fn dropping_a_statement_closes_it() {
        let conn = conn();
        {
            let _st = conn.execute("SELECT id FROM t", &Params::new()).unwrap();
            assert_eq!(conn.open_statements(), 1);
        }
        assert_eq!(conn.open_statements(), 0);
        assert_eq!(
            conn.events().last(),
            Some(&Event::Close("SELECT id FROM t".into()))
        );
    }

    #[test]
    fn counts_registered_result_sets() {
        let conn = conn();
        assert_eq!(
            conn.fetch_scalar("SELECT COUNT(*) FROM t", &Params::new()).unwrap(),
            Value::Int(5)
        );
        assert!(
            conn.fetch_scalar("SELECT COUNT(*) FROM t LIMIT 10 OFFSET 5", &Params::new())
                .is_err()
        );
    }

    #[test]
    fn injected_fetch_failure_respects_offset() {
        let conn = conn();
        conn.fail_on_fetch("SELECT id FROM t", 3);
        let mut st = conn.execute("SELECT id FROM t OFFSET 2", &Params::new()).unwrap();
        assert!(st.fetch_row().unwrap().is_some());
        assert!(st.fetch_row().is_err());
    }

    #[test]
    fn unknown_query_is_an_error() {
        assert!(conn().execute("SELECT nope", &Params::new()).is_err());
    }
}
