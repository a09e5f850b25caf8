use crate::catalog::ColumnCatalog;
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::factory::BeanRef;
use crate::hydrator;
use crate::identity::IdentityHash;
use crate::map::MapIterator;
use crate::query::{QueryDefinition, QueryPlan};
use crate::session::Session;
use std::sync::Arc;
use tdbm_api::{Connection, Params, RawRow, TemplateEngine};
use tracing::warn;

enum IterState {
    Unstarted,
    Positioned { key: u64, current: BeanRef },
    Exhausted,
}

/// Lazy, restartable, countable sequence of beans.
///
/// Nothing runs until [`rewind`](Self::rewind) (or a count) is called.
/// Changing the limit, offset or parameters closes the open statement and
/// returns the iterator to its unstarted state.
///
/// # Example
///
/// ```ignore
/// let mut users = ResultIterator::new(conn, templates, session.clone(), plan);
/// users.set_limit(Some(10));
/// for bean in users.iter() {
///     let bean = bean?;
///     // ...
/// }
/// let total = users.full_count()?;
/// ```
pub struct ResultIterator<C: Connection> {
    cursor: Cursor<C>,
    catalog: Arc<ColumnCatalog>,
    session: Session,
    class_name: Option<String>,
    state: IterState,
    next_key: u64,
}

impl<C: Connection> ResultIterator<C> {
    pub fn new(
        connection: Arc<C>,
        templates: Arc<dyn TemplateEngine>,
        session: Session,
        plan: QueryPlan,
    ) -> Self {
        Self {
            cursor: Cursor::new(connection, templates, plan.sql, plan.count_sql),
            catalog: plan.catalog,
            session,
            class_name: plan.class_name,
            state: IterState::Unstarted,
            next_key: 0,
        }
    }

    /// Builds an iterator with the parameters and bounds of `definition`.
    pub fn from_definition(
        connection: Arc<C>,
        templates: Arc<dyn TemplateEngine>,
        session: Session,
        definition: &QueryDefinition,
    ) -> Result<Self> {
        let mut it = Self::new(connection, templates, session, definition.plan()?);
        it.cursor.set_params(definition.params.clone());
        it.cursor.set_limit(definition.limit);
        it.cursor.set_offset(definition.offset);
        Ok(it)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn params(&self) -> &Params {
        self.cursor.params()
    }

    pub fn limit(&self) -> Option<u64> {
        self.cursor.limit()
    }

    pub fn offset(&self) -> Option<u64> {
        self.cursor.offset()
    }

    /// Runs the query again and positions on its first row.
    ///
    /// On failure the statement is closed and the iterator is left unstarted;
    /// calling `rewind` again retries.
    pub fn rewind(&mut self) -> Result<()> {
        self.state = IterState::Unstarted;
        self.next_key = 0;
        self.cursor.execute()?;
        self.advance()
    }

    /// Moves to the next row. A no-op once the iterator is exhausted.
    pub fn next(&mut self) -> Result<()> {
        match self.state {
            IterState::Unstarted => Err(Error::InvalidCursorState("next() called before rewind()")),
            IterState::Exhausted => Ok(()),
            IterState::Positioned { .. } => self.advance(),
        }
    }

    fn advance(&mut self) -> Result<()> {
        let step = match self.cursor.fetch_next() {
            Ok(Some(row)) => self.hydrate(row),
            Ok(None) => {
                self.state = IterState::Exhausted;
                return Ok(());
            }
            Err(e) => Err(e),
        };

        match step {
            Ok(current) => {
                self.state = IterState::Positioned {
                    key: self.next_key,
                    current,
                };
                self.next_key += 1;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "row hydration failed, resetting iterator");
                self.cursor.reset(false);
                self.state = IterState::Unstarted;
                Err(e)
            }
        }
    }

    /// Resolves every table group of `row` and returns the primary group's bean.
    ///
    /// Secondary groups are get-or-created too, even though only the primary
    /// bean is surfaced: joined rows may populate related beans as a side effect.
    /// Classes and identities of all groups are resolved before the cache is
    /// touched, and the row's beans are cached together or not at all.
    fn hydrate(&self, row: RawRow) -> Result<BeanRef> {
        let groups = hydrator::split(row, &self.catalog, self.cursor.dialect())?;
        let schema = self.session.schema();
        let mut resolved = Vec::with_capacity(groups.len());

        for (index, group) in groups.iter().enumerate() {
            let hint = if index == 0 {
                self.class_name.as_deref()
            } else {
                None
            };
            let Some(class) = self.session.resolver().resolve(schema, &group.data, hint)? else {
                if index == 0 {
                    return Err(Error::EmptyTableGroup(group.name.clone()));
                }
                continue;
            };
            let hash = IdentityHash::compute(schema, &class.main_table, &group.data)?;
            resolved.push((class, hash, &group.data));
        }

        self.session
            .get_or_create_row(&resolved)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmptyTableGroup(self.catalog.primary_group().to_string()))
    }

    pub fn valid(&self) -> bool {
        matches!(self.state, IterState::Positioned { .. })
    }

    pub fn current(&self) -> Option<&BeanRef> {
        match &self.state {
            IterState::Positioned { current, .. } => Some(current),
            _ => None,
        }
    }

    /// Zero-based position of the current bean.
    pub fn key(&self) -> Option<u64> {
        match self.state {
            IterState::Positioned { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, IterState::Exhausted)
    }

    /// Number of rows this iteration yields, honoring limit and offset.
    pub fn count(&mut self) -> Result<u64> {
        self.cursor.windowed_count()
    }

    /// Number of rows matching the query, ignoring limit and offset.
    pub fn full_count(&mut self) -> Result<u64> {
        self.cursor.full_count()
    }

    pub fn set_limit(&mut self, limit: Option<u64>) -> &mut Self {
        self.cursor.set_limit(limit);
        self.state = IterState::Unstarted;
        self
    }

    pub fn set_offset(&mut self, offset: Option<u64>) -> &mut Self {
        self.cursor.set_offset(offset);
        self.state = IterState::Unstarted;
        self
    }

    /// Replaces the parameters. Also drops the cached full count.
    pub fn set_parameters(&mut self, params: Params) -> &mut Self {
        self.cursor.set_params(params);
        self.state = IterState::Unstarted;
        self
    }

    /// Rewinds and collects every bean of the run.
    pub fn to_vec(&mut self) -> Result<Vec<BeanRef>> {
        self.iter().collect()
    }

    /// Iterates from the first row. Each call starts a fresh run.
    pub fn iter(&mut self) -> Beans<'_, C> {
        Beans {
            inner: self,
            started: false,
            done: false,
        }
    }

    /// Lazily applies `f` to each bean of a fresh run.
    pub fn map<T, F>(&mut self, f: F) -> MapIterator<'_, C, F>
    where
        F: FnMut(BeanRef) -> T,
    {
        MapIterator::new(self.iter(), f)
    }
}

/// Borrowing iterator over a [`ResultIterator`]'s beans.
///
/// Yields at most one error, after which it is fused.
pub struct Beans<'a, C: Connection> {
    inner: &'a mut ResultIterator<C>,
    started: bool,
    done: bool,
}

impl<C: Connection> Beans<'_, C> {
    pub fn source(&mut self) -> &mut ResultIterator<C> {
        self.inner
    }
}

impl<C: Connection> Iterator for Beans<'_, C> {
    type Item = Result<BeanRef>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = if self.started {
            self.inner.next()
        } else {
            self.started = true;
            self.inner.rewind()
        };
        if let Err(e) = step {
            self.done = true;
            return Some(Err(e));
        }
        match self.inner.current() {
            Some(bean) => Some(Ok(bean.clone())),
            None => {
                self.done = true;
                None
            }
        }
    }
}
