use crate::error::Result;
use crate::factory::BeanRef;
use crate::iterator::Beans;
use tdbm_api::Connection;

/// Lazy projection of a result iterator.
///
/// Nothing is fetched until the first call to `next`, and beans are mapped
/// one at a time as they are fetched.
pub struct MapIterator<'a, C: Connection, F> {
    beans: Beans<'a, C>,
    f: F,
}

impl<'a, C: Connection, F> MapIterator<'a, C, F> {
    pub(crate) fn new(beans: Beans<'a, C>, f: F) -> Self {
        Self { beans, f }
    }

    /// Windowed count of the underlying query.
    pub fn windowed_count(&mut self) -> Result<u64> {
        self.beans.source().count()
    }

    /// Full count of the underlying query.
    pub fn full_count(&mut self) -> Result<u64> {
        self.beans.source().full_count()
    }
}

impl<C: Connection, F, T> MapIterator<'_, C, F>
where
    F: FnMut(BeanRef) -> T,
{
    pub fn to_vec(self) -> Result<Vec<T>> {
        self.collect()
    }
}

impl<C: Connection, F, T> Iterator for MapIterator<'_, C, F>
where
    F: FnMut(BeanRef) -> T,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let bean = self.beans.next()?;
        Some(bean.map(&mut self.f))
    }
}
