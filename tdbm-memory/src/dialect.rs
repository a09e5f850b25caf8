use tdbm_api::Dialect;

/// ANSI-ish dialect: `LIMIT n OFFSET m` appended to the query.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericDialect;

impl Dialect for GenericDialect {
    fn name(&self) -> &str {
        "generic"
    }

    fn modify_limit_query(&self, sql: &str, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => sql.to_string(),
            (Some(l), None) => format!("{sql} LIMIT {l}"),
            (Some(l), Some(o)) => format!("{sql} LIMIT {l} OFFSET {o}"),
            (None, Some(o)) => format!("{sql} OFFSET {o}"),
        }
    }
}

/// Splits a trailing `LIMIT n [OFFSET m]` / `OFFSET m` window off `sql`.
pub(crate) fn split_window(sql: &str) -> (&str, Option<usize>, Option<usize>) {
    let mut base = sql;
    let mut limit = None;
    let mut offset = None;
    if let Some((head, tail)) = base.rsplit_once(" OFFSET ")
        && let Ok(n) = tail.trim().parse()
    {
        offset = Some(n);
        base = head;
    }
    if let Some((head, tail)) = base.rsplit_once(" LIMIT ")
        && let Ok(n) = tail.trim().parse()
    {
        limit = Some(n);
        base = head;
    }
    (base, limit, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_round_trips_through_the_dialect() {
        let d = GenericDialect;
        let sql = d.modify_limit_query("SELECT 1", Some(10), Some(5));
        assert_eq!(sql, "SELECT 1 LIMIT 10 OFFSET 5");
        assert_eq!(split_window(&sql), ("SELECT 1", Some(10), Some(5)));
        assert_eq!(
            split_window(&d.modify_limit_query("SELECT 1", None, Some(2))),
            ("SELECT 1", None, Some(2))
        );
        assert_eq!(split_window("SELECT 1"), ("SELECT 1", None, None));
    }

    #[test]
    fn non_numeric_tail_is_not_a_window() {
        assert_eq!(
            split_window("SELECT a FROM t WHERE x LIMIT y"),
            ("SELECT a FROM t WHERE x LIMIT y", None, None)
        );
    }
}
