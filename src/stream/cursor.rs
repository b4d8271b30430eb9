//! Forward-only cursors consumed by subscriptions

use crate::Result;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::collections::VecDeque;
use std::iter::Peekable;

/// A blocking, forward-only source of rows.
pub trait RowCursor {
    type Item;

    /// Execute the underlying query. Called once, lazily, on first demand.
    fn open(&mut self) -> Result<()>;

    /// Next row, or `None` once the cursor is exhausted. May block on I/O.
    fn advance(&mut self) -> Result<Option<Self::Item>>;

    /// Release query resources. Must be idempotent.
    fn close(&mut self);

    /// Whether the cursor already knows, without further I/O, that no row
    /// is left. Lets a subscription complete without waiting for demand.
    fn is_exhausted(&mut self) -> bool {
        false
    }
}

/// Converts one result row into an item
pub type RowMapper<T> = fn(&Row<'_>) -> Result<T>;

/// Marker a [`QueryCursor`] query carries inside its `WHERE` clause, where
/// the resume predicate of every page after the first is spliced in.
pub const SEEK_MARKER: &str = "/*seek*/";

/// The ordering key of a query: the SQL expression its `ORDER BY` sorts on
/// and the result columns holding the same values.
///
/// The key must be unique per row, so a page can resume strictly after
/// the last row of the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeekKey {
    expr: String,
    columns: Vec<usize>,
}

impl SeekKey {
    pub fn new(expr: impl Into<String>, columns: impl Into<Vec<usize>>) -> Self {
        Self {
            expr: expr.into(),
            columns: columns.into(),
        }
    }

    /// `AND (key) > (?first, ..)` with parameters numbered from `first`
    fn after_clause(&self, first: usize) -> String {
        let placeholders: Vec<String> = (first..first + self.columns.len()).map(|i| format!("?{}", i)).collect();
        format!(" AND {} > ({})", self.expr, placeholders.join(", "))
    }
}

/// SQL cursor that fetches its result in pages of `fetch_size` rows.
///
/// Pages are keyset slices of the same ordered query: each resumes after
/// the ordering key of the last row already read, so rows written or
/// removed behind the cursor never shift the rows still ahead of it. One
/// row past every page is read ahead, so the cursor knows it is exhausted
/// as soon as its last row is handed out.
pub struct QueryCursor<'c, T> {
    conn: &'c Connection,
    sql: String,
    params: Vec<Value>,
    seek: SeekKey,
    mapper: RowMapper<T>,
    fetch_size: usize,
    limit: Option<usize>,
    fetched: usize,
    last_key: Option<Vec<Value>>,
    buffer: VecDeque<T>,
    exhausted: bool,
}

impl<'c, T> QueryCursor<'c, T> {
    /// `sql` must carry [`SEEK_MARKER`] in its `WHERE` clause, end with an
    /// `ORDER BY` on `seek`, and use numbered parameters `?1..?N` matching
    /// `params`.
    pub fn new(
        conn: &'c Connection,
        sql: impl Into<String>,
        params: Vec<Value>,
        seek: SeekKey,
        mapper: RowMapper<T>,
    ) -> Self {
        Self {
            conn,
            sql: sql.into(),
            params,
            seek,
            mapper,
            fetch_size: 10,
            limit: None,
            fetched: 0,
            last_key: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    /// Cap on the total number of rows this cursor yields
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    fn fetch_page(&mut self) -> Result<()> {
        let remaining = self.limit.map_or(usize::MAX, |limit| limit.saturating_sub(self.fetched));
        if remaining == 0 {
            self.exhausted = true;
            return Ok(());
        }
        let page = self.fetch_size.min(remaining);

        let mut params = self.params.clone();
        let seek = match &self.last_key {
            Some(key) => {
                let clause = self.seek.after_clause(params.len() + 1);
                params.extend(key.iter().cloned());
                clause
            }
            None => String::new(),
        };
        params.push(Value::Integer(page.saturating_add(1) as i64));
        let sql = format!("{} LIMIT ?{}", self.sql.replacen(SEEK_MARKER, &seek, 1), params.len());

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut count = 0;
        while let Some(row) = rows.next()? {
            count += 1;
            if count > remaining {
                break;
            }
            let key = self
                .seek
                .columns
                .iter()
                .map(|&column| row.get::<_, Value>(column))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            self.buffer.push_back((self.mapper)(row)?);
            self.last_key = Some(key);
            self.fetched += 1;
        }
        if count <= page || self.fetched >= self.limit.unwrap_or(usize::MAX) {
            self.exhausted = true;
        }
        tracing::trace!(rows = count, total = self.fetched, "fetched cursor page");
        Ok(())
    }
}

impl<T> RowCursor for QueryCursor<'_, T> {
    type Item = T;

    fn open(&mut self) -> Result<()> {
        tracing::debug!(sql = %self.sql, fetch_size = self.fetch_size, "opening query cursor");
        self.fetch_page()
    }

    /// Refills before handing out the last buffered row, so `is_exhausted`
    /// is accurate right after every item.
    fn advance(&mut self) -> Result<Option<T>> {
        if self.buffer.len() < 2 && !self.exhausted {
            self.fetch_page()?;
        }
        Ok(self.buffer.pop_front())
    }

    fn close(&mut self) {
        self.buffer.clear();
        self.exhausted = true;
    }

    fn is_exhausted(&mut self) -> bool {
        self.exhausted && self.buffer.is_empty()
    }
}

/// Cursor over an in-memory iterator of results.
pub struct IterCursor<I: Iterator> {
    iter: Option<Peekable<I>>,
    source: Option<I>,
}

impl<I: Iterator> IterCursor<I> {
    pub fn new(iter: I) -> Self {
        Self { iter: None, source: Some(iter) }
    }
}

impl<T, I> RowCursor for IterCursor<I>
where
    I: Iterator<Item = Result<T>>,
{
    type Item = T;

    fn open(&mut self) -> Result<()> {
        self.iter = self.source.take().map(Iterator::peekable);
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<T>> {
        match self.iter.as_mut().and_then(Iterator::next) {
            Some(item) => item.map(Some),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.iter = None;
        self.source = None;
    }

    fn is_exhausted(&mut self) -> bool {
        self.iter.as_mut().is_some_and(|iter| iter.peek().is_none())
    }
}
