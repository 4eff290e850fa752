//! Offset pagination.

use futures_util::stream::{self, BoxStream, StreamExt};
use lazydb_core::{ConnectionScope, Error, Query, Row};
use serde::Serialize;

/// One window of a paginated query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    /// Zero-based page number.
    pub index: u64,
    /// Rows skipped before this page.
    pub offset: u64,
    pub rows: Vec<Row>,
}

impl Page {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Lazily produced pages.
pub type PageStream = BoxStream<'static, Result<Page, Error>>;

/// Walks a query in `LIMIT/OFFSET` windows, one scope per page.
///
/// Concurrent writes between pages can shift rows across page boundaries;
/// the windows are not a snapshot.
#[derive(Clone, Debug)]
pub struct Paginator {
    scope: ConnectionScope,
    query: Query,
    page_size: u64,
}

impl Paginator {
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `page_size` is zero or the query
    /// has no SQL text.
    pub fn new(scope: ConnectionScope, query: Query, page_size: usize) -> Result<Self, Error> {
        if page_size == 0 {
            return Err(Error::InvalidArgument("page_size must be a positive integer".into()));
        }
        query.validate()?;
        Ok(Self { scope, query, page_size: page_size as u64 })
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Stream pages until the first empty one.
    ///
    /// A short page is still yielded; the next request then comes back empty
    /// and ends the stream.
    pub fn pages(self) -> PageStream {
        stream::try_unfold((self, 0u64), |(paginator, index)| paginator.next_page(index)).boxed()
    }

    async fn next_page(self, index: u64) -> Result<Option<(Page, (Self, u64))>, Error> {
        let offset = index * self.page_size;
        let rows = self.fetch(offset).await?;
        if rows.is_empty() {
            tracing::debug!(pages = index, "pagination finished");
            return Ok(None);
        }
        tracing::debug!(page = index, offset, rows = rows.len(), "page fetched");
        Ok(Some((Page { index, offset, rows }, (self, index + 1))))
    }

    /// Fetch the rows of a single window.
    pub async fn fetch(&self, offset: u64) -> Result<Vec<Row>, Error> {
        let window = self.query.windowed(self.page_size, offset);
        self.scope
            .run(|handle| async move { handle.query(&window).await })
            .await
    }
}

/// Fetch one page of `query` without building a stream.
///
/// # Errors
///
/// Same as [`Paginator::new`], plus any failure from the window query.
pub async fn fetch_page(scope: &ConnectionScope, query: &Query, page_size: usize, offset: u64) -> Result<Vec<Row>, Error> {
    Paginator::new(scope.clone(), query.clone(), page_size)?
        .fetch(offset)
        .await
}

/// Stream `query` page by page.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` if `page_size` is zero or the query has
/// no SQL text.
pub fn paginate(scope: ConnectionScope, query: Query, page_size: usize) -> Result<PageStream, Error> {
    Ok(Paginator::new(scope, query, page_size)?.pages())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use lazydb_core::Value;

    async fn seeded(n: usize) -> (tempfile::TempDir, ConnectionScope) {
        let dir = tempfile::tempdir().unwrap();
        let scope = ConnectionScope::new(dir.path().join("pages.db"));
        scope
            .run(move |h| async move {
                h.execute_script("CREATE TABLE items (id INTEGER PRIMARY KEY);").await?;
                let params = (1..=n).map(|i| vec![Value::from(i as i64)]).collect();
                h.execute_many("INSERT INTO items (id) VALUES (?1)", params).await
            })
            .await
            .unwrap();
        (dir, scope)
    }

    #[tokio::test]
    async fn test_pages_cover_result_set() {
        for (n, page_size) in [(0usize, 4usize), (3, 1), (8, 4), (9, 4), (2, 10)] {
            let (_dir, scope) = seeded(n).await;
            let before = scope.metrics();

            let pages: Vec<Page> = paginate(scope.clone(), Query::new("SELECT id FROM items ORDER BY id"), page_size)
                .unwrap()
                .try_collect()
                .await
                .unwrap();

            assert_eq!(pages.len(), n.div_ceil(page_size), "n={n} page_size={page_size}");
            assert!(pages.iter().all(|p| !p.is_empty() && p.len() <= page_size));
            let ids: Vec<i64> = pages
                .iter()
                .flat_map(|p| p.rows.iter())
                .map(|r| r.get("id").and_then(Value::as_i64).unwrap())
                .collect();
            assert_eq!(ids, (1..=n as i64).collect::<Vec<_>>());

            // One scope per page plus the terminating empty request.
            let after = scope.metrics();
            assert_eq!(after.opened - before.opened, pages.len() as u64 + 1);
            assert_eq!(after.closed - before.closed, pages.len() as u64 + 1);
        }
    }

    #[tokio::test]
    async fn test_page_offsets() {
        let (_dir, scope) = seeded(5).await;
        let pages: Vec<Page> = paginate(scope, Query::new("SELECT id FROM items ORDER BY id"), 2)
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let windows: Vec<(u64, u64)> = pages.iter().map(|p| (p.index, p.offset)).collect();
        assert_eq!(windows, vec![(0, 0), (1, 2), (2, 4)]);
    }

    #[tokio::test]
    async fn test_params_and_trailing_semicolon() {
        let (_dir, scope) = seeded(10).await;
        let rows = fetch_page(&scope, &Query::new("SELECT id FROM items WHERE id > ? ORDER BY id;").bind(4), 3, 3)
            .await
            .unwrap();
        let ids: Vec<i64> = rows.iter().filter_map(|r| r.get("id").and_then(Value::as_i64)).collect();
        assert_eq!(ids, vec![8, 9, 10]);
    }

    #[tokio::test]
    async fn test_trailing_line_comment() {
        let (_dir, scope) = seeded(3).await;
        let pages: Vec<Page> = paginate(scope, Query::new("SELECT id FROM items ORDER BY id -- every row"), 2)
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let sizes: Vec<usize> = pages.iter().map(Page::len).collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_zero_page_size_rejected() {
        let (_dir, scope) = seeded(1).await;
        let result = paginate(scope, Query::new("SELECT id FROM items"), 0);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_failing_window_ends_stream_with_error() {
        let (_dir, scope) = seeded(1).await;
        let result: Result<Vec<Page>, Error> = paginate(scope, Query::new("SELECT * FROM missing"), 5)
            .unwrap()
            .try_collect()
            .await;
        assert!(matches!(result, Err(Error::Query(_))));
    }
}
