//! Lazy row streaming over a scoped connection.
//!
//! ### Row Streamer
//! - Issues the query once inside its own [`ConnectionScope`] entry.
//! - Pulls rows from the cursor a chunk at a time and hands each chunk over a
//!   channel of capacity one, so at most two chunks are alive at any moment.
//! - The stream ends on the first empty fetch; the scope then exits (commit, close).
//! - Nothing runs until the stream is first polled.
//!
//! ### Paginator
//! - See [`paginate()`]: one scope per page, `LIMIT/OFFSET` windows, stops on the
//!   first empty page.

pub mod paginate;

pub use paginate::{Page, PageStream, Paginator, fetch_page, paginate};

use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use lazydb_core::db::column_names;
use lazydb_core::{AppConfig, ConnectionScope, Error, Query, Row, rusqlite};
use tokio::sync::mpsc;

/// Rows per cursor step for single-row streams (default: 100).
const DEFAULT_FETCH_SIZE: usize = 100;

/// Upper bound on pre-allocated batch capacity.
const MAX_PREALLOCATED_ROWS: usize = 1024;

/// A non-empty group of rows fetched together.
pub type Batch = Vec<Row>;

/// Lazily produced rows.
pub type RowStream = BoxStream<'static, Result<Row, Error>>;

/// Lazily produced batches.
pub type BatchStream = BoxStream<'static, Result<Batch, Error>>;

/// Streams query results without materialising the whole result set.
#[derive(Clone, Debug)]
pub struct RowStreamer {
    scope: ConnectionScope,
    fetch_size: usize,
}

impl RowStreamer {
    /// Create a streamer that opens connections through `scope`.
    pub fn new(scope: ConnectionScope) -> Self {
        Self { scope, fetch_size: DEFAULT_FETCH_SIZE }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(ConnectionScope::from_config(config)).with_fetch_size(config.fetch_size)
    }

    /// Rows pulled per cursor step by [`RowStreamer::stream`]; zero is treated as one.
    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    pub fn scope(&self) -> &ConnectionScope {
        &self.scope
    }

    /// Stream rows one at a time.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if the query has no SQL text. Failures
    /// while running the query arrive as the last item of the stream.
    pub fn stream(&self, query: Query) -> Result<RowStream, Error> {
        query.validate()?;
        let rows = produce(self.scope.clone(), query, self.fetch_size)
            .map_ok(|batch| stream::iter(batch.into_iter().map(Ok::<Row, Error>)))
            .try_flatten();
        Ok(rows.boxed())
    }

    /// Stream rows in batches of at most `batch_size`.
    ///
    /// Every batch is non-empty; only the last one may be short.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `batch_size` is zero or the query
    /// has no SQL text.
    pub fn stream_batches(&self, query: Query, batch_size: usize) -> Result<BatchStream, Error> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument("batch_size must be a positive integer".into()));
        }
        query.validate()?;
        Ok(produce(self.scope.clone(), query, batch_size))
    }
}

/// Producer lifecycle: nothing is spawned until the first poll.
enum Producer {
    Idle { scope: ConnectionScope, query: Query, chunk: usize },
    Running(mpsc::Receiver<Result<Batch, Error>>),
}

fn produce(scope: ConnectionScope, query: Query, chunk: usize) -> BatchStream {
    stream::unfold(Producer::Idle { scope, query, chunk }, |state| async move {
        let mut rx = match state {
            Producer::Idle { scope, query, chunk } => spawn_cursor(scope, query, chunk),
            Producer::Running(rx) => rx,
        };
        rx.recv().await.map(|item| (item, Producer::Running(rx)))
    })
    .boxed()
}

#[derive(Debug, Default)]
struct DrainSummary {
    rows: usize,
    batches: usize,
    stopped_early: bool,
}

fn spawn_cursor(scope: ConnectionScope, query: Query, chunk: usize) -> mpsc::Receiver<Result<Batch, Error>> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let sql = query.sql.clone();
        let cursor_tx = tx.clone();
        tracing::debug!(sql = %sql, chunk, "stream started");

        let result = scope
            .run(move |handle| async move { handle.call(move |conn| drain(conn, &query, chunk, &cursor_tx)).await })
            .await;

        match result {
            Ok(summary) => tracing::debug!(
                sql = %sql,
                rows = summary.rows,
                batches = summary.batches,
                stopped_early = summary.stopped_early,
                "stream finished"
            ),
            Err(e) => {
                tracing::warn!(sql = %sql, error = %e, "stream failed");
                // Receiver may already be gone; nobody is left to tell.
                let _ = tx.send(Err(e)).await;
            }
        }
    });

    rx
}

/// Walk the cursor on the connection thread, sending one batch per step.
///
/// Rows already read when a step fails are sent before the error is returned.
fn drain(
    conn: &rusqlite::Connection, query: &Query, chunk: usize, tx: &mpsc::Sender<Result<Batch, Error>>,
) -> Result<DrainSummary, Error> {
    let mut stmt = conn.prepare(&query.sql)?;
    let columns = column_names(&stmt);
    let mut rows = stmt.query(rusqlite::params_from_iter(query.params.iter()))?;

    let mut summary = DrainSummary::default();
    loop {
        let mut batch = Vec::with_capacity(chunk.min(MAX_PREALLOCATED_ROWS));
        while batch.len() < chunk {
            let step = rows
                .next()
                .and_then(|next| next.map(|row| Row::from_sqlite(row, &columns)).transpose());
            match step {
                Ok(Some(row)) => batch.push(row),
                Ok(None) => break,
                Err(e) => {
                    if !batch.is_empty() {
                        let _ = tx.blocking_send(Ok(batch));
                    }
                    return Err(e.into());
                }
            }
        }

        if batch.is_empty() {
            break;
        }

        summary.rows += batch.len();
        summary.batches += 1;
        if tx.blocking_send(Ok(batch)).is_err() {
            summary.stopped_early = true;
            break;
        }
    }

    Ok(summary)
}
