//! Scoped connection acquisition.
//!
//! A [`ConnectionScope`] opens one SQLite handle per entry and guarantees the
//! release sequence on exit:
//!
//! 1. commit when the guarded work succeeded, roll back when it failed
//! 2. close the handle, even when step 1 failed
//!
//! Retrying is never done here; compose a retry policy around the scope instead.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_rusqlite::Connection;

use super::handle::Handle;
use crate::Error;
use crate::config::AppConfig;

/// Default busy timeout, matching sqlite3's 30 second default.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How a scope treats the session it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeMode {
    /// Work runs inside a deferred transaction, committed or rolled back on exit.
    #[default]
    ReadWrite,
    /// Session is switched to `query_only`; nothing is committed.
    ReadOnly,
}

/// Lifetime counters shared by every clone of a scope.
#[derive(Debug, Default)]
pub struct ScopeMetrics {
    opened: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    closed: AtomicU64,
}

/// Point-in-time copy of [`ScopeMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopeCounts {
    pub opened: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub closed: u64,
}

impl ScopeMetrics {
    pub fn snapshot(&self) -> ScopeCounts {
        ScopeCounts {
            opened: self.opened.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }
}

/// Factory for scoped connections to one database file.
#[derive(Clone, Debug)]
pub struct ConnectionScope {
    path: PathBuf,
    timeout: Duration,
    mode: ScopeMode,
    metrics: Arc<ScopeMetrics>,
}

impl ConnectionScope {
    /// Scope over the database at `path`, read-write, 30s busy timeout.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
            mode: ScopeMode::ReadWrite,
            metrics: Arc::new(ScopeMetrics::default()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.db_path).with_timeout(config.timeout())
    }

    /// Busy timeout applied to every handle this scope opens.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_mode(mut self, mode: ScopeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Same target and counters, read-only sessions.
    pub fn read_only(&self) -> Self {
        self.clone().with_mode(ScopeMode::ReadOnly)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> ScopeMode {
        self.mode
    }

    pub fn metrics(&self) -> ScopeCounts {
        self.metrics.snapshot()
    }

    /// Open a handle and start the session.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connectivity` if the database cannot be opened. If the
    /// session setup fails afterwards the handle is closed before the error
    /// is returned.
    pub async fn enter(&self) -> Result<Scope, Error> {
        let target: Arc<str> = self.path.display().to_string().into();
        let conn = Connection::open(&self.path)
            .await
            .map_err(|e| Error::Connectivity(format!("failed to open {target}: {e}")))?;

        let timeout = self.timeout;
        let mode = self.mode;
        let setup = conn
            .call(move |conn| -> Result<(), Error> {
                conn.busy_timeout(timeout)?;
                match mode {
                    ScopeMode::ReadWrite => conn.execute_batch("BEGIN DEFERRED")?,
                    ScopeMode::ReadOnly => conn.execute_batch("PRAGMA query_only = ON")?,
                }
                Ok(())
            })
            .await
            .map_err(Error::from);

        if let Err(e) = setup {
            tracing::error!(target_db = %target, error = %e, "session setup failed");
            if let Err(close_err) = conn.close().await {
                tracing::warn!(target_db = %target, error = %close_err, "failed to close handle");
            }
            return Err(e);
        }

        self.metrics.opened.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target_db = %target, ?mode, "database connection opened");

        Ok(Scope { handle: Handle::new(conn, target), mode, metrics: Arc::clone(&self.metrics), exited: false })
    }

    /// Run `work` with a fresh handle and exit the scope with its outcome.
    pub async fn run<T, F, Fut>(&self, work: F) -> Result<T, Error>
    where
        F: FnOnce(Handle) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let scope = self.enter().await?;
        let outcome = work(scope.handle().clone()).await;
        scope.exit(outcome).await
    }
}

/// One entered scope owning one handle.
///
/// Must be finished with [`Scope::exit`]. A scope dropped without exiting logs
/// a warning; SQLite discards the open transaction when the handle goes away.
#[derive(Debug)]
pub struct Scope {
    handle: Handle,
    mode: ScopeMode,
    metrics: Arc<ScopeMetrics>,
    exited: bool,
}

impl Scope {
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Settle the transaction according to `outcome`, then close the handle.
    ///
    /// # Errors
    ///
    /// The outcome's own error is returned unchanged. A successful outcome is
    /// turned into an error only if the commit fails.
    pub async fn exit<T>(mut self, outcome: Result<T, Error>) -> Result<T, Error> {
        let settled = match (self.mode, &outcome) {
            (ScopeMode::ReadOnly, _) => Ok(()),
            (ScopeMode::ReadWrite, Ok(_)) => self.commit().await,
            (ScopeMode::ReadWrite, Err(cause)) => {
                self.rollback(cause).await;
                Ok(())
            }
        };

        self.close().await;

        match (outcome, settled) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(commit_err)) => Err(commit_err),
            (Err(e), _) => Err(e),
        }
    }

    async fn commit(&self) -> Result<(), Error> {
        let result = self
            .handle
            .call(|conn| -> Result<bool, Error> {
                // Work may have finished the transaction itself.
                if conn.is_autocommit() {
                    return Ok(false);
                }
                conn.execute_batch("COMMIT")?;
                Ok(true)
            })
            .await;

        match result {
            Ok(committed) => {
                self.metrics.committed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(target_db = %self.handle.target(), committed, "transaction committed");
                Ok(())
            }
            Err(e) => {
                tracing::error!(target_db = %self.handle.target(), error = %e, "commit failed");
                Err(e)
            }
        }
    }

    async fn rollback(&self, cause: &Error) {
        let result = self
            .handle
            .call(|conn| -> Result<(), Error> {
                if !conn.is_autocommit() {
                    conn.execute_batch("ROLLBACK")?;
                }
                Ok(())
            })
            .await;

        self.metrics.rolled_back.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(()) => {
                tracing::info!(target_db = %self.handle.target(), cause = %cause, "transaction rolled back");
            }
            Err(e) => {
                tracing::warn!(target_db = %self.handle.target(), cause = %cause, error = %e, "rollback failed");
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.handle.conn.clone().close().await {
            tracing::warn!(target_db = %self.handle.target(), error = %e, "failed to close handle");
        }
        self.exited = true;
        self.metrics.closed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target_db = %self.handle.target(), "database connection closed");
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if !self.exited {
            tracing::warn!(target_db = %self.handle.target(), "scope dropped without exit; open transaction discarded");
        }
    }
}
