//! Unified error types for lazydb.
//!
//! Every failure carries a stable code prefix in its display string and can be
//! classified into an [`ErrorKind`], which is what retry policies match on.

use serde::{Deserialize, Serialize};
use tokio_rusqlite::rusqlite::{self, ErrorCode};

/// Unified error type for lazydb.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A handle could not be opened or was lost.
    #[error("CONNECTIVITY_ERROR: {0}")]
    Connectivity(String),

    /// The database is locked by another connection.
    #[error("BUSY: {0}")]
    Busy(String),

    /// Malformed statement, constraint violation or other SQLite failure.
    #[error("QUERY_ERROR: {0}")]
    Query(rusqlite::Error),

    /// Bad batch/page size, missing query, or invalid settings.
    #[error("INVALID_ARGUMENT: {0}")]
    InvalidArgument(String),

    /// Migration failed to apply.
    #[error("MIGRATION_FAILED: {0}")]
    MigrationFailed(String),

    /// Arguments could not be encoded into a cache key.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),
}

/// Failure categories used to decide whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    Busy,
    Query,
    InvalidArgument,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Busy => "busy",
            ErrorKind::Query => "query",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connectivity(_) => ErrorKind::Connectivity,
            Error::Busy(_) => ErrorKind::Busy,
            Error::Query(_) => ErrorKind::Query,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::MigrationFailed(_) | Error::Serialization(_) => ErrorKind::Internal,
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Connectivity("connection closed".into()),
            tokio_rusqlite::Error::Close(_) => Error::Connectivity("failed to close connection".into()),
            _ => Error::Connectivity("connection closed".into()),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => Error::from(e),
            tokio_rusqlite::Error::ConnectionClosed => Error::Connectivity("connection closed".into()),
            tokio_rusqlite::Error::Close(_) => Error::Connectivity("failed to close connection".into()),
            _ => Error::Connectivity("connection closed".into()),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Error::Busy(err.to_string()),
            Some(ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::PermissionDenied) => {
                Error::Connectivity(err.to_string())
            }
            _ => Error::Query(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_rusqlite::rusqlite::ffi;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidArgument("batch_size must be positive".to_string());
        assert!(err.to_string().contains("INVALID_ARGUMENT"));
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_busy_failure_is_busy_kind() {
        let err = Error::from(rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None));
        assert_eq!(err.kind(), ErrorKind::Busy);
    }

    #[test]
    fn test_cannot_open_is_connectivity_kind() {
        let err = Error::from(rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_CANTOPEN), None));
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }

    #[test]
    fn test_other_sqlite_errors_are_query_kind() {
        let err = Error::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.kind(), ErrorKind::Query);

        let err = Error::from(rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_CONSTRAINT), None));
        assert_eq!(err.kind(), ErrorKind::Query);
    }

    #[test]
    fn test_connection_closed_is_connectivity() {
        let err = Error::from(tokio_rusqlite::Error::<Error>::ConnectionClosed);
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }

    #[test]
    fn test_inner_error_passes_through() {
        let err = Error::from(tokio_rusqlite::Error::Error(Error::Busy("locked".into())));
        assert!(matches!(err, Error::Busy(msg) if msg == "locked"));
    }

    #[test]
    fn test_error_kind_serde() {
        let kinds: Vec<ErrorKind> = serde_json::from_str(r#"["connectivity","busy"]"#).unwrap();
        assert_eq!(kinds, vec![ErrorKind::Connectivity, ErrorKind::Busy]);
        assert_eq!(ErrorKind::InvalidArgument.to_string(), "invalid_argument");
    }
}
