//! Core types and shared functionality for lazydb.
//!
//! This crate provides:
//! - Scoped SQLite connections and schema migrations
//! - Values, rows and queries
//! - Unified error types
//! - Configuration structures
//! - Cache key hashing

pub mod config;
pub mod db;
pub mod error;
pub mod hash;

pub use config::AppConfig;
pub use db::{ConnectionScope, Handle, Query, Row, Value};
pub use error::{Error, ErrorKind};

pub use tokio_rusqlite::rusqlite;
