//! SQLite access through scoped connections.
//!
//! This module provides:
//!
//! - [`ConnectionScope`]: open, commit-or-rollback, close on every exit path
//! - [`Handle`]: query/execute helpers running on the connection thread
//! - [`Value`], [`Row`], [`Query`]: what goes in and comes out
//! - Versioned schema migrations for the `user_data` table

mod handle;
pub mod migrations;
mod scope;
mod value;

pub use handle::Handle;
pub use scope::{ConnectionScope, Scope, ScopeCounts, ScopeMetrics, ScopeMode};
pub use value::{Query, Row, Value};

pub use handle::column_names;
