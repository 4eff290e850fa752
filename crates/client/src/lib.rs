//! Client-side building blocks for lazydb.
//!
//! This crate provides:
//! - Lazy row and batch streams over scoped connections
//! - Offset pagination
//! - Concurrent execution of independent queries
//! - Composable operations with logging, retry and result caching

pub mod concurrent;
pub mod ops;
pub mod stream;

pub use concurrent::fetch_concurrently;
pub use ops::{
    CacheStats, Cached, ExecuteOperation, Logged, Operation, OperationExt, QueryCache, QueryOperation, RetryPolicy,
    RetryState, Retrying, from_fn,
};
pub use stream::{Batch, BatchStream, Page, PageStream, Paginator, RowStream, RowStreamer, fetch_page, paginate};
