//! Composable database operations.
//!
//! An [`Operation`] is a named async unit of work. Wrappers add behaviour
//! without touching the wrapped operation:
//!
//! - [`Logged`] traces each call, optionally with timing
//! - [`Retrying`] re-runs transient failures with exponential backoff
//! - [`Cached`] memoises successful results by call arguments
//!
//! Wrappers stack in any order through [`OperationExt`]. Placing the cache
//! outermost means a hit skips both retry and work.

pub mod cache;
pub mod log;
pub mod query;
pub mod retry;

use std::future::Future;
use std::marker::PhantomData;

use lazydb_core::Error;

pub use cache::{CacheStats, Cached, QueryCache};
pub use log::Logged;
pub use query::{ExecuteOperation, QueryOperation};
pub use retry::{RetryPolicy, RetryState, Retrying};

/// A named, reusable async unit of work.
#[async_trait::async_trait]
pub trait Operation: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Stable name used in logs and cache keys.
    fn name(&self) -> &str;

    async fn call(&self, input: Self::Input) -> Result<Self::Output, Error>;
}

/// Operation backed by an async closure.
pub struct FnOperation<F, I, O> {
    name: String,
    f: F,
    _io: PhantomData<fn(I) -> O>,
}

impl<F, I, O> FnOperation<F, I, O> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f, _io: PhantomData }
    }
}

/// Wrap an async closure as an [`Operation`].
pub fn from_fn<F, Fut, I, O>(name: impl Into<String>, f: F) -> FnOperation<F, I, O>
where
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, Error>> + Send + 'static,
{
    FnOperation::new(name, f)
}

#[async_trait::async_trait]
impl<F, Fut, I, O> Operation for FnOperation<F, I, O>
where
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, Error>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, input: I) -> Result<O, Error> {
        (self.f)(input).await
    }
}

/// Builder-style wrappers for every [`Operation`].
pub trait OperationExt: Operation + Sized {
    /// Trace every call; `verbose` adds elapsed time.
    fn logged(self, verbose: bool) -> Logged<Self> {
        Logged::new(self, verbose)
    }

    fn with_retry(self, policy: RetryPolicy) -> Retrying<Self> {
        Retrying::new(self, policy)
    }

    fn with_cache(self, cache: QueryCache<Self::Output>) -> Cached<Self> {
        Cached::new(self, cache)
    }
}

impl<T: Operation> OperationExt for T {}
