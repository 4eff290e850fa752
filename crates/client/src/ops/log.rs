//! Call tracing for operations.

use std::fmt::Debug;
use std::time::Instant;

use lazydb_core::Error;

use super::Operation;

/// Traces each call of the wrapped operation.
///
/// Every call logs the operation name and its input. In verbose mode the
/// outcome is logged too, with elapsed milliseconds and, when a counter is
/// set with [`Logged::with_count`], the size of the result.
pub struct Logged<Op: Operation> {
    inner: Op,
    verbose: bool,
    count: Option<fn(&Op::Output) -> usize>,
}

impl<Op: Operation> Logged<Op> {
    pub fn new(inner: Op, verbose: bool) -> Self {
        Self { inner, verbose, count: None }
    }

    /// Report `count(output)` as `results` on each successful verbose call.
    pub fn with_count(mut self, count: fn(&Op::Output) -> usize) -> Self {
        self.count = Some(count);
        self
    }

    fn result_size(&self, output: &Op::Output) -> Option<usize> {
        self.count.map(|count| count(output))
    }

    pub fn into_inner(self) -> Op {
        self.inner
    }
}

#[async_trait::async_trait]
impl<Op> Operation for Logged<Op>
where
    Op: Operation,
    Op::Input: Debug,
{
    type Input = Op::Input;
    type Output = Op::Output;

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, input: Self::Input) -> Result<Self::Output, Error> {
        let name = self.inner.name();
        tracing::info!(operation = name, input = ?input, "executing");

        if !self.verbose {
            return self.inner.call(input).await;
        }

        let start = Instant::now();
        let result = self.inner.call(input).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(output) => {
                let results = self.result_size(output);
                tracing::info!(operation = name, elapsed_ms, results, "completed");
            }
            Err(e) => tracing::warn!(operation = name, elapsed_ms, kind = %e.kind(), error = %e, "failed"),
        }
        result
    }
}
