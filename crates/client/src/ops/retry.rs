//! Exponential backoff for transient failures.
//!
//! ### Schedule
//! - The first retry waits `base_delay`.
//! - Each later retry waits the previous delay times `backoff_factor`,
//!   capped at `max_delay`.
//! - With jitter on, every wait is inflated by a random 0-10%. The cap is
//!   applied before jitter, so a wait may exceed `max_delay` by that margin.
//!
//! Only errors whose [`ErrorKind`] is listed in the policy are retried; any
//! other error is returned after a single attempt. When the budget runs out
//! the last error is returned unchanged.

use std::future::Future;
use std::time::Duration;

use lazydb_core::config::RetrySettings;
use lazydb_core::{Error, ErrorKind};
use rand::Rng;

use super::Operation;

/// Largest random inflation applied to a wait.
const JITTER_RATIO: f64 = 0.1;

/// How often and how patiently to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    retries: usize,
    base_delay: Duration,
    backoff_factor: f64,
    max_delay: Duration,
    jitter: bool,
    retry_on: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            retries: settings.retries,
            base_delay: settings.base_delay(),
            backoff_factor: settings.backoff_factor,
            max_delay: settings.max_delay(),
            jitter: settings.jitter,
            retry_on: settings.retry_on.clone(),
        }
    }
}

impl RetryPolicy {
    /// 3 retries, 2s base delay doubling up to 60s, jitter on, retrying
    /// connectivity and busy errors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries after the first attempt; 0 means a single attempt.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the set of retryable error kinds.
    pub fn with_retry_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retry_on = kinds.into_iter().collect();
        self
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retry_on.contains(&kind)
    }

    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if the backoff factor is below 1 or
    /// not finite, or if the base delay exceeds the max delay.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(Error::InvalidArgument(format!(
                "backoff_factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::InvalidArgument(format!(
                "base_delay {:?} exceeds max_delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// Run `attempt` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// `name` only labels log lines.
    pub async fn run<T, F, Fut>(&self, name: &str, mut attempt: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        self.validate()?;
        let mut state = RetryState::new(self);

        loop {
            let err = match attempt().await {
                Ok(value) => {
                    if state.attempt() > 0 {
                        tracing::info!(operation = name, attempt = state.attempt() + 1, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !self.is_retryable(err.kind()) {
                tracing::debug!(operation = name, kind = %err.kind(), error = %err, "error is not retryable");
                return Err(err);
            }

            if !state.can_retry(self) {
                tracing::error!(
                    operation = name,
                    attempts = state.attempt() + 1,
                    error = %err,
                    "retry budget exhausted"
                );
                return Err(err);
            }

            let delay = state.advance(self);
            tracing::warn!(
                operation = name,
                attempt = state.attempt(),
                max_retries = self.retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Progress through one retry schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    attempt: usize,
    current_delay: Duration,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self { attempt: 0, current_delay: policy.base_delay.min(policy.max_delay) }
    }

    /// Retries taken so far.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        self.attempt < policy.retries
    }

    /// Take one retry: returns the wait before it and moves the schedule on.
    pub fn advance(&mut self, policy: &RetryPolicy) -> Duration {
        let wait = if policy.jitter { jittered(self.current_delay) } else { self.current_delay };
        self.attempt += 1;
        self.current_delay = scaled(self.current_delay, policy.backoff_factor).min(policy.max_delay);
        wait
    }
}

fn jittered(delay: Duration) -> Duration {
    let fraction = rand::thread_rng().gen_range(0.0..=JITTER_RATIO);
    delay.saturating_add(delay.mul_f64(fraction))
}

fn scaled(delay: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// An operation re-run under a [`RetryPolicy`].
pub struct Retrying<Op> {
    inner: Op,
    policy: RetryPolicy,
}

impl<Op> Retrying<Op> {
    pub fn new(inner: Op, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn into_inner(self) -> Op {
        self.inner
    }
}

#[async_trait::async_trait]
impl<Op> Operation for Retrying<Op>
where
    Op: Operation,
    Op::Input: Clone + Sync,
{
    type Input = Op::Input;
    type Output = Op::Output;

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, input: Self::Input) -> Result<Self::Output, Error> {
        let inner = &self.inner;
        let input = &input;
        self.policy
            .run(inner.name(), move || inner.call(input.clone()))
            .await
    }
}
