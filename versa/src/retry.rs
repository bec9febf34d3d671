//! Bounded retry of fallible operations.
//!
//! A [`RetryPolicy`] re-runs an operation that failed with a retryable error
//! kind, sleeping between attempts. Typical use wraps a whole unit-of-work so
//! a version conflict starts over from fresh reads:
//!
//! ```rust,ignore
//! let policy = RetryPolicy::new()
//!     .with_max_attempts(5)
//!     .with_delay(Duration::from_millis(20))
//!     .retry_for([ErrorKind::Conflict]);
//!
//! policy.run(|| coordinator.execute(&TransactionConfig::requires_new(), None, |ctx| {
//!     let accounts = store.bind(ctx);
//!     let account = accounts.get(id)?;
//!     accounts.save(account.with_data(account.data().deposit(10)))
//! }))?;
//! ```

use crate::errors::{ErrorKind, VersaError, VersaResult};
use rand::Rng;
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Retry settings and the executor that applies them.
///
/// Defaults: 3 attempts, 1000 ms delay, every error kind retried, no jitter.
/// `no_retry_for` always wins over `retry_for`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RetryPolicy {
    name: Option<String>,
    max_attempts: u32,
    delay: Duration,
    jitter: Duration,
    retry_for: Option<HashSet<ErrorKind>>,
    no_retry_for: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            name: None,
            max_attempts: 3,
            delay: Duration::from_millis(1000),
            jitter: Duration::ZERO,
            retry_for: None,
            no_retry_for: HashSet::new(),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        RetryPolicy::default()
    }

    /// Label used in log lines.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Total number of attempts, including the first one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Upper bound of a random extra delay added to every sleep.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Restricts retries to these kinds. Without it every kind is retried.
    pub fn retry_for(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retry_for.get_or_insert_with(HashSet::new).extend(kinds);
        self
    }

    pub fn no_retry_for(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.no_retry_for.extend(kinds);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn validate(&self) -> VersaResult<()> {
        if self.max_attempts == 0 {
            return Err(VersaError::new(
                "Retry policy needs at least one attempt",
                ErrorKind::InvalidConfiguration,
            ));
        }
        Ok(())
    }

    pub fn is_retryable(&self, kind: &ErrorKind) -> bool {
        if self.no_retry_for.contains(kind) {
            return false;
        }
        match &self.retry_for {
            None => true,
            Some(kinds) => kinds.contains(kind),
        }
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable kind,
    /// or `max_attempts` is used up. The last error is returned unchanged.
    pub fn run<R, F>(&self, mut operation: F) -> VersaResult<R>
    where
        F: FnMut() -> VersaResult<R>,
    {
        self.validate()?;
        let label = self.name.as_deref().unwrap_or("operation");
        log::debug!(
            "{} configured for retry: max={}, delay={:?}, retry_for={:?}, no_retry_for={:?}",
            label,
            self.max_attempts,
            self.delay,
            self.retry_for,
            self.no_retry_for
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match operation() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if self.no_retry_for.contains(err.kind()) {
                log::debug!("Error kind '{}' is excluded from retry, not retrying", err.kind());
                return Err(err);
            }
            if !self.is_retryable(err.kind()) {
                log::debug!("Error kind '{}' is not retryable, not retrying", err.kind());
                return Err(err);
            }
            if attempt >= self.max_attempts {
                log::warn!("Max retries ({}) reached for {}", self.max_attempts, label);
                return Err(err);
            }

            log::info!(
                "Retry {}/{} for {} after error: {}",
                attempt,
                self.max_attempts,
                label,
                err
            );
            thread::sleep(self.next_delay());
        }
    }

    fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..=self.jitter);
        self.delay + jitter
    }
}
