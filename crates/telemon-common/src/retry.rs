//! Bounded retry with linear backoff.
//!
//! [`RetryExecutor`] is transport- and storage-agnostic: the caller supplies
//! the operation and a predicate that classifies its errors. Only errors the
//! predicate accepts are retried; everything else returns at once. Fallback
//! behaviour after exhaustion is left to the caller.

use std::future::Future;
use std::time::Duration;

/// Number of retries after the first attempt.
pub const MAX_RETRIES: u32 = 3;

/// Terminal outcome of [`RetryExecutor::run`].
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation kept failing with retryable errors until the retry
    /// budget ran out.
    #[error("retries exhausted after {retries} retries: {source}")]
    Exhausted {
        retries: u32,
        #[source]
        source: E,
    },

    /// The operation failed with an error the predicate refused to retry.
    #[error("attempt {attempt} failed: {source}")]
    Permanent {
        attempt: u32,
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    /// The error returned by the last attempt.
    pub fn source_ref(&self) -> &E {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Permanent { source, .. } => source,
        }
    }

    pub fn into_source(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Permanent { source, .. } => source,
        }
    }
}

/// Runs an async operation up to `1 + MAX_RETRIES` times, sleeping
/// `(2 * attempt + 1) * unit` between attempts.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use telemon_common::retry::RetryExecutor;
///
/// let retry = RetryExecutor::new(Duration::from_secs(1));
/// assert_eq!(retry.backoff(0), Duration::from_secs(1));
/// assert_eq!(retry.backoff(1), Duration::from_secs(3));
/// assert_eq!(retry.backoff(2), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    unit: Duration,
    max_retries: u32,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RetryExecutor {
    pub fn new(unit: Duration) -> Self {
        Self {
            unit,
            max_retries: MAX_RETRIES,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.unit * (2 * attempt + 1)
    }

    /// Invokes `op` until it succeeds, fails permanently, or the retry budget
    /// is spent. The sleep only suspends the calling task.
    ///
    /// # Errors
    ///
    /// [`RetryError::Permanent`] when `is_retryable` rejects an error,
    /// [`RetryError::Exhausted`] when the last allowed attempt fails.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if attempt >= self.max_retries {
                tracing::warn!(retries = attempt, error = %err, "Retries exhausted");
                return Err(RetryError::Exhausted {
                    retries: attempt,
                    source: err,
                });
            }
            if !is_retryable(&err) {
                return Err(RetryError::Permanent {
                    attempt,
                    source: err,
                });
            }

            let delay = self.backoff(attempt);
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
