//! Bounded retry with exponential backoff around destination calls.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bluesky::ClientError;
use crate::config::Config;

/// Why a retried operation did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum RetryError {
    /// The error was not retryable; returned after the first attempt.
    #[error(transparent)]
    Failed(ClientError),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ClientError },
    #[error("cancelled")]
    Cancelled,
}

impl RetryError {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Failed(e) if e.is_fatal())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The last destination error seen, if any.
    #[must_use]
    pub fn client_error(&self) -> Option<&ClientError> {
        match self {
            Self::Failed(e) | Self::Exhausted { last: e, .. } => Some(e),
            Self::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Extra bound on a single attempt, on top of the HTTP client's own timeout.
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Backoff starts at the inter-post interval and is capped by `MAX_BACKOFF_SECS`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: config.post_interval,
            max_delay: config.max_backoff,
            attempt_timeout: None,
        }
    }

    /// Delay before attempt `attempt + 1`, given the error from attempt `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &ClientError) -> Duration {
        if let Some(wait) = error.retry_after() {
            return wait;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts, or
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] describing the last failure.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        what: &str,
        op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        self.run_when(cancel, what, ClientError::is_retryable, op).await
    }

    /// Like [`run`](Self::run), but only errors accepted by `retryable` are
    /// tried again.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] describing the last failure.
    pub async fn run_when<T, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        what: &str,
        retryable: P,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
        P: Fn(&ClientError) -> bool,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            attempt += 1;

            let result = match self.attempt_timeout {
                Some(limit) => tokio::time::timeout(limit, op())
                    .await
                    .unwrap_or(Err(ClientError::Timeout)),
                None => op().await,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => return Err(RetryError::Failed(e)),
                Err(e) => e,
            };

            if attempt >= self.max_attempts {
                warn!(what, attempts = attempt, error = %error, "Giving up");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.delay_for(attempt, &error);
            warn!(what, attempt, delay_secs = delay.as_secs_f64(), error = %error, "Retrying");

            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(what, "Cancelled during backoff");
                    return Err(RetryError::Cancelled);
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
