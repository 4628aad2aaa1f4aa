//! Error isolation for fetch attempts
//!
//! [`ErrorHandler::try_action`] runs one attempt under a [`RetryPolicy`].
//! Transient store faults are retried after the policy's delay; anything
//! else is returned to the caller untouched. When the policy gives up, the
//! last fault is wrapped in [`Error::RetriesExhausted`], which is fatal.

use crate::cancel::CancellationToken;
use crate::logger::DaemonLogger;
use cadence_core::{Error, Result, RetryConfig};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether and when a failed attempt is retried
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Delay before retry number `retry` (0-based), or `None` to give up
    fn next_delay(&self, retry: u32, error: &Error) -> Option<Duration>;
}

/// Exponential backoff for transient faults
#[derive(Debug, Clone, Default)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Create a policy from retry settings
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, retry: u32, error: &Error) -> Option<Duration> {
        if !error.is_transient() || retry >= self.config.max_retries {
            return None;
        }
        Some(self.config.delay_for(retry))
    }
}

/// Never retries
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _retry: u32, _error: &Error) -> Option<Duration> {
        None
    }
}

/// Runs fetch attempts under a retry policy
#[derive(Clone)]
pub struct ErrorHandler {
    policy: Arc<dyn RetryPolicy>,
    logger: Arc<dyn DaemonLogger>,
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("policy", &self.policy)
            .finish()
    }
}

impl ErrorHandler {
    /// Create a handler reporting retries to `logger`
    pub fn new(policy: Arc<dyn RetryPolicy>, logger: Arc<dyn DaemonLogger>) -> Self {
        Self { policy, logger }
    }

    /// Run `action`, retrying transient failures
    ///
    /// Retry delays are cancellable through `token`. Non-transient errors
    /// and cancellation are returned as-is.
    pub async fn try_action<T, F, Fut>(
        &self,
        name: &str,
        token: &CancellationToken,
        mut action: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0u32;
        loop {
            let error = match action().await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_transient() => return Err(error),
                Err(error) => error,
            };

            match self.policy.next_delay(retry, &error) {
                Some(delay) => {
                    self.logger.retrying(name, retry + 1, delay, &error);
                    token.sleep(delay).await?;
                    retry += 1;
                }
                None => {
                    return Err(Error::RetriesExhausted {
                        attempts: retry + 1,
                        last: Box::new(error),
                    })
                }
            }
        }
    }
}
