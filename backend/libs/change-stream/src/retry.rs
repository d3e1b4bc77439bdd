/// Fixed-backoff retry used by the consumption loop
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::shutdown::ShutdownSignal;

/// Default wait between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Default number of commit attempts before the loop gives up.
pub const DEFAULT_COMMIT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts including the first one; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Wait between attempts
    pub backoff: Duration,
}

impl RetryConfig {
    pub fn unbounded(backoff: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }

    pub fn bounded(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            backoff,
        }
    }

    /// Handler policy: never give up on an event.
    pub fn handler_default() -> Self {
        Self::unbounded(DEFAULT_BACKOFF)
    }

    /// Commit policy: a few attempts, then surface the failure.
    pub fn commit_default() -> Self {
        Self::bounded(DEFAULT_COMMIT_ATTEMPTS, DEFAULT_BACKOFF)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Gave up after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: E },
    #[error("Cancelled while waiting to retry")]
    Cancelled,
}

/// Run `f` until it succeeds, the attempt budget is spent, or shutdown is
/// requested during a backoff wait.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    shutdown: &mut ShutdownSignal,
    operation: &str,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;

                if config.exhausted(attempt) {
                    warn!(
                        operation = operation,
                        attempts = attempt,
                        error = %e,
                        "Retry budget exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }

                warn!(
                    operation = operation,
                    attempt = attempt,
                    max_attempts = ?config.max_attempts,
                    backoff_ms = config.backoff.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(config.backoff) => {}
                    _ = shutdown.cancelled() => return Err(RetryError::Cancelled),
                }
            }
        }
    }
}
