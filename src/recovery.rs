//! Caller-side retry for stage exchanges.
//!
//! The drivers never retry on their own. A timed-out exchange left the link
//! usable, so repeating it is reasonable; a protocol error or failed homing
//! means the position reference is suspect and retrying would only hide it.
//! [`RetryPolicy::run`] therefore repeats only [`StageError::is_transient`]
//! failures.

use futures::future::BoxFuture;
use std::time::Duration;
use xystage_core::{StageError, StageResult};

/// How often and how patiently to repeat a failed exchange.
///
/// # Example
///
/// ```rust,ignore
/// use xystage::recovery::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// policy
///     .run(&mut stage, |stage| Box::pin(stage.go_to_position(1200, 800, true)))
///     .await?;
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one. Zero disables retrying.
    pub max_attempts: u32,
    /// Constant delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    /// Three retries, 100 ms apart.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            backoff_delay: Duration::ZERO,
        }
    }

    /// Run `op` against `target`, repeating it while it fails transiently.
    ///
    /// Returns the first success, the first non-transient error, or the last
    /// transient error once the attempts are used up.
    pub async fn run<C, T, F>(&self, target: &mut C, mut op: F) -> StageResult<T>
    where
        C: Send,
        F: for<'a> FnMut(&'a mut C) -> BoxFuture<'a, StageResult<T>>,
    {
        let mut retries = 0u32;
        loop {
            match op(target).await {
                Ok(value) => {
                    if retries > 0 {
                        tracing::info!(retries, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && retries < self.max_attempts => {
                    retries += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = retries,
                        max_attempts = self.max_attempts,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(self.backoff_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Whether a failure should trigger a fresh `find_home` before continuing.
pub fn needs_rehome(error: &StageError) -> bool {
    error.requires_rehome()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky {
        timeouts_left: u32,
        calls: u32,
    }

    impl Flaky {
        async fn poke(&mut self) -> StageResult<u32> {
            self.calls += 1;
            if self.timeouts_left > 0 {
                self.timeouts_left -= 1;
                return Err(StageError::timeout("poke", Duration::from_millis(1)));
            }
            Ok(self.calls)
        }
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let mut flaky = Flaky {
            timeouts_left: 2,
            calls: 0,
        };
        let result = fast(3).run(&mut flaky, |f| Box::pin(f.poke())).await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut flaky = Flaky {
            timeouts_left: 10,
            calls: 0,
        };
        let result = fast(2).run(&mut flaky, |f| Box::pin(f.poke())).await;
        assert!(matches!(result, Err(StageError::Timeout { .. })));
        assert_eq!(flaky.calls, 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_protocol_errors() {
        let mut calls = 0u32;
        let result: StageResult<()> = fast(5)
            .run(&mut calls, |calls| {
                Box::pin(async move {
                    *calls += 1;
                    Err(StageError::protocol("bad", "R"))
                })
            })
            .await;
        assert!(result.as_ref().is_err_and(needs_rehome));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_none_policy_runs_once() {
        let mut flaky = Flaky {
            timeouts_left: 1,
            calls: 0,
        };
        assert!(RetryPolicy::none()
            .run(&mut flaky, |f| Box::pin(f.poke()))
            .await
            .is_err());
        assert_eq!(flaky.calls, 1);
    }
}
