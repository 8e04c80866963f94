use std::{future::Future, time::Duration};

use {bunnydrop_config::RetryConfig, reqwest::StatusCode, tracing::warn};

use crate::error::TransferError;

/// Bounded exponential backoff around a whole fetch+upload attempt.
///
/// A streamed body cannot be replayed, so a retry always starts over from the fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): `initial * 2^(retry-1)`, capped.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    pub(crate) async fn run<T, F, Fut>(
        &self,
        filename: &str,
        mut attempt: F,
    ) -> Result<T, TransferError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptFailure>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut tries = 1;

        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(failure) if failure.retryable && tries < max_attempts => {
                    let wait = self.backoff(tries);
                    warn!(
                        filename,
                        attempt = tries,
                        max_attempts,
                        stage = %failure.error.stage(),
                        detail = failure.error.detail(),
                        wait_ms = wait.as_millis() as u64,
                        "transient transfer failure, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    tries += 1;
                },
                Err(failure) => return Err(failure.error),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// One failed attempt, tagged with whether trying again could help.
#[derive(Debug)]
pub(crate) struct AttemptFailure {
    pub error: TransferError,
    pub retryable: bool,
}

impl AttemptFailure {
    pub fn transient(error: TransferError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }

    pub fn permanent(error: TransferError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

/// 5xx, 408 and 429 are worth another attempt; every other status is final.
#[must_use]
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Connection failures and broken bodies are transient. Timeouts are not:
/// the deadline already covers the whole budget.
#[must_use]
pub fn is_retryable_transport(err: &reqwest::Error) -> bool {
    !err.is_timeout()
        && (err.is_connect() || err.is_request() || err.is_body() || err.is_decode())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::atomic::{AtomicU32, Ordering},
    };

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(10), Duration::from_millis(5_000));
    }

    #[test]
    fn status_classification() {
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = &AtomicU32::new(0);
        let result = fast(3)
            .run("clip.mp4", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AttemptFailure::transient(TransferError::fetch("HTTP 503")))
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast(3)
            .run("clip.mp4", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AttemptFailure::transient(TransferError::upload("HTTP 502")))
            })
            .await;
        assert_eq!(result, Err(TransferError::upload("HTTP 502")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast(5)
            .run("clip.mp4", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AttemptFailure::permanent(TransferError::fetch("HTTP 404")))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
