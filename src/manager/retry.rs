//! Exponential-backoff retry layering.
//!
//! Wraps any manager: transient failures sleep `base * 2^attempt` plus
//! jitter and re-attempt, until the cumulative sleep would cross the
//! configured budget. The last failure then surfaces unrecovered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use crate::error::TransientError;
use crate::request::Request;
use crate::response::Response;

use super::RequestManager;

/// Retry policy parameters.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// First-retry delay; doubles each attempt.
    pub base_delay: Duration,
    /// Uniform random addition to each delay.
    pub jitter: Duration,
    /// Cumulative sleep budget across all retries of one request.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            jitter: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// A manager that retries transient failures with exponential backoff.
pub struct RetryManager {
    inner: Arc<dyn RequestManager>,
    config: RetryConfig,
}

impl RetryManager {
    pub fn new(inner: Arc<dyn RequestManager>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

/// Delay before the given retry attempt, without jitter.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    config.base_delay * 2u32.saturating_pow(attempt)
}

#[async_trait]
impl RequestManager for RetryManager {
    async fn fetch(
        &self,
        request: Arc<Request>,
        encoding: Option<&str>,
    ) -> Result<Response, TransientError> {
        let mut attempt = 0u32;
        let mut slept = Duration::ZERO;

        loop {
            match self.inner.fetch(Arc::clone(&request), encoding).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let jitter = if self.config.jitter.is_zero() {
                        Duration::ZERO
                    } else {
                        Duration::from_millis(
                            rand::rng().random_range(0..=self.config.jitter.as_millis() as u64),
                        )
                    };
                    let delay = backoff_delay(&self.config, attempt) + jitter;

                    if slept + delay > self.config.max_backoff {
                        warn!(
                            url = %err.url(),
                            attempts = attempt + 1,
                            "retry budget exhausted"
                        );
                        return Err(err);
                    }

                    warn!(
                        url = %err.url(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    slept += delay;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with 503 a fixed number of times, then succeeds.
    struct FlakyManager {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RequestManager for FlakyManager {
        async fn fetch(
            &self,
            request: Arc<Request>,
            _encoding: Option<&str>,
        ) -> Result<Response, TransientError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(TransientError::BadStatus {
                    status: 503,
                    expected: vec![200],
                    url: request.url.clone(),
                });
            }
            Ok(Response {
                status: 200,
                headers: BTreeMap::new(),
                body: Vec::new(),
                text: String::new(),
                final_url: request.url.clone(),
                request,
            })
        }
    }

    fn probe() -> Arc<Request> {
        Arc::new(
            Request::get("https://example.com/flaky")
                .continuation("parse")
                .build(),
        )
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            jitter: Duration::ZERO,
            max_backoff: Duration::from_secs(1),
        };
        assert_eq!(backoff_delay(&config, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let manager = RetryManager::new(
            Arc::new(FlakyManager {
                failures: 3,
                calls: AtomicUsize::new(0),
            }),
            RetryConfig {
                base_delay: Duration::from_millis(1),
                jitter: Duration::ZERO,
                max_backoff: Duration::from_millis(500),
            },
        );

        let response = manager.fetch(probe(), None).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_surfaces_failure() {
        let manager = RetryManager::new(
            Arc::new(FlakyManager {
                failures: usize::MAX,
                calls: AtomicUsize::new(0),
            }),
            RetryConfig {
                base_delay: Duration::from_millis(2),
                jitter: Duration::ZERO,
                max_backoff: Duration::from_millis(10),
            },
        );

        let err = manager.fetch(probe(), None).await.unwrap_err();
        assert!(matches!(err, TransientError::BadStatus { status: 503, .. }));
    }
}
