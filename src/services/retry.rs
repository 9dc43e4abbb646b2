//! Retry wrapper for exchange API calls
//!
//! One policy object lives on the REST client and every operation goes
//! through it. Only errors classified retryable by `ApiError` are retried;
//! backoff is linear in the attempt number.

use super::api_errors::ApiError;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Backoff is `attempt * base_delay`
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Execute an async closure with retry.
///
/// The closure should return `Result<T, ApiError>`. Retries only while
/// `ApiError::is_retryable()` holds and attempts remain.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempt += 1;

                if !err.is_retryable() || attempt >= config.max_attempts {
                    if attempt >= config.max_attempts && err.is_retryable() {
                        warn!(
                            "{} failed after {} attempts: {}",
                            operation_name, attempt, err
                        );
                    }
                    return Err(err);
                }

                let delay = config.base_delay * attempt;
                debug!(
                    "{} attempt {}/{} failed ({}), retrying in {:?}",
                    operation_name, attempt, config.max_attempts, err, delay
                );
                sleep(delay).await;
            }
        }
    }
}
