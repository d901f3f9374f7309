use feedsync_core::{CoreError, FeedApiError, RetryConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry strategy based on error type
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff
    Retry,
    /// Retry after a delay the server asked for
    RetryWithDelay(Duration),
    /// Don't retry (for permanent failures)
    NoRetry,
}

/// Determine retry strategy based on error type
pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    match error {
        CoreError::FeedApi(api_error) => match api_error {
            FeedApiError::RateLimitExceeded { retry_after } => {
                RetryStrategy::RetryWithDelay(Duration::from_secs(*retry_after))
            }
            FeedApiError::ServerError { .. } => RetryStrategy::Retry,
            FeedApiError::RequestTimeout { .. } => RetryStrategy::Retry,
            FeedApiError::Transport { .. } => RetryStrategy::Retry,
            // Credentials and response shape don't fix themselves
            FeedApiError::AuthenticationFailed { .. }
            | FeedApiError::InvalidToken
            | FeedApiError::RequestFailed { .. }
            | FeedApiError::InvalidResponse { .. }
            | FeedApiError::MissingField { .. }
            | FeedApiError::ProfileNotFound { .. }
            | FeedApiError::EmptyFeed => RetryStrategy::NoRetry,
        },
        CoreError::Network(reqwest_error) => {
            if reqwest_error.is_timeout() || reqwest_error.is_connect() {
                RetryStrategy::Retry
            } else {
                RetryStrategy::NoRetry
            }
        }
        CoreError::Timeout { .. } => RetryStrategy::Retry,
        _ => RetryStrategy::NoRetry,
    }
}

/// Calculate delay with exponential backoff and jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = Duration::from_millis(config.base_delay_ms);
    let max_delay = Duration::from_millis(config.max_delay_ms);

    let exponential_delay = if attempt == 0 {
        base_delay
    } else {
        let multiplier = config.backoff_multiplier.powi(attempt as i32);
        let delay_ms = (config.base_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay_ms.min(config.max_delay_ms))
    };

    let jitter_range = (exponential_delay.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = fastrand::u64(0..=jitter_range);
    let final_delay = exponential_delay + Duration::from_millis(jitter);

    final_delay.min(max_delay)
}

/// Retry counters, summed over every operation run through one executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryMetrics {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_operations: u64,
}

/// Retry executor that wraps operations with retry logic
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    metrics: Arc<Mutex<RetryMetrics>>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(Mutex::new(RetryMetrics::default())),
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    /// The error of the last attempt is returned unchanged.
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        operation: F,
    ) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let max_delay = Duration::from_millis(self.config.max_delay_ms);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                debug!("Retry attempt {} for {}", attempt, operation_name);
            }

            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        self.update_metrics(|m| {
                            m.total_retries += attempt as u64;
                            m.successful_retries += 1;
                        });
                        info!(
                            "Operation {} succeeded after {} retries",
                            operation_name, attempt
                        );
                    }
                    return Ok(result);
                }
                Err(error) => {
                    let has_attempts_left = attempt + 1 < max_attempts;
                    let delay = match get_retry_strategy(&error) {
                        RetryStrategy::Retry if has_attempts_left => {
                            calculate_delay(attempt, &self.config)
                        }
                        RetryStrategy::RetryWithDelay(delay) if has_attempts_left => {
                            delay.min(max_delay)
                        }
                        _ => {
                            self.update_metrics(|m| {
                                m.total_retries += attempt as u64;
                                m.failed_operations += 1;
                            });
                            debug!(
                                "Giving up on {} after {} attempt(s): {}",
                                operation_name,
                                attempt + 1,
                                error
                            );
                            return Err(error);
                        }
                    };

                    warn!(
                        "Attempt {}/{} for {} failed, retrying in {:?}: {}",
                        attempt + 1,
                        max_attempts,
                        operation_name,
                        delay,
                        error
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub fn get_metrics(&self) -> RetryMetrics {
        self.metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    fn update_metrics(&self, update: impl FnOnce(&mut RetryMetrics)) {
        if let Ok(mut metrics) = self.metrics.lock() {
            update(&mut metrics);
        }
    }
}
