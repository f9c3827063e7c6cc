use std::future::Future;
use std::time::Duration;

use tokio_retry::RetryIf;
use tracing::{debug, error, warn};

use crate::config::HttpSettings;
use crate::error::AppError;

/// Retry configuration for different types of operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn from_http_settings(settings: &HttpSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.retry_base_delay_ms),
            ..Self::default()
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
        }
    }

    /// Delays between consecutive attempts: initial, 2x, 4x, ... capped.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let initial = self.initial_delay;
        let max_delay = self.max_delay;
        (0..self.max_retries).map(move |attempt| {
            let factor = 2u32.saturating_pow(attempt as u32);
            initial.saturating_mul(factor).min(max_delay)
        })
    }
}

/// Runs `operation`, retrying transient failures with exponential backoff.
///
/// Permanent errors (see `AppError::is_transient`) are returned at once.
pub async fn retry_with_backoff<F, Fut, T>(
    operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let result = RetryIf::spawn(config.delays(), operation, |e: &AppError| {
        if e.is_transient() {
            warn!("{} failed, retrying: {}", operation_name, e);
            true
        } else {
            false
        }
    })
    .await;

    match &result {
        Ok(_) => debug!("{} succeeded", operation_name),
        Err(e) => error!("{} failed: {}", operation_name, e),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(
            move || {
                let counter = counter_clone.clone();
                async move {
                    let count = counter.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err(AppError::NetworkError("connection reset".to_string()))
                    } else {
                        Ok("Success".to_string())
                    }
                }
            },
            &RetryConfig::immediate(3),
            "test_operation",
        )
        .await;

        assert_eq!(result.unwrap(), "Success");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), AppError> = retry_with_backoff(
            move || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::HttpStatus(400, "Invalid symbol".to_string()))
                }
            },
            &RetryConfig::immediate(3),
            "test_operation",
        )
        .await;

        assert!(matches!(result, Err(AppError::HttpStatus(400, _))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), AppError> = retry_with_backoff(
            move || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::HttpStatus(502, "Bad gateway".to_string()))
                }
            },
            &RetryConfig::immediate(2),
            "test_operation",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delays_double_and_cap() {
        let config = RetryConfig {
            max_retries: 4,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
        };
        let delays: Vec<Duration> = config.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(3000),
                Duration::from_millis(3000),
            ]
        );
    }
}
