//! Retry policy for storage operations.
//!
//! Exponential backoff bounded by a wall-clock retry period. Only
//! [`StorageError::Transient`] failures are retried; waits can be abandoned
//! through a [`CancellationToken`].

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StorageError;

static DEFAULT_RETRY_PARAMS: OnceLock<RetryParams> = OnceLock::new();

/// Backoff parameters applied to a storage call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryParams {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on a single delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
    /// Total time after which a still-failing operation gives up.
    pub max_retry_period: Duration,
    /// Retries attempted even when the period has already elapsed.
    pub min_retries: u32,
    /// Optional hard cap on the number of retries.
    pub max_retries: Option<u32>,
    /// Deadline for a single attempt; exceeding it counts as a transient failure.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryParams {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            max_retry_period: Duration::from_secs(30),
            min_retries: 0,
            max_retries: None,
            attempt_timeout: None,
        }
    }
}

impl RetryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn with_max_retry_period(mut self, max_retry_period: Duration) -> Self {
        self.max_retry_period = max_retry_period;
        self
    }

    pub fn with_min_retries(mut self, min_retries: u32) -> Self {
        self.min_retries = min_retries;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = Some(attempt_timeout);
        self
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.initial_delay.is_zero() {
            return Err(config_error("initial_delay must be positive"));
        }
        if self.max_delay < self.initial_delay {
            return Err(config_error("max_delay must not be less than initial_delay"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 1.0 {
            return Err(config_error("backoff_factor must be a finite number > 1"));
        }
        if self.max_retry_period.is_zero() {
            return Err(config_error("max_retry_period must be positive"));
        }
        if let Some(max) = self.max_retries {
            if self.min_retries > max {
                return Err(config_error("min_retries must not exceed max_retries"));
            }
        }
        if self.attempt_timeout.is_some_and(|t| t.is_zero()) {
            return Err(config_error("attempt_timeout must be positive"));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (1-based):
    /// `initial_delay * backoff_factor^(retry - 1)`, capped at `max_delay`.
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    fn may_retry(&self, retries_done: u32, elapsed: Duration) -> bool {
        if self.max_retries.is_some_and(|max| retries_done >= max) {
            return false;
        }
        retries_done < self.min_retries || elapsed <= self.max_retry_period
    }
}

fn config_error(msg: &str) -> StorageError {
    StorageError::Configuration(msg.to_string())
}

/// Install the process-wide default retry parameters. Can be called once,
/// during start-up.
pub fn set_default_retry_params(params: RetryParams) -> Result<(), StorageError> {
    params.validate()?;
    DEFAULT_RETRY_PARAMS
        .set(params)
        .map_err(|_| config_error("default retry params are already set"))
}

/// The process-wide default, or the library defaults if none was installed.
pub fn default_retry_params() -> RetryParams {
    DEFAULT_RETRY_PARAMS.get().cloned().unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    params: RetryParams,
    cancel: Option<CancellationToken>,
}

impl RetryPolicy {
    pub fn new(params: RetryParams) -> Self {
        Self { params, cancel: None }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// budget runs out.
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let start = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            self.check_cancelled()?;
            attempts += 1;

            let result = match self.params.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(StorageError::Transient(format!(
                        "{} timed out after {:?}",
                        operation_name, limit
                    ))),
                },
                None => operation().await,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if err.is_permanent() {
                debug!(operation = operation_name, attempts, error = %err, "Non-retryable error");
                return Err(err);
            }

            let elapsed = start.elapsed();
            if !self.params.may_retry(attempts - 1, elapsed) {
                warn!(
                    operation = operation_name,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Err(StorageError::RetryBudgetExceeded {
                    attempts,
                    elapsed,
                    source: Box::new(err),
                });
            }

            let delay = self.params.delay(attempts);
            debug!(
                operation = operation_name,
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient error, backing off"
            );
            self.sleep(delay).await?;
        }
    }

    fn check_cancelled(&self) -> Result<(), StorageError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(StorageError::Cancelled),
            _ => Ok(()),
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), StorageError> {
        let Some(token) = &self.cancel else {
            tokio::time::sleep(delay).await;
            return Ok(());
        };
        tokio::select! {
            biased;

            () = token.cancelled() => Err(StorageError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn demo_params() -> RetryParams {
        RetryParams::new()
            .with_initial_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_factor(2.0)
            .with_max_retry_period(Duration::from_secs(15))
    }

    #[test]
    fn test_delay_sequence_capped() {
        let params = demo_params();
        assert_eq!(params.delay(1), Duration::from_millis(200));
        assert_eq!(params.delay(2), Duration::from_millis(400));
        assert_eq!(params.delay(3), Duration::from_millis(800));
        assert_eq!(params.delay(5), Duration::from_millis(3200));
        assert_eq!(params.delay(6), Duration::from_secs(5));
        assert_eq!(params.delay(500), Duration::from_secs(5));
    }

    #[test]
    fn test_validate() {
        assert!(RetryParams::default().validate().is_ok());
        assert!(demo_params().with_backoff_factor(1.1).validate().is_ok());
        assert!(demo_params().with_initial_delay(Duration::ZERO).validate().is_err());
        assert!(demo_params().with_max_delay(Duration::from_millis(10)).validate().is_err());
        assert!(demo_params().with_backoff_factor(1.0).validate().is_err());
        assert!(demo_params().with_backoff_factor(0.5).validate().is_err());
        assert!(demo_params().with_backoff_factor(f64::NAN).validate().is_err());
        assert!(demo_params().with_max_retry_period(Duration::ZERO).validate().is_err());
        assert!(demo_params().with_min_retries(5).with_max_retries(2).validate().is_err());
    }

    #[test]
    fn test_default_params_set_once() {
        let _ = set_default_retry_params(RetryParams::default());
        let err = set_default_retry_params(RetryParams::default()).unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
        assert_eq!(default_retry_params(), RetryParams::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_two_transient_failures() {
        let policy = RetryPolicy::new(demo_params());
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = policy
            .execute("stat", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StorageError::Transient("503".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(200 + 400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exceeded() {
        let policy = RetryPolicy::new(demo_params());
        let calls = Arc::new(AtomicU32::new(0));

        let err = policy
            .execute("list", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StorageError::Transient("timeout".into())) }
            })
            .await
            .unwrap_err();

        // waits: 0.2 0.4 0.8 1.6 3.2 5 5 -> 16.2s elapsed after the 8th attempt
        match err {
            StorageError::RetryBudgetExceeded { attempts, elapsed, source } => {
                assert_eq!(attempts, 8);
                assert!(elapsed > Duration::from_secs(15));
                assert!(source.is_transient());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let policy = RetryPolicy::new(demo_params());
        let calls = Arc::new(AtomicU32::new(0));

        let err = policy
            .execute("delete", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StorageError::NotFound("/bkt/x".into())) }
            })
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_retries_cap() {
        let policy = RetryPolicy::new(demo_params().with_max_retries(2));
        let calls = Arc::new(AtomicU32::new(0));

        let err = policy
            .execute("read", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StorageError::Transient("busy".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::RetryBudgetExceeded { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let policy = RetryPolicy::new(demo_params().with_attempt_timeout(Duration::from_secs(1)));
        let calls = Arc::new(AtomicU32::new(0));

        let result = policy
            .execute("write", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let params = demo_params().with_initial_delay(Duration::from_secs(5));
        let policy = RetryPolicy::new(params).with_cancellation(token.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let err = policy
            .execute("list", || {
                calls.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                async { Err::<(), _>(StorageError::Transient("busy".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let policy = RetryPolicy::new(demo_params()).with_cancellation(token);

        let err = policy
            .execute("stat", || async { Ok::<_, StorageError>(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
    }
}
