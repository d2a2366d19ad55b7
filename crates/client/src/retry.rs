//! Timeouts and retries around collaborator round trips.
//!
//! Every asynchronous call the client makes to the metadata store is bounded
//! by [`with_timeout`]. Idempotent metadata reads additionally go through
//! [`with_retry`], which retries transient store failures.
//!
//! # Backoff Strategy
//!
//! Retries use exponential backoff with jitter:
//! - Base delay doubles with each attempt: `initial_backoff * 2^attempt`
//! - Delay is capped at `max_backoff`
//! - Random jitter of 0–50% of the computed delay is added
//!
//! Compare-and-swap writes are never retried here. A lost CAS is surfaced
//! to the caller as [`ClientError::VersionConflict`].

use std::{future::Future, time::Duration};

use fail::fail_point;
use ledgerkit_meta::{MetaError, MetaResult};
use rand::Rng;

use crate::{
    config::RetryConfig,
    error::{ClientError, ClientResult},
    metrics::Metrics,
};

/// Bounds `future` by `timeout`, reporting an elapsed deadline as
/// [`ClientError::Unexpected`].
pub(crate) async fn with_timeout<F, T, E>(
    timeout: Duration,
    operation_name: &str,
    future: F,
) -> ClientResult<T>
where
    F: Future<Output = Result<T, E>>,
    ClientError: From<E>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result.map_err(ClientError::from),
        Err(_elapsed) => {
            tracing::warn!(
                operation = operation_name,
                timeout_ms = timeout.as_millis() as u64,
                "operation timed out"
            );
            Err(ClientError::timeout(operation_name))
        },
    }
}

/// Executes the metadata read `operation` with a per-attempt timeout and
/// automatic retry on transient errors.
///
/// Each attempt is bounded by `timeout`; an elapsed attempt counts as a
/// transient [`MetaError::Timeout`]. Returns the first success, or the last
/// error once retries are exhausted.
#[tracing::instrument(
    skip(config, timeout, metrics, operation),
    fields(max_retries = config.max_retries)
)]
pub(crate) async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    timeout: Duration,
    metrics: &Metrics,
    operation_name: &str,
    mut operation: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MetaResult<T>>,
{
    let mut attempt = 0;
    loop {
        let result = tokio::time::timeout(timeout, operation())
            .await
            .unwrap_or_else(|_elapsed| Err(MetaError::timeout()));
        match result {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            },
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                metrics.record_retry();
                let delay = compute_backoff(config, attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient metadata error, retrying after backoff",
                );
                fail_point!("retry-before-sleep");
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(err) => return Err(err.into()),
        }
    }
}

/// Computes the backoff duration for the given attempt number.
///
/// `min(initial_backoff * 2^attempt, max_backoff) + random(0..50% of delay)`
fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(config.max_backoff);

    let jitter_range = capped.as_millis() as u64 / 2;
    if jitter_range > 0 {
        let jitter = rand::rng().random_range(0..=jitter_range);
        capped + Duration::from_millis(jitter)
    } else {
        capped
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use ledgerkit_meta::LedgerId;

    use super::*;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig::builder()
            .max_retries(max_retries)
            .initial_backoff(Duration::from_millis(1))
            .max_backoff(Duration::from_millis(4))
            .build()
    }

    #[test]
    fn test_compute_backoff_exponential() {
        let config = RetryConfig::builder()
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_secs(10))
            .build();

        let d0 = compute_backoff(&config, 0);
        assert!(d0 >= Duration::from_millis(100) && d0 <= Duration::from_millis(150));

        let d2 = compute_backoff(&config, 2);
        assert!(d2 >= Duration::from_millis(400) && d2 <= Duration::from_millis(600));
    }

    #[test]
    fn test_compute_backoff_capped_at_max() {
        let config = RetryConfig::builder()
            .initial_backoff(Duration::from_secs(1))
            .max_backoff(Duration::from_secs(5))
            .build();

        let d = compute_backoff(&config, 40);
        assert!(d >= Duration::from_secs(5) && d <= Duration::from_millis(7500));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let metrics = Metrics::new();
        let calls = AtomicU32::new(0);

        let result = with_retry(&fast_retry(3), Duration::from_secs(1), &metrics, "read", || {
            let attempt = calls.fetch_add(1, Ordering::Relaxed);
            async move { if attempt < 2 { Err(MetaError::connection("refused")) } else { Ok(7) } }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.snapshot().metadata_retries, 2);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let metrics = Metrics::new();
        let calls = AtomicU32::new(0);
        let id = LedgerId::try_from(9).unwrap();

        let result: ClientResult<()> =
            with_retry(&fast_retry(3), Duration::from_secs(1), &metrics, "read", || {
                calls.fetch_add(1, Ordering::Relaxed);
                async move { Err(MetaError::not_found(id)) }
            })
            .await;

        assert!(matches!(result, Err(ClientError::NoSuchLedger { .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_error() {
        let metrics = Metrics::new();
        let calls = AtomicU32::new(0);

        let result: ClientResult<()> =
            with_retry(&fast_retry(2), Duration::from_secs(1), &metrics, "read", || {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err(MetaError::connection("down")) }
            })
            .await;

        assert!(matches!(result, Err(ClientError::Unexpected { .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_times_out_and_is_retried() {
        let metrics = Metrics::new();
        let calls = AtomicU32::new(0);

        let result = with_retry(&fast_retry(1), Duration::from_millis(50), &metrics, "read", || {
            let attempt = calls.fetch_add(1, Ordering::Relaxed);
            async move {
                if attempt == 0 {
                    std::future::pending::<()>().await;
                }
                Ok::<_, MetaError>("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(metrics.snapshot().metadata_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_reports_unexpected() {
        let result: ClientResult<()> = with_timeout(
            Duration::from_millis(10),
            "create_ledger_metadata",
            std::future::pending::<MetaResult<()>>(),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), "unexpected");
        assert_eq!(err.to_string(), "unexpected error: create_ledger_metadata timed out");
    }
}
