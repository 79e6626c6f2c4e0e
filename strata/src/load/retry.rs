//! Bounded exponential backoff for destination calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use strata_config::shared::RetryConfig;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::concurrency::ShutdownRx;
use crate::error::{ErrorKind, StrataResult};
use crate::strata_error;

/// Runs `operation` until it succeeds, fails non-transiently, or exhausts the
/// configured attempts.
///
/// Only transient destination errors are retried. Each attempt is bounded by
/// the configured per-call timeout; a call that exceeds it is aborted and
/// counts as a transient failure. The backoff between attempts doubles up to
/// the configured ceiling, with random jitter to keep concurrent table loads
/// from synchronizing their retries. When the attempt limit is reached the
/// last transient error is escalated to a fatal one.
///
/// Shutdown interrupts the backoff sleep and returns the last error as-is,
/// leaving the table safe to retry on resume.
pub async fn run_with_retry<F, Fut, T>(
    config: &RetryConfig,
    shutdown: &mut ShutdownRx,
    operation_name: &str,
    mut operation: F,
) -> StrataResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StrataResult<T>>,
{
    let attempt_timeout = Duration::from_millis(config.operation_timeout_ms);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let error = match timeout(attempt_timeout, operation()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => error,
            Err(_) => strata_error!(
                ErrorKind::DestinationTransient,
                "Destination call exceeded its timeout",
                format!(
                    "operation '{operation_name}', {}ms",
                    attempt_timeout.as_millis()
                )
            ),
        };

        if !error.is_transient() {
            return Err(error);
        }
        if attempt >= config.max_attempts {
            return Err(strata_error!(
                ErrorKind::DestinationFatal,
                "Transient failures exhausted the retry budget",
                format!("operation '{operation_name}', {attempt} attempts"),
                source: error
            ));
        }

        let backoff = backoff_with_jitter(config, attempt);
        warn!(
            operation = operation_name,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "transient destination failure, retrying"
        );
        tokio::select! {
            _ = sleep(backoff) => {}
            _ = shutdown.changed() => return Err(error),
        }
    }
}

fn backoff_with_jitter(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config
        .initial_backoff_ms
        .saturating_mul(1u64 << (attempt - 1).min(32))
        .min(config.max_backoff_ms);
    let jitter = rand::thread_rng().gen_range(0..=exp / 2);
    Duration::from_millis(exp + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bail;
    use crate::concurrency::create_shutdown_channel;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            operation_timeout_ms: 500,
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let (_tx, mut rx) = create_shutdown_channel();
        let attempts = AtomicU32::new(0);

        let result = run_with_retry(&fast_retry(5), &mut rx, "load", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                bail!(ErrorKind::DestinationTransient, "Throttled");
            }
            Ok(42)
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let (_tx, mut rx) = create_shutdown_channel();
        let attempts = AtomicU32::new(0);

        let err = run_with_retry(&fast_retry(5), &mut rx, "load", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            bail!(ErrorKind::DestinationFatal, "Permission denied");
            #[allow(unreachable_code)]
            Ok(())
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationFatal);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hung_calls_are_timed_out_and_retried() {
        let (_tx, mut rx) = create_shutdown_channel();
        let attempts = AtomicU32::new(0);
        let mut config = fast_retry(5);
        config.operation_timeout_ms = 5;

        let result = run_with_retry(&config, &mut rx, "load", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                sleep(Duration::from_secs(60)).await;
            }
            Ok(7)
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanently_hung_calls_exhaust_the_retry_budget() {
        let (_tx, mut rx) = create_shutdown_channel();
        let mut config = fast_retry(2);
        config.operation_timeout_ms = 5;

        let err = run_with_retry(&config, &mut rx, "load", || async {
            sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationFatal);
    }

    #[tokio::test]
    async fn exhausted_retries_escalate_to_fatal() {
        let (_tx, mut rx) = create_shutdown_channel();

        let err = run_with_retry(&fast_retry(3), &mut rx, "load", || async {
            bail!(ErrorKind::DestinationTransient, "Timed out");
            #[allow(unreachable_code)]
            Ok(())
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationFatal);
    }
}
