//! Retry logic for transient object store failures.
//!
//! [`with_retry`] wraps an async operation with automatic retry on transient
//! errors (transport failures, timeouts). Non-transient errors such as
//! permission failures are returned immediately.
//!
//! # Backoff Strategy
//!
//! - Base delay doubles with each attempt: `initial_backoff * 2^attempt`
//! - Delay is capped at `max_backoff`
//! - Random jitter of 0-50% of the computed delay is added so that concurrent sagas compensating at
//!   the same moment do not retry in lockstep

use std::{future::Future, time::Duration};

use fail::fail_point;
use rand::Rng;

use crate::{config::RetryConfig, error::RosterResult, metrics::RosterMetrics};

/// Executes `operation` with automatic retry on transient errors.
///
/// Returns the result of the first successful call, or the last error once
/// `config.max_retries` retries have been spent. Only errors where
/// [`RosterError::is_transient`](crate::RosterError::is_transient) returns
/// `true` are retried.
#[tracing::instrument(skip(config, metrics, operation), fields(max_retries = config.max_retries))]
pub(crate) async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    metrics: &RosterMetrics,
    operation_name: &str,
    mut operation: F,
) -> RosterResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RosterResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt.saturating_add(1),
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            },
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                metrics.record_retry();
                let delay = compute_backoff(config, attempt);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt.saturating_add(1),
                    max_attempts = config.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient error, retrying after backoff",
                );
                fail_point!("retry-before-sleep");
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(err) => {
                if err.is_transient() {
                    metrics.record_retry_exhausted();
                    tracing::warn!(
                        operation = operation_name,
                        attempts = attempt.saturating_add(1),
                        error = %err,
                        "retries exhausted",
                    );
                }
                return Err(err);
            },
        }
    }
}

/// Computes the backoff before retry number `attempt + 1`.
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
