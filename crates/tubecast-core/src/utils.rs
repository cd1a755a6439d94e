//! Utility functions shared by the relay crates.

use crate::config::{
    SUPERVISOR_INITIAL_BACKOFF_MS, SUPERVISOR_MAX_ATTEMPTS, SUPERVISOR_MAX_BACKOFF_MS,
};
use anyhow::Result;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;

/// Exponential backoff parameters for [`retry_with_backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Base of the exponential delay in milliseconds
    pub initial_ms: u64,
    /// Upper bound for a single delay
    pub max_delay_ms: u64,
    /// Number of retries after the first attempt
    pub max_retries: usize,
}

impl BackoffPolicy {
    /// Policy used to restart the bot session.
    #[must_use]
    pub const fn supervisor() -> Self {
        Self {
            initial_ms: SUPERVISOR_INITIAL_BACKOFF_MS,
            max_delay_ms: SUPERVISOR_MAX_BACKOFF_MS,
            max_retries: SUPERVISOR_MAX_ATTEMPTS,
        }
    }
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// Delays grow exponentially, are capped at `max_delay_ms` and jittered.
///
/// # Errors
///
/// Returns the last error once every retry has failed.
///
/// # Examples
///
/// ```no_run
/// use tubecast_core::utils::{retry_with_backoff, BackoffPolicy};
/// use anyhow::Result;
///
/// async fn connect() -> Result<()> {
///     Ok(())
/// }
///
/// # async fn example() -> Result<()> {
/// retry_with_backoff(BackoffPolicy::supervisor(), "session", || async {
///     connect().await
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T>(
    policy: BackoffPolicy,
    label: &str,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(policy.initial_ms)
        .max_delay(Duration::from_millis(policy.max_delay_ms))
        .map(jitter)
        .take(policy.max_retries);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "{} failed after {} retries: {:#}",
            label, policy.max_retries, e
        );
        e
    })
}

/// Keep `operation` running until it returns `Ok`.
///
/// Failures are retried under `policy`. A failure that comes after at least
/// `healthy_after` of runtime starts a new retry cycle with the full budget,
/// so only failures in quick succession exhaust it.
///
/// # Errors
///
/// Returns the last error once a retry cycle is exhausted.
pub async fn supervise<F, Fut>(
    policy: BackoffPolicy,
    healthy_after: Duration,
    label: &str,
    mut operation: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        let ended = retry_with_backoff(policy, label, || {
            let run = operation();
            async move {
                let started = Instant::now();
                match run.await {
                    Ok(()) => Ok(None),
                    Err(e) if started.elapsed() >= healthy_after => Ok(Some(e)),
                    Err(e) => Err(e),
                }
            }
        })
        .await?;

        match ended {
            None => return Ok(()),
            Some(e) => warn!(
                "{} failed after a healthy run, restarting with a fresh budget: {:#}",
                label, e
            ),
        }
    }
}
