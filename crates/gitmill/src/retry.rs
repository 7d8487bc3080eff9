//! Backoff policies and the retry driver used across gitmill.
//!
//! Two shapes cover every caller. Broker reconnects back off exponentially
//! with jitter ([`RetryConfig`]). Claims, clone cleanup and short git
//! invocations (`rev-list --count`, `show --numstat`) get a handful of
//! evenly spaced attempts ([`fixed_backoff`]).

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder, ExponentialBuilder, Retryable};

pub const INITIAL_BACKOFF_MS: u64 = 500;
pub const MAX_BACKOFF_MS: u64 = 30_000;
pub const MAX_RETRIES: usize = 5;

/// Exponential backoff settings, e.g. for re-establishing a broker connection.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// First delay.
    pub min_delay: Duration,
    /// Cap for a single delay.
    pub max_delay: Duration,
    /// Retries after the first failure; zero means a single try.
    pub max_retries: usize,
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_retries: MAX_RETRIES,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);
        if self.with_jitter {
            backoff.with_jitter()
        } else {
            backoff
        }
    }
}

#[must_use]
pub fn default_backoff() -> ExponentialBuilder {
    RetryConfig::default().into_backoff()
}

/// Evenly spaced retries making `attempts` tries in total (at least one).
#[must_use]
pub fn fixed_backoff(delay: Duration, attempts: usize) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(delay)
        .with_max_times(attempts.saturating_sub(1))
}

/// Run `operation` until it succeeds, `backoff` runs out, or it fails with an
/// error `is_retryable` rejects.
///
/// Every retry is logged at debug level under `operation_name`.
///
/// ```ignore
/// let total = with_retry(
///     || git::count_commits(&workdir, &range),
///     fixed_backoff(Duration::from_millis(200), 3),
///     |_| true,
///     "rev-list --count",
/// )
/// .await?;
/// ```
pub async fn with_retry<T, E, F, Fut, B, W>(
    mut operation: F,
    backoff: B,
    is_retryable: W,
    operation_name: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    B: BackoffBuilder,
    W: FnMut(&E) -> bool,
{
    let attempt = AtomicU32::new(0);

    (|| {
        attempt.fetch_add(1, Ordering::Relaxed);
        operation()
    })
    .retry(backoff)
    .when(is_retryable)
    .notify(|err, wait| {
        tracing::debug!(
            operation = operation_name,
            attempt = attempt.load(Ordering::Relaxed),
            retry_in_ms = wait.as_millis() as u64,
            error = %err,
            "Retrying after failure"
        );
    })
    .await
}
