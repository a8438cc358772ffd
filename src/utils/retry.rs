//! Retry utilities: backoff builders for broker reconnects.
//!
//! Uses `backon` for exponential backoff with jitter. Startup is never
//! retried; these only apply once a source is running.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Longest wait between reconnect attempts.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Backoff for broker reconnects after a running connection drops.
///
/// - Min delay: 100ms
/// - Max delay: 30s
/// - Jitter enabled
///
/// The iterator is finite; callers fall back to `MAX_RECONNECT_DELAY` once
/// it is exhausted.
pub fn reconnect_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(MAX_RECONNECT_DELAY)
        .with_max_times(16)
        .with_jitter()
}
