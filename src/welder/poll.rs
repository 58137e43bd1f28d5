//! Bounded, cancellable polling.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Timing for a polling loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay between probes that report progress.
    pub interval: Duration,
    /// Total time allowed before giving up.
    pub timeout: Duration,
    /// Upper bound for the delay after repeated transient failures.
    pub max_backoff: Duration,
}

impl PollPolicy {
    /// Creates a policy whose backoff ceiling is eight intervals.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            max_backoff: interval.saturating_mul(8),
        }
    }
}

/// Result of a single probe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Probe<T> {
    /// The condition holds.
    Ready(T),
    /// Not there yet; poll again after the interval.
    Pending,
    /// A retryable failure; poll again with backoff.
    Transient(String),
    /// An unrecoverable failure.
    Failed(String),
}

/// Final result of a polling loop.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollOutcome<T> {
    /// The condition held.
    Ready(T),
    /// The deadline passed first.
    TimedOut,
    /// The cancellation token fired.
    Cancelled,
    /// A probe reported an unrecoverable failure.
    Failed(String),
}

/// Runs `probe` until it is ready, fails, the deadline passes, or `cancel`
/// fires. Transient failures double the delay up to
/// [`PollPolicy::max_backoff`]; a pending probe resets it.
pub async fn poll_until<T, F, Fut>(
    policy: PollPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe<T>>,
{
    // A deadline past the clock's range never expires.
    let deadline = Instant::now().checked_add(policy.timeout);
    let mut delay = policy.interval;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return PollOutcome::Cancelled,
            result = probe() => result,
        };

        match result {
            Probe::Ready(value) => return PollOutcome::Ready(value),
            Probe::Failed(reason) => return PollOutcome::Failed(reason),
            Probe::Pending => delay = policy.interval,
            Probe::Transient(reason) => {
                tracing::debug!(%reason, backoff_ms = delay.as_millis(), "transient failure while polling");
                delay = delay.saturating_mul(2).min(policy.max_backoff);
            }
        }

        let now = Instant::now();
        if deadline.is_some_and(|limit| now >= limit) {
            return PollOutcome::TimedOut;
        }
        let pause = deadline.map_or(delay, |limit| {
            delay.min(limit.saturating_duration_since(now))
        });
        tokio::select! {
            biased;
            () = cancel.cancelled() => return PollOutcome::Cancelled,
            () = sleep(pause) => {}
        }
    }
}
