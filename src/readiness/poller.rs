//! Fixed-interval polling for asynchronous readiness.
//!
//! The platform's own controllers do the work we wait on (allocating ports,
//! generating secrets, starting pods), so readiness is observed by polling a
//! condition until it holds or the timeout elapses.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::PollError;

/// Shortest interval the poller will honour.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Polling cadence and bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Time between evaluations.
    pub interval: Duration,
    /// Total time to wait before giving up.
    pub timeout: Duration,
}

impl PollSettings {
    /// Creates poll settings.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Polls a condition until it yields a value.
///
/// The condition is evaluated once per `interval`, starting one interval
/// after the call. `Ok(Some(v))` ends polling with `v`; `Ok(None)` and
/// `Err(_)` both mean "not ready yet". The final sleep is shortened so the
/// last evaluation happens at the timeout, never after it.
///
/// # Errors
///
/// Returns [`PollError::Timeout`] carrying the most recent evaluation error
/// once the timeout has elapsed, or [`PollError::Cancelled`] as soon as the
/// token fires.
pub async fn poll_until_ready<T, E, F, Fut>(
    settings: PollSettings,
    cancel: &CancellationToken,
    mut condition: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Display,
{
    let interval = settings.interval.max(MIN_INTERVAL);
    let start = Instant::now();
    let deadline = start + settings.timeout;
    let mut last_error: Option<String> = None;
    let mut attempt: u32 = 0;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::Timeout {
                elapsed: now - start,
                last_error,
            });
        }

        let wait = interval.min(deadline - now);
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PollError::Cancelled),
            () = tokio::time::sleep(wait) => {}
        }

        attempt = attempt.saturating_add(1);
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PollError::Cancelled),
            outcome = condition() => outcome,
        };

        match outcome {
            Ok(Some(value)) => {
                debug!("Condition satisfied after {attempt} evaluation(s)");
                return Ok(value);
            }
            Ok(None) => {
                debug!("Evaluation {attempt}: not ready");
            }
            Err(e) => {
                debug!("Evaluation {attempt}: {e}");
                last_error = Some(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn settings(interval_ms: u64, timeout_ms: u64) -> PollSettings {
        PollSettings::new(Duration::from_millis(interval_ms), Duration::from_millis(timeout_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_n_evaluations() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = Arc::clone(&calls);
        let value = poll_until_ready(settings(100, 5_000), &CancellationToken::new(), move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= 4 { Ok::<_, String>(Some(n)) } else { Ok(None) }
            }
        })
        .await
        .expect("ready");

        let elapsed = start.elapsed();
        assert_eq!(value, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(elapsed >= Duration::from_millis(400));
        assert!(elapsed <= Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_not_before_deadline() {
        let start = Instant::now();

        let result = poll_until_ready(settings(100, 1_050), &CancellationToken::new(), || async {
            Ok::<Option<()>, String>(None)
        })
        .await;

        let elapsed = start.elapsed();
        assert!(matches!(result, Err(PollError::Timeout { last_error: None, .. })));
        assert!(elapsed >= Duration::from_millis(1_050));
        assert!(elapsed < Duration::from_millis(1_150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = poll_until_ready(settings(100, 350), &CancellationToken::new(), move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<Option<()>, String>(format!("secret not found ({n})"))
            }
        })
        .await;

        match result {
            Err(PollError::Timeout { last_error, .. }) => {
                assert_eq!(last_error.as_deref(), Some("secret not found (4)"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // Evaluations at 100, 200, 300 and the shortened final one at 350
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_not_fatal() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let value = poll_until_ready(settings(100, 2_000), &CancellationToken::new(), move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err("not yet".to_string()) } else { Ok(Some("30001")) }
            }
        })
        .await
        .expect("ready");

        assert_eq!(value, "30001");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_evaluations() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let counter = Arc::clone(&calls);
        let start = Instant::now();
        let result = poll_until_ready(settings(100, 60_000), &cancel, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<Option<()>, String>(None)
            }
        })
        .await;

        assert_eq!(result, Err(PollError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_longer_than_timeout() {
        let start = Instant::now();
        let result = poll_until_ready(settings(10_000, 500), &CancellationToken::new(), || async {
            Ok::<_, String>(Some(1))
        })
        .await;

        // The single evaluation happens at the deadline
        assert_eq!(result, Ok(1));
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(600));
    }
}
