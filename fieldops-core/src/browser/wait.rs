use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::trace;

use super::error::{BrowserError, BrowserResult};
use super::session::{DrivenSession, ElementHandle, Locator, Probe};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

/// Evaluates `predicate` until it yields a value or `policy.timeout` elapses.
///
/// The predicate is always evaluated at least once, and once more at the
/// deadline, so a condition that turns true exactly on the bound still counts.
/// Errors returned by the predicate abort the wait immediately.
pub async fn await_condition<T, F, Fut>(
    operation: &str,
    policy: WaitPolicy,
    mut predicate: F,
) -> BrowserResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BrowserResult<Option<T>>>,
{
    let started = Instant::now();
    let interval = policy.poll_interval.max(MIN_POLL_INTERVAL);
    let mut polls = 0usize;
    loop {
        polls += 1;
        if let Some(value) = predicate().await? {
            trace!(operation, polls, "condition satisfied");
            return Ok(value);
        }
        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            trace!(operation, polls, "condition timed out");
            return Err(BrowserError::timeout(operation, policy.timeout));
        }
        sleep(interval.min(policy.timeout - elapsed)).await;
    }
}

/// Waits until `locator` resolves to an element that can be activated.
pub async fn wait_for_interactable(
    session: &dyn DrivenSession,
    locator: &Locator,
    policy: WaitPolicy,
) -> BrowserResult<ElementHandle> {
    let operation = format!("{locator} to become interactable");
    await_condition(&operation, policy, move || async move {
        match session.probe(locator).await {
            Ok(Probe::Interactable(handle)) => Ok(Some(handle)),
            Ok(_) => Ok(None),
            Err(err) if err.is_stale() => Ok(None),
            Err(err) => Err(err),
        }
    })
    .await
}

/// Waits until `locator` is attached to the page, visible or not.
pub async fn wait_for_presence(
    session: &dyn DrivenSession,
    locator: &Locator,
    policy: WaitPolicy,
) -> BrowserResult<()> {
    let operation = format!("{locator} to be present");
    await_condition(&operation, policy, move || async move {
        match session.probe(locator).await {
            Ok(Probe::Absent) => Ok(None),
            Ok(_) => Ok(Some(())),
            Err(err) if err.is_stale() => Ok(None),
            Err(err) => Err(err),
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy(timeout_ms: u64, poll_ms: u64) -> WaitPolicy {
        WaitPolicy::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(poll_ms),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn returns_value_once_predicate_holds() {
        let calls = Cell::new(0u32);
        let started = Instant::now();
        let value = await_condition("third poll", policy(1_000, 100), || {
            calls.set(calls.get() + 1);
            let current = calls.get();
            async move { Ok((current >= 3).then_some(current)) }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_operation_and_bound() {
        let calls = Cell::new(0u32);
        let started = Instant::now();
        let err = await_condition::<(), _, _>("never", policy(1_000, 300), || {
            calls.set(calls.get() + 1);
            async { Ok(None) }
        })
        .await
        .unwrap_err();
        match err {
            BrowserError::Timeout { operation, bound } => {
                assert_eq!(operation, "never");
                assert_eq!(bound, Duration::from_secs(1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        // 0, 300, 600, 900 and the final check at the bound
        assert_eq!(calls.get(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_errors_abort_the_wait() {
        let err = await_condition::<(), _, _>("broken", policy(1_000, 100), || async {
            Err(BrowserError::Unexpected("boom".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, BrowserError::Unexpected(message) if message == "boom"));
    }
}
