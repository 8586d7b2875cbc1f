use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::config::TimeoutsSection;

use super::error::{BrowserError, BrowserResult};
use super::metrics::ExtractionMetrics;
use super::retry::{RetryOutcome, RetryPolicy};
use super::session::{DrivenSession, Locator};
use super::wait::{wait_for_interactable, WaitPolicy};

/// Locates and activates elements, absorbing stale references with a bounded
/// number of whole-attempt retries.
#[derive(Debug, Clone)]
pub struct Actuator {
    wait: WaitPolicy,
    retry: RetryPolicy,
    metrics: Arc<Mutex<ExtractionMetrics>>,
}

impl Actuator {
    pub fn new(wait: WaitPolicy, retry: RetryPolicy) -> Self {
        Self {
            wait,
            retry,
            metrics: Arc::new(Mutex::new(ExtractionMetrics::default())),
        }
    }

    pub fn from_config(timeouts: &TimeoutsSection) -> Self {
        let wait = WaitPolicy::new(timeouts.element_wait(), timeouts.poll_interval());
        let retry = RetryPolicy::new(
            timeouts.actuator_attempts,
            Duration::from_millis(timeouts.stale_backoff_ms),
        )
        .with_jitter(Duration::from_millis(timeouts.stale_jitter_ms));
        Self::new(wait, retry)
    }

    pub fn with_metrics(mut self, metrics: Arc<Mutex<ExtractionMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.wait
    }

    pub fn attempts(&self) -> usize {
        self.retry.max_attempts()
    }

    pub async fn activate(
        &self,
        session: &dyn DrivenSession,
        locator: &Locator,
    ) -> BrowserResult<()> {
        self.activate_within(session, locator, self.wait.timeout).await
    }

    /// Like [`Actuator::activate`] with a per-attempt wait bound of `timeout`.
    pub async fn activate_within(
        &self,
        session: &dyn DrivenSession,
        locator: &Locator,
        timeout: Duration,
    ) -> BrowserResult<()> {
        let policy = self.wait.with_timeout(timeout);
        let label = locator.to_string();
        let result = self
            .retry
            .run(&label, BrowserError::is_stale, move |attempt| async move {
                let handle = wait_for_interactable(session, locator, policy).await?;
                debug!(locator = %locator, attempt = attempt + 1, "activating element");
                session.activate(&handle).await
            })
            .await;
        self.settle(result, locator, timeout)
    }

    /// Clears the input at `locator` and types `text`, with the same retry
    /// semantics as activation.
    pub async fn fill(
        &self,
        session: &dyn DrivenSession,
        locator: &Locator,
        text: &str,
    ) -> BrowserResult<()> {
        self.fill_within(session, locator, text, self.wait.timeout).await
    }

    pub async fn fill_within(
        &self,
        session: &dyn DrivenSession,
        locator: &Locator,
        text: &str,
        timeout: Duration,
    ) -> BrowserResult<()> {
        let policy = self.wait.with_timeout(timeout);
        let label = locator.to_string();
        let result = self
            .retry
            .run(&label, BrowserError::is_stale, move |_| async move {
                let handle = wait_for_interactable(session, locator, policy).await?;
                session.fill(&handle, text).await
            })
            .await;
        self.settle(result, locator, policy.timeout)
    }

    fn settle(
        &self,
        result: BrowserResult<RetryOutcome<()>>,
        locator: &Locator,
        timeout: Duration,
    ) -> BrowserResult<()> {
        let mut metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(outcome) => {
                metrics.record_activation();
                metrics.record_stale_retries((outcome.attempts - 1) as u64);
                Ok(())
            }
            Err(err) if err.is_stale() => {
                let attempts = self.retry.max_attempts();
                metrics.record_stale_retries(attempts as u64);
                Err(BrowserError::timeout(
                    format!("{locator} to stay attached (stale after {attempts} attempts)"),
                    timeout,
                ))
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_framework::{ScriptedSession, SessionAction};

    fn actuator(attempts: usize) -> Actuator {
        Actuator::new(
            WaitPolicy::new(Duration::from_secs(15), Duration::from_millis(250)),
            RetryPolicy::new(attempts, Duration::from_secs(1)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn absorbs_fewer_stale_conditions_than_attempts() {
        let button = Locator::css("button.apply");
        let session = ScriptedSession::new().with_stale_activations(&button, 2);
        let actuator = actuator(3);
        actuator.activate(&session, &button).await.unwrap();
        assert_eq!(session.activations_of(&button), 1);
        let metrics = actuator.metrics.lock().unwrap().clone();
        assert_eq!(metrics.stale_retries, 2);
        assert_eq!(metrics.activations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_attempts_reports_timeout_naming_locator() {
        let button = Locator::xpath("//button[@title='Aplicar']");
        let session = ScriptedSession::new().with_stale_activations(&button, 3);
        let err = actuator(3).activate(&session, &button).await.unwrap_err();
        match err {
            BrowserError::Timeout { operation, .. } => {
                assert!(operation.contains("xpath://button[@title='Aplicar']"));
                assert!(operation.contains("3 attempts"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.activations_of(&button), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_element_times_out_without_retrying() {
        let button = Locator::css("#missing");
        let session = ScriptedSession::new();
        let started = tokio::time::Instant::now();
        let err = actuator(3)
            .activate_within(&session, &button, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn fill_types_into_the_located_field() {
        let field = Locator::css("#password");
        let session = ScriptedSession::new().with_interactable(&field);
        actuator(3).fill(&session, &field, "secret").await.unwrap();
        assert_eq!(
            session.actions(),
            vec![SessionAction::Filled(field.clone(), "secret".into())]
        );
    }
}
