use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::browser::{Actuator, BrowserResult, DrivenSession};

use super::target::AreaLocators;

/// Opens a target's operational area through the two-level menu.
pub struct AreaNavigator<'a> {
    actuator: &'a Actuator,
    settle: Duration,
}

impl<'a> AreaNavigator<'a> {
    pub fn new(actuator: &'a Actuator, settle: Duration) -> Self {
        Self { actuator, settle }
    }

    pub async fn navigate(
        &self,
        session: &dyn DrivenSession,
        area: &AreaLocators,
    ) -> BrowserResult<()> {
        self.actuator.activate(session, &area.primary).await?;
        debug!(primary = %area.primary, "area menu opened");
        if !self.settle.is_zero() {
            sleep(self.settle).await;
        }
        self.actuator.activate(session, &area.secondary).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{Locator, RetryPolicy, WaitPolicy};
    use crate::test_framework::{ScriptedSession, SessionAction};

    fn actuator() -> Actuator {
        Actuator::new(
            WaitPolicy::new(Duration::from_secs(15), Duration::from_millis(250)),
            RetryPolicy::new(3, Duration::from_secs(1)),
        )
    }

    fn area() -> AreaLocators {
        AreaLocators {
            primary: Locator::xpath("//span[text()='Atividades']"),
            secondary: Locator::xpath("//span[text()='COI']"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn activates_primary_then_secondary() {
        let area = area();
        let session = ScriptedSession::new()
            .with_interactable(&area.primary)
            .reveal_after(&area.primary, 1, &area.secondary);
        let actuator = actuator();
        let started = tokio::time::Instant::now();
        AreaNavigator::new(&actuator, Duration::from_secs(3))
            .navigate(&session, &area)
            .await
            .unwrap();
        assert_eq!(
            session.actions(),
            vec![
                SessionAction::Activated(area.primary.clone()),
                SessionAction::Activated(area.secondary.clone()),
            ]
        );
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_secondary_entry_times_out() {
        let area = area();
        let session = ScriptedSession::new().with_interactable(&area.primary);
        let actuator = actuator();
        let err = AreaNavigator::new(&actuator, Duration::ZERO)
            .navigate(&session, &area)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("COI"));
    }
}
