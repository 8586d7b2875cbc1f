use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::browser::{Actuator, BrowserResult, DrivenSession, Locator};
use crate::config::{TimeoutsSection, ViewSection};

use super::target::Target;

#[derive(Debug, Clone, Copy, Default)]
pub struct ViewPauses {
    pub after_list_view: Duration,
    pub after_filter_panel: Duration,
    pub after_hierarchical: Duration,
}

impl ViewPauses {
    pub fn from_config(timeouts: &TimeoutsSection) -> Self {
        Self {
            after_list_view: Duration::from_millis(timeouts.list_view_settle_ms),
            after_filter_panel: Duration::from_millis(timeouts.filter_panel_settle_ms),
            after_hierarchical: Duration::from_millis(timeouts.hierarchical_settle_ms),
        }
    }
}

/// Puts the area into list view and applies the target's filters.
pub struct ViewConfigurator<'a> {
    actuator: &'a Actuator,
    locators: &'a ViewSection,
    pauses: ViewPauses,
}

impl<'a> ViewConfigurator<'a> {
    pub fn new(actuator: &'a Actuator, locators: &'a ViewSection, pauses: ViewPauses) -> Self {
        Self {
            actuator,
            locators,
            pauses,
        }
    }

    pub async fn configure(
        &self,
        session: &dyn DrivenSession,
        target: &Target,
    ) -> BrowserResult<()> {
        self.step(session, &self.locators.list_view, self.pauses.after_list_view)
            .await?;
        self.step(session, &self.locators.filter_panel, self.pauses.after_filter_panel)
            .await?;
        if target.hierarchical_filter {
            self.step(
                session,
                &self.locators.hierarchical_toggle,
                self.pauses.after_hierarchical,
            )
            .await?;
        }
        self.actuator.activate(session, &self.locators.apply).await?;
        debug!(target = %target.name, kind = %target.kind, "filters applied");
        Ok(())
    }

    async fn step(
        &self,
        session: &dyn DrivenSession,
        locator: &Locator,
        pause: Duration,
    ) -> BrowserResult<()> {
        self.actuator.activate(session, locator).await?;
        if !pause.is_zero() {
            sleep(pause).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{RetryPolicy, WaitPolicy};
    use crate::extract::{AreaLocators, TargetKind};
    use crate::test_framework::{ScriptedSession, SessionAction};

    fn locators() -> ViewSection {
        ViewSection {
            list_view: Locator::css("button[title='Lista']"),
            filter_panel: Locator::css("button[title='Filtros']"),
            hierarchical_toggle: Locator::css("input#hierarquia"),
            apply: Locator::xpath("//button[text()='Aplicar']"),
        }
    }

    fn target(kind: TargetKind, hierarchical_filter: bool) -> Target {
        Target {
            name: kind.to_string(),
            kind,
            area: AreaLocators {
                primary: Locator::css("#menu"),
                secondary: Locator::css("#sub"),
            },
            hierarchical_filter,
            base_name: format!("prod_{kind}"),
        }
    }

    fn actuator() -> Actuator {
        Actuator::new(
            WaitPolicy::new(Duration::from_secs(15), Duration::from_millis(250)),
            RetryPolicy::new(3, Duration::from_secs(1)),
        )
    }

    fn view_page(locators: &ViewSection) -> ScriptedSession {
        ScriptedSession::new()
            .with_interactable(&locators.list_view)
            .with_interactable(&locators.filter_panel)
            .with_interactable(&locators.hierarchical_toggle)
            .with_interactable(&locators.apply)
    }

    #[tokio::test(start_paused = true)]
    async fn hierarchical_toggle_is_applied_when_target_requires_it() {
        let locators = locators();
        let session = view_page(&locators);
        let actuator = actuator();
        ViewConfigurator::new(&actuator, &locators, ViewPauses::default())
            .configure(&session, &target(TargetKind::Primary, true))
            .await
            .unwrap();
        assert_eq!(
            session.actions(),
            vec![
                SessionAction::Activated(locators.list_view.clone()),
                SessionAction::Activated(locators.filter_panel.clone()),
                SessionAction::Activated(locators.hierarchical_toggle.clone()),
                SessionAction::Activated(locators.apply.clone()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hierarchical_toggle_is_skipped_otherwise() {
        let locators = locators();
        let session = view_page(&locators);
        let actuator = actuator();
        let pauses = ViewPauses {
            after_list_view: Duration::from_secs(3),
            after_filter_panel: Duration::from_secs(2),
            after_hierarchical: Duration::from_secs(2),
        };
        let started = tokio::time::Instant::now();
        ViewConfigurator::new(&actuator, &locators, pauses)
            .configure(&session, &target(TargetKind::Secondary, false))
            .await
            .unwrap();
        assert_eq!(session.activations_of(&locators.hierarchical_toggle), 0);
        assert_eq!(session.activations_of(&locators.apply), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
