use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use crate::browser::{wait_for_presence, Actuator, BrowserError, BrowserResult, DrivenSession};
use crate::config::{Credentials, LoginSection, TimeoutsSection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    PrimaryAttempted,
    FallbackAttempted,
    Authenticated,
    Failed,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::PrimaryAttempted => "primary_attempted",
            AuthState::FallbackAttempted => "fallback_attempted",
            AuthState::Authenticated => "authenticated",
            AuthState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginReport {
    pub fallback_used: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct LoginTimeouts {
    pub field_wait: Duration,
    pub primary_marker: Duration,
    pub fallback_marker: Duration,
}

impl LoginTimeouts {
    pub fn from_config(timeouts: &TimeoutsSection) -> Self {
        Self {
            field_wait: Duration::from_secs(timeouts.field_wait_seconds),
            primary_marker: Duration::from_secs(timeouts.login_marker_seconds),
            fallback_marker: Duration::from_secs(timeouts.fallback_marker_seconds),
        }
    }
}

/// Logs into the portal with one primary attempt and at most one fallback
/// that overrides an existing session.
pub struct SessionAuthenticator<'a> {
    actuator: &'a Actuator,
    portal_url: &'a str,
    locators: &'a LoginSection,
    timeouts: LoginTimeouts,
    state: AuthState,
}

impl<'a> SessionAuthenticator<'a> {
    pub fn new(
        actuator: &'a Actuator,
        portal_url: &'a str,
        locators: &'a LoginSection,
        timeouts: LoginTimeouts,
    ) -> Self {
        Self {
            actuator,
            portal_url,
            locators,
            timeouts,
            state: AuthState::Unauthenticated,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub async fn login(
        &mut self,
        session: &dyn DrivenSession,
        credentials: &Credentials,
    ) -> BrowserResult<LoginReport> {
        if self.state != AuthState::Unauthenticated {
            return Err(BrowserError::Authentication(format!(
                "login already attempted (state {})",
                self.state
            )));
        }
        if let Err(err) = self.submit_form(session, credentials).await {
            self.transition(AuthState::Failed);
            return Err(BrowserError::Authentication(format!(
                "login form unavailable: {err}"
            )));
        }
        self.transition(AuthState::PrimaryAttempted);
        match self.await_marker(session, self.timeouts.primary_marker).await {
            Ok(()) => {
                self.transition(AuthState::Authenticated);
                return Ok(LoginReport {
                    fallback_used: false,
                });
            }
            Err(err) if err.is_timeout() => {
                warn!(error = %err, "primary login timed out, overriding existing session");
            }
            Err(err) => {
                self.transition(AuthState::Failed);
                return Err(err);
            }
        }

        match self.fallback(session, credentials).await {
            Ok(()) => {
                self.transition(AuthState::Authenticated);
                Ok(LoginReport {
                    fallback_used: true,
                })
            }
            Err(err) => {
                self.transition(AuthState::Failed);
                Err(BrowserError::Authentication(format!(
                    "fallback login failed: {err}"
                )))
            }
        }
    }

    /// Fills both fields and submits. Nothing here is recovered by the fallback.
    async fn submit_form(
        &self,
        session: &dyn DrivenSession,
        credentials: &Credentials,
    ) -> BrowserResult<()> {
        session.goto(self.portal_url).await?;
        let locators = self.locators;
        let field_wait = self.timeouts.field_wait;
        self.actuator
            .fill_within(session, &locators.username, &credentials.username, field_wait)
            .await?;
        self.actuator
            .fill_within(session, &locators.password, credentials.password(), field_wait)
            .await?;
        self.actuator.activate(session, &locators.submit).await
    }

    async fn fallback(
        &mut self,
        session: &dyn DrivenSession,
        credentials: &Credentials,
    ) -> BrowserResult<()> {
        self.transition(AuthState::FallbackAttempted);
        let locators = self.locators;
        let field_wait = self.timeouts.field_wait;
        self.actuator
            .fill_within(session, &locators.password, credentials.password(), field_wait)
            .await?;
        self.actuator.activate(session, &locators.skip_session).await?;
        self.actuator.activate(session, &locators.submit).await?;
        self.await_marker(session, self.timeouts.fallback_marker).await
    }

    async fn await_marker(
        &self,
        session: &dyn DrivenSession,
        timeout: Duration,
    ) -> BrowserResult<()> {
        let policy = self.actuator.wait_policy().with_timeout(timeout);
        wait_for_presence(session, &self.locators.success_marker, policy).await
    }

    fn transition(&mut self, next: AuthState) {
        info!(from = %self.state, to = %next, "login state");
        self.state = next;
    }
}
