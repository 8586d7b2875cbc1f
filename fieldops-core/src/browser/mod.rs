mod actuator;
mod automation;
mod error;
mod metrics;
mod retry;
mod session;
mod wait;

pub use actuator::Actuator;
pub use automation::{BrowserLauncher, ChromiumSession, LaunchOverrides};
pub use error::{BrowserError, BrowserResult};
pub use metrics::ExtractionMetrics;
pub use retry::{RetryOutcome, RetryPolicy};
pub use session::{
    DrivenSession, ElementHandle, Locator, Probe, SessionFactory, SessionSnapshot,
};
pub use wait::{await_condition, wait_for_interactable, wait_for_presence, WaitPolicy};
