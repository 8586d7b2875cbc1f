use std::time::Duration;

use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timeout after {bound:?} waiting for {operation}")]
    Timeout { operation: String, bound: Duration },
    #[error("stale element reference: {0}")]
    StaleReference(String),
    #[error("capture ambiguous after {bound:?}: {candidates:?}")]
    CaptureAmbiguity {
        candidates: Vec<String>,
        bound: Duration,
    },
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BrowserError {
    pub fn timeout(operation: impl Into<String>, bound: Duration) -> Self {
        BrowserError::Timeout {
            operation: operation.into(),
            bound,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, BrowserError::StaleReference(_))
    }

    /// Timeouts include capture ambiguity, which is a timeout with extra detail.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            BrowserError::Timeout { .. } | BrowserError::CaptureAmbiguity { .. }
        )
    }
}
