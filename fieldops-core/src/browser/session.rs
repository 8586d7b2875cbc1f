use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::BrowserResult;

/// Identifies one interactive element on the portal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Css(String),
    Xpath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Locator::Xpath(expression.into())
    }

    pub fn expression(&self) -> &str {
        match self {
            Locator::Css(value) | Locator::Xpath(value) => value,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "css:{selector}"),
            Locator::Xpath(expression) => write!(f, "xpath:{expression}"),
        }
    }
}

/// Session-scoped reference to a located element. Any later DOM mutation may
/// invalidate it, in which case using it yields `BrowserError::StaleReference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(u64);

impl ElementHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// What a single lookup of a locator observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Absent,
    /// Attached but hidden, disabled or zero-sized.
    Present,
    Interactable(ElementHandle),
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub url: Option<String>,
    pub title: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// Capabilities the extraction core needs from a driven browser tab.
#[async_trait(?Send)]
pub trait DrivenSession {
    async fn goto(&self, url: &str) -> BrowserResult<()>;
    async fn probe(&self, locator: &Locator) -> BrowserResult<Probe>;
    async fn activate(&self, element: &ElementHandle) -> BrowserResult<()>;
    /// Clears the field, then types `text` into it.
    async fn fill(&self, element: &ElementHandle, text: &str) -> BrowserResult<()>;
    async fn current_state(&self) -> BrowserResult<SessionSnapshot>;
    async fn screenshot(&self) -> BrowserResult<Vec<u8>>;
    async fn close(&self) -> BrowserResult<()>;
}

#[async_trait(?Send)]
pub trait SessionFactory {
    async fn create(&self) -> BrowserResult<Box<dyn DrivenSession>>;
}
