use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::browser::{ExtractionMetrics, Locator};

use super::capture::DownloadArtifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Primary,
    Secondary,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TargetKind::Primary => "primary",
            TargetKind::Secondary => "secondary",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaLocators {
    pub primary: Locator,
    pub secondary: Locator,
}

/// One independently configured extraction workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub kind: TargetKind,
    pub area: AreaLocators,
    #[serde(default)]
    pub hierarchical_filter: bool,
    pub base_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    Success { artifact: DownloadArtifact },
    SkippedNoData,
    Failed { reason: String },
}

impl ExtractionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionOutcome::Success { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExtractionOutcome::Success { .. } => "success",
            ExtractionOutcome::SkippedNoData => "skipped_no_data",
            ExtractionOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: String,
    pub kind: TargetKind,
    pub outcome: ExtractionOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<TargetReport>,
    pub metrics: ExtractionMetrics,
}

impl RunReport {
    pub fn outcome_of(&self, target: &str) -> Option<&ExtractionOutcome> {
        self.outcomes
            .iter()
            .find(|report| report.target == target)
            .map(|report| &report.outcome)
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|report| report.outcome.is_success())
    }
}
