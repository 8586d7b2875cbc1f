use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionMetrics {
    pub activations: u64,
    pub stale_retries: u64,
    pub login_fallbacks: u64,
    pub targets_succeeded: u64,
    pub targets_skipped: u64,
    pub targets_failed: u64,
    pub bytes_captured: u64,
}

impl ExtractionMetrics {
    pub fn record_activation(&mut self) {
        self.activations = self.activations.saturating_add(1);
    }

    pub fn record_stale_retries(&mut self, count: u64) {
        self.stale_retries = self.stale_retries.saturating_add(count);
    }

    pub fn record_login_fallback(&mut self) {
        self.login_fallbacks = self.login_fallbacks.saturating_add(1);
    }

    pub fn record_success(&mut self, bytes: u64) {
        self.targets_succeeded = self.targets_succeeded.saturating_add(1);
        self.bytes_captured = self.bytes_captured.saturating_add(bytes);
    }

    pub fn record_skip(&mut self) {
        self.targets_skipped = self.targets_skipped.saturating_add(1);
    }

    pub fn record_failure(&mut self) {
        self.targets_failed = self.targets_failed.saturating_add(1);
    }
}
