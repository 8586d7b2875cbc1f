pub mod browser;
pub mod config;
pub mod error;
pub mod extract;
pub mod test_framework;

pub use browser::{BrowserError, BrowserLauncher, BrowserResult, ExtractionMetrics, Locator};
pub use config::{load_extractor_config, Credentials, ExtractorConfig};
pub use error::{ConfigError, Result};
pub use extract::{
    DownloadArtifact, ExtractionOutcome, RunReport, Target, TargetKind, TargetOrchestrator,
    TargetReport,
};
