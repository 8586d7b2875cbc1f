mod auth;
mod capture;
mod navigator;
mod orchestrator;
mod target;
mod view;

pub use auth::{AuthState, LoginReport, LoginTimeouts, SessionAuthenticator};
pub use capture::{
    CaptureOutcome, CaptureSettings, DirEntry, DirectoryObserver, DownloadArtifact, ExportCapture,
    FsDirectory, InProgressMarkers,
};
pub use navigator::AreaNavigator;
pub use orchestrator::TargetOrchestrator;
pub use target::{AreaLocators, ExtractionOutcome, RunReport, Target, TargetKind, TargetReport};
pub use view::{ViewConfigurator, ViewPauses};
