use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::browser::{
    Actuator, BrowserError, BrowserResult, DrivenSession, ExtractionMetrics, Locator,
    SessionFactory,
};
use crate::config::{Credentials, ExtractorConfig};

use super::auth::{LoginTimeouts, SessionAuthenticator};
use super::capture::{
    CaptureOutcome, CaptureSettings, DirectoryObserver, ExportCapture, FsDirectory,
};
use super::navigator::AreaNavigator;
use super::target::{ExtractionOutcome, RunReport, Target, TargetReport};
use super::view::{ViewConfigurator, ViewPauses};

/// Runs the ordered targets over one authenticated session.
pub struct TargetOrchestrator {
    config: ExtractorConfig,
    actuator: Actuator,
    metrics: Arc<Mutex<ExtractionMetrics>>,
    observer: Box<dyn DirectoryObserver>,
}

impl TargetOrchestrator {
    pub fn new(config: ExtractorConfig) -> Self {
        let metrics = Arc::new(Mutex::new(ExtractionMetrics::default()));
        let actuator = Actuator::from_config(&config.timeouts).with_metrics(Arc::clone(&metrics));
        Self {
            config,
            actuator,
            metrics,
            observer: Box::new(FsDirectory),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn DirectoryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn metrics(&self) -> ExtractionMetrics {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns `Err` only when no session could be launched or authenticated;
    /// per-target problems are reported as [`ExtractionOutcome::Failed`].
    pub async fn run(
        &self,
        targets: &[Target],
        factory: &dyn SessionFactory,
        credentials: &Credentials,
    ) -> BrowserResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, targets = targets.len(), "extraction run started");

        let session = factory.create().await?;
        let result = self.drive(session.as_ref(), targets, credentials).await;
        if let Err(err) = &result {
            error!(%run_id, error = %err, "extraction run aborted");
            self.capture_diagnostics(session.as_ref()).await;
        }
        if let Err(err) = session.close().await {
            warn!(%run_id, error = %err, "failed to close browser session");
        }

        let outcomes = result?;
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            metrics: self.metrics(),
        };
        info!(
            %run_id,
            succeeded = report.metrics.targets_succeeded,
            skipped = report.metrics.targets_skipped,
            failed = report.metrics.targets_failed,
            "extraction run finished"
        );
        Ok(report)
    }

    async fn drive(
        &self,
        session: &dyn DrivenSession,
        targets: &[Target],
        credentials: &Credentials,
    ) -> BrowserResult<Vec<TargetReport>> {
        let mut authenticator = SessionAuthenticator::new(
            &self.actuator,
            &self.config.portal.url,
            &self.config.login,
            LoginTimeouts::from_config(&self.config.timeouts),
        );
        let login = authenticator.login(session, credentials).await?;
        if login.fallback_used {
            self.record(ExtractionMetrics::record_login_fallback);
        }

        let mut reports = Vec::with_capacity(targets.len());
        for target in targets {
            let outcome = match self.process_target(session, target).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(target = %target.name, error = %err, "target failed");
                    ExtractionOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
            };
            match &outcome {
                ExtractionOutcome::Success { artifact } => {
                    let size = artifact.size;
                    self.record(move |metrics| metrics.record_success(size));
                }
                ExtractionOutcome::SkippedNoData => self.record(ExtractionMetrics::record_skip),
                ExtractionOutcome::Failed { .. } => self.record(ExtractionMetrics::record_failure),
            }
            info!(target = %target.name, outcome = outcome.label(), "target finished");
            reports.push(TargetReport {
                target: target.name.clone(),
                kind: target.kind,
                outcome,
            });
        }
        Ok(reports)
    }

    async fn process_target(
        &self,
        session: &dyn DrivenSession,
        target: &Target,
    ) -> BrowserResult<ExtractionOutcome> {
        info!(target = %target.name, kind = %target.kind, "processing target");
        let timeouts = &self.config.timeouts;
        AreaNavigator::new(&self.actuator, Duration::from_millis(timeouts.area_settle_ms))
            .navigate(session, &target.area)
            .await?;
        ViewConfigurator::new(&self.actuator, &self.config.view, ViewPauses::from_config(timeouts))
            .configure(session, target)
            .await?;

        let capture = ExportCapture::new(
            &self.actuator,
            self.observer.as_ref(),
            CaptureSettings::from_config(&self.config),
        );
        let trigger: &[Locator] = &self.config.export.trigger;
        let outcome = capture
            .export_and_capture(session, trigger, &self.config.download_dir(), &target.base_name)
            .await?;
        Ok(match outcome {
            CaptureOutcome::Captured(artifact) => ExtractionOutcome::Success { artifact },
            CaptureOutcome::NoData => ExtractionOutcome::SkippedNoData,
        })
    }

    fn record(&self, update: impl FnOnce(&mut ExtractionMetrics)) {
        let mut metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }

    async fn capture_diagnostics(&self, session: &dyn DrivenSession) {
        let dir = self.config.diagnostics_dir();
        match write_diagnostics(session, &dir).await {
            Ok(path) => info!(path = %path.display(), "diagnostic screenshot saved"),
            Err(err) => warn!(dir = %dir.display(), error = %err, "could not save diagnostics"),
        }
    }
}

async fn write_diagnostics(session: &dyn DrivenSession, dir: &Path) -> BrowserResult<PathBuf> {
    fs::create_dir_all(dir).await?;
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    match session.current_state().await {
        Ok(snapshot) => {
            let json = serde_json::to_vec_pretty(&snapshot)
                .map_err(|err| BrowserError::Unexpected(err.to_string()))?;
            fs::write(dir.join(format!("extract_failure_{stamp}.json")), json).await?;
        }
        Err(err) => warn!(error = %err, "session state unavailable"),
    }
    let png = session.screenshot().await?;
    let path = dir.join(format!("extract_failure_{stamp}.png"));
    fs::write(&path, png).await?;
    Ok(path)
}
