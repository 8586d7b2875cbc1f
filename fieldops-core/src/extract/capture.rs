use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{
    await_condition, wait_for_interactable, Actuator, BrowserError, BrowserResult,
    DrivenSession, Locator, WaitPolicy,
};
use crate::config::ExtractorConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// The slice of filesystem access the capture step needs, scoped to plain
/// files directly inside one directory.
#[async_trait(?Send)]
pub trait DirectoryObserver {
    async fn list(&self, dir: &Path) -> BrowserResult<Vec<DirEntry>>;
    async fn remove(&self, path: &Path) -> BrowserResult<()>;
    /// Replaces `to` if it already exists.
    async fn rename(&self, from: &Path, to: &Path) -> BrowserResult<()>;
    async fn sha256(&self, path: &Path) -> BrowserResult<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsDirectory;

#[async_trait(?Send)]
impl DirectoryObserver for FsDirectory {
    async fn list(&self, dir: &Path) -> BrowserResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let mut reader = fs::read_dir(dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            // Entries can vanish between listing and stat while the browser
            // swaps its temporary file for the final one.
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(err) => {
                    debug!(path = %entry.path().display(), error = %err, "skipping entry");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                modified: metadata.modified().ok(),
            });
        }
        Ok(entries)
    }

    async fn remove(&self, path: &Path) -> BrowserResult<()> {
        fs::remove_file(path).await?;
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> BrowserResult<()> {
        #[cfg(windows)]
        if fs::try_exists(to).await? {
            fs::remove_file(to).await?;
        }
        fs::rename(from, to).await?;
        Ok(())
    }

    async fn sha256(&self, path: &Path) -> BrowserResult<String> {
        let mut file = fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

/// File-name suffixes the producing browser uses while a download is still
/// being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InProgressMarkers {
    suffixes: Vec<String>,
}

impl InProgressMarkers {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes
                .into_iter()
                .map(|suffix| suffix.into().to_lowercase())
                .filter(|suffix| !suffix.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.suffixes.iter().any(|suffix| lower.ends_with(suffix))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadArtifact {
    pub path: PathBuf,
    pub original_name: String,
    pub size: u64,
    /// Last-modified time of the downloaded file, or the capture time when the
    /// filesystem does not report one.
    pub modified_at: DateTime<Utc>,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Captured(DownloadArtifact),
    NoData,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub grace_period: Duration,
    pub time_budget: Duration,
    pub poll_interval: Duration,
    /// Pause between consecutive trigger activations, for menus to render.
    pub step_pause: Duration,
    pub markers: InProgressMarkers,
}

impl CaptureSettings {
    pub fn from_config(config: &ExtractorConfig) -> Self {
        let timeouts = &config.timeouts;
        Self {
            grace_period: timeouts.export_grace(),
            time_budget: timeouts.capture_budget(),
            poll_interval: timeouts.capture_poll(),
            step_pause: Duration::from_millis(timeouts.export_menu_settle_ms),
            markers: InProgressMarkers::new(config.download.in_progress_suffixes.iter().cloned()),
        }
    }
}

/// Tracks the single new candidate between polls until its size holds still.
#[derive(Debug, Default)]
struct StabilityTracker {
    last: Option<(String, u64)>,
    last_candidates: Vec<String>,
}

impl StabilityTracker {
    fn observe(
        &mut self,
        entries: Vec<DirEntry>,
        baseline: &HashSet<String>,
        markers: &InProgressMarkers,
    ) -> Option<DirEntry> {
        let mut candidates: Vec<DirEntry> = entries
            .into_iter()
            .filter(|entry| !baseline.contains(&entry.name) && !markers.matches(&entry.name))
            .collect();
        self.last_candidates = candidates.iter().map(|entry| entry.name.clone()).collect();
        if candidates.len() != 1 {
            self.last = None;
            return None;
        }
        let candidate = candidates.remove(0);
        let observed = (candidate.name.clone(), candidate.size);
        if candidate.size > 0 && self.last.as_ref() == Some(&observed) {
            return Some(candidate);
        }
        self.last = Some(observed);
        None
    }
}

impl StabilityTracker {
    fn is_ambiguous(&self) -> bool {
        self.last_candidates.len() > 1
    }
}

fn has_base_name(name: &str, base_name: &str) -> bool {
    name == base_name
        || name
            .strip_prefix(base_name)
            .is_some_and(|rest| rest.starts_with('.'))
}

fn canonical_name(original: &str, base_name: &str) -> String {
    match Path::new(original).extension() {
        Some(ext) => format!("{base_name}.{}", ext.to_string_lossy()),
        None => base_name.to_string(),
    }
}

/// Triggers a background export and publishes the file it produces under a
/// canonical name.
pub struct ExportCapture<'a> {
    actuator: &'a Actuator,
    observer: &'a dyn DirectoryObserver,
    settings: CaptureSettings,
}

impl<'a> ExportCapture<'a> {
    pub fn new(
        actuator: &'a Actuator,
        observer: &'a dyn DirectoryObserver,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            actuator,
            observer,
            settings,
        }
    }

    pub async fn export_and_capture(
        &self,
        session: &dyn DrivenSession,
        trigger: &[Locator],
        destination: &Path,
        base_name: &str,
    ) -> BrowserResult<CaptureOutcome> {
        let Some(first) = trigger.first() else {
            return Err(BrowserError::Configuration(
                "export trigger sequence is empty".into(),
            ));
        };
        let grace = self
            .actuator
            .wait_policy()
            .with_timeout(self.settings.grace_period);
        match wait_for_interactable(session, first, grace).await {
            Ok(_) => {}
            Err(err) if err.is_timeout() => {
                info!(base_name, trigger = %first, "export trigger unavailable, nothing to export");
                return Ok(CaptureOutcome::NoData);
            }
            Err(err) => return Err(err),
        }

        self.pre_clean(destination, base_name).await?;
        let baseline: HashSet<String> = self
            .observer
            .list(destination)
            .await?
            .into_iter()
            .map(|entry| entry.name)
            .collect();

        for (index, locator) in trigger.iter().enumerate() {
            if index > 0 && !self.settings.step_pause.is_zero() {
                sleep(self.settings.step_pause).await;
            }
            self.actuator.activate(session, locator).await?;
        }
        info!(base_name, dir = %destination.display(), "export triggered, waiting for download");

        let captured = self.await_download(destination, base_name, &baseline).await?;
        self.publish(destination, base_name, captured).await.map(CaptureOutcome::Captured)
    }

    async fn pre_clean(&self, destination: &Path, base_name: &str) -> BrowserResult<()> {
        for entry in self.observer.list(destination).await? {
            if has_base_name(&entry.name, base_name) {
                self.observer.remove(&destination.join(&entry.name)).await?;
                info!(file = %entry.name, "removed previous artifact");
            }
        }
        Ok(())
    }

    async fn await_download(
        &self,
        destination: &Path,
        base_name: &str,
        baseline: &HashSet<String>,
    ) -> BrowserResult<DirEntry> {
        let tracker = RefCell::new(StabilityTracker::default());
        let policy = WaitPolicy::new(self.settings.time_budget, self.settings.poll_interval);
        let operation = format!("download of {base_name} into {}", destination.display());
        let observer = self.observer;
        let markers = &self.settings.markers;
        let tracker_ref = &tracker;
        let result = await_condition(&operation, policy, move || async move {
            let entries = observer.list(destination).await?;
            Ok(tracker_ref.borrow_mut().observe(entries, baseline, markers))
        })
        .await;
        match result {
            Err(BrowserError::Timeout { bound, .. }) if tracker.borrow().is_ambiguous() => {
                let candidates = tracker.borrow().last_candidates.clone();
                warn!(base_name, ?candidates, "several new files appeared, refusing to guess");
                Err(BrowserError::CaptureAmbiguity { candidates, bound })
            }
            other => other,
        }
    }

    async fn publish(
        &self,
        destination: &Path,
        base_name: &str,
        captured: DirEntry,
    ) -> BrowserResult<DownloadArtifact> {
        let canonical = destination.join(canonical_name(&captured.name, base_name));
        self.observer
            .rename(&destination.join(&captured.name), &canonical)
            .await?;
        let sha256 = self.observer.sha256(&canonical).await?;
        info!(
            from = %captured.name,
            to = %canonical.display(),
            size = captured.size,
            "artifact published"
        );
        Ok(DownloadArtifact {
            path: canonical,
            original_name: captured.name,
            size: captured.size,
            modified_at: captured
                .modified
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now),
            sha256,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::RetryPolicy;
    use crate::test_framework::{MemoryDirectory, ScriptedSession};
    use tempfile::TempDir;

    fn actions_menu() -> Locator {
        Locator::xpath("(//button[@title='Ações'])")
    }

    fn export_item() -> Locator {
        Locator::css("div.app-menu-container-wrapper button:nth-child(2)")
    }

    fn trigger() -> Vec<Locator> {
        vec![actions_menu(), export_item()]
    }

    fn actuator() -> Actuator {
        Actuator::new(
            WaitPolicy::new(Duration::from_secs(15), Duration::from_millis(250)),
            RetryPolicy::new(3, Duration::from_secs(1)),
        )
    }

    fn settings() -> CaptureSettings {
        CaptureSettings {
            grace_period: Duration::from_secs(5),
            time_budget: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            step_pause: Duration::from_secs(2),
            markers: InProgressMarkers::new([".crdownload", ".tmp"]),
        }
    }

    fn export_session(on_export: impl Fn(usize) + 'static) -> ScriptedSession {
        ScriptedSession::new()
            .with_interactable(&actions_menu())
            .with_interactable(&export_item())
            .on_activate(&export_item(), on_export)
    }

    #[test]
    fn markers_match_suffixes_case_insensitively() {
        let markers = InProgressMarkers::new([".crdownload", ".tmp"]);
        assert!(markers.matches("export.csv.CRDOWNLOAD"));
        assert!(markers.matches("a.tmp"));
        assert!(!markers.matches("b.csv"));
    }

    #[test]
    fn base_name_matching_requires_a_dot_boundary() {
        assert!(has_base_name("prod_coi.csv", "prod_coi"));
        assert!(has_base_name("prod_coi", "prod_coi"));
        assert!(!has_base_name("prod_coi_old.csv", "prod_coi"));
        assert_eq!(canonical_name("Atividades 2024.xlsx", "prod_coi"), "prod_coi.xlsx");
        assert_eq!(canonical_name("export", "prod_coi"), "prod_coi");
    }

    #[tokio::test(start_paused = true)]
    async fn temporary_files_are_ignored_and_stable_file_is_captured() {
        let dir = MemoryDirectory::new();
        dir.put("a.tmp", vec![0u8; 10]);
        let writer = dir.clone();
        let session = export_session(move |_| writer.put("b.csv", vec![7u8; 1024]));
        let actuator = actuator();
        let capture = ExportCapture::new(&actuator, &dir, settings());

        let outcome = capture
            .export_and_capture(&session, &trigger(), Path::new("/data"), "prod_coi")
            .await
            .unwrap();

        let CaptureOutcome::Captured(artifact) = outcome else {
            panic!("expected a captured artifact");
        };
        assert_eq!(artifact.path, Path::new("/data").join("prod_coi.csv"));
        assert_eq!(artifact.original_name, "b.csv");
        assert_eq!(artifact.size, 1024);
        assert_eq!(dir.contents("prod_coi.csv"), Some(vec![7u8; 1024]));
        assert!(dir.contents("b.csv").is_none());
        assert!(dir.contents("a.tmp").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn growing_file_is_captured_only_after_size_settles() {
        let dir = MemoryDirectory::new();
        let writer = dir.clone();
        let session = export_session(move |_| {
            writer.put_growing("report.csv", vec![vec![1u8; 100], vec![2u8; 100], vec![3u8; 100]])
        });
        let actuator = actuator();
        let capture = ExportCapture::new(&actuator, &dir, settings());

        let outcome = capture
            .export_and_capture(&session, &trigger(), Path::new("/data"), "prod_fisc")
            .await
            .unwrap();
        let CaptureOutcome::Captured(artifact) = outcome else {
            panic!("expected a captured artifact");
        };
        assert_eq!(artifact.size, 300);
        assert_eq!(dir.contents("prod_fisc.csv").map(|bytes| bytes.len()), Some(300));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_trigger_means_no_data() {
        let dir = MemoryDirectory::new();
        dir.put("prod_fisc.csv", b"old".to_vec());
        let session = ScriptedSession::new();
        let actuator = actuator();
        let capture = ExportCapture::new(&actuator, &dir, settings());
        let started = tokio::time::Instant::now();

        let outcome = capture
            .export_and_capture(&session, &trigger(), Path::new("/data"), "prod_fisc")
            .await
            .unwrap();
        assert!(matches!(outcome, CaptureOutcome::NoData));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        // nothing is cleaned when nothing is exported
        assert_eq!(dir.contents("prod_fisc.csv"), Some(b"old".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn attached_but_disabled_trigger_means_no_data() {
        let dir = MemoryDirectory::new();
        let session = ScriptedSession::new().with_present(&actions_menu());
        let actuator = actuator();
        let capture = ExportCapture::new(&actuator, &dir, settings());

        let outcome = capture
            .export_and_capture(&session, &trigger(), Path::new("/data"), "prod_coi")
            .await
            .unwrap();
        assert!(matches!(outcome, CaptureOutcome::NoData));
        assert_eq!(session.activations_of(&actions_menu()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn broken_session_during_guard_is_a_failure_not_no_data() {
        let dir = MemoryDirectory::new();
        dir.put("prod_coi.csv", b"old".to_vec());
        let session =
            ScriptedSession::new().with_broken_probe(&actions_menu(), "websocket closed");
        let actuator = actuator();
        let capture = ExportCapture::new(&actuator, &dir, settings());

        let err = capture
            .export_and_capture(&session, &trigger(), Path::new("/data"), "prod_coi")
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Unexpected(_)), "{err:?}");
        assert_eq!(dir.contents("prod_coi.csv"), Some(b"old".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn no_new_file_within_budget_times_out() {
        let dir = MemoryDirectory::new();
        dir.put("unrelated.csv", b"x".to_vec());
        let session = export_session(|_| {});
        let actuator = actuator();
        let capture = ExportCapture::new(&actuator, &dir, settings());

        let err = capture
            .export_and_capture(&session, &trigger(), Path::new("/data"), "prod_coi")
            .await
            .unwrap_err();
        match err {
            BrowserError::Timeout { bound, .. } => assert_eq!(bound, Duration::from_secs(300)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_new_files_are_reported_as_ambiguous() {
        let dir = MemoryDirectory::new();
        let writer = dir.clone();
        let session = export_session(move |_| {
            writer.put("one.csv", b"1".to_vec());
            writer.put("two.csv", b"2".to_vec());
        });
        let actuator = actuator();
        let capture = ExportCapture::new(&actuator, &dir, settings());

        let err = capture
            .export_and_capture(&session, &trigger(), Path::new("/data"), "prod_coi")
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        match err {
            BrowserError::CaptureAmbiguity { mut candidates, .. } => {
                candidates.sort();
                assert_eq!(candidates, vec!["one.csv".to_string(), "two.csv".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_byte_file_is_never_accepted() {
        let dir = MemoryDirectory::new();
        let writer = dir.clone();
        let session = export_session(move |_| writer.put("empty.csv", Vec::new()));
        let actuator = actuator();
        let capture = ExportCapture::new(&actuator, &dir, settings());

        let err = capture
            .export_and_capture(&session, &trigger(), Path::new("/data"), "prod_coi")
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(dir.contents("prod_coi.csv").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn real_directory_round_trip_replaces_previous_artifact() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        std::fs::write(root.join("prod_coi.csv"), b"stale").unwrap();
        std::fs::write(root.join("prod_coi.xlsx"), b"stale too").unwrap();
        std::fs::write(root.join("other.csv"), b"keep").unwrap();

        let actuator = actuator();
        let observer = FsDirectory;
        for (round, content) in ["first export", "second export"].into_iter().enumerate() {
            let target_dir = root.clone();
            let file_name = format!("Atividades-{round}.csv");
            let session = export_session(move |_| {
                std::fs::write(target_dir.join(&file_name), content).unwrap();
            });
            let capture = ExportCapture::new(&actuator, &observer, settings());
            let outcome = capture
                .export_and_capture(&session, &trigger(), &root, "prod_coi")
                .await
                .unwrap();
            let CaptureOutcome::Captured(artifact) = outcome else {
                panic!("expected a captured artifact");
            };
            assert_eq!(artifact.size, content.len() as u64);
            let expected = hex::encode(Sha256::digest(content.as_bytes()));
            assert_eq!(artifact.sha256, expected);
        }

        let mut names: Vec<String> = std::fs::read_dir(&root)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["other.csv".to_string(), "prod_coi.csv".to_string()]);
        assert_eq!(
            std::fs::read_to_string(root.join("prod_coi.csv")).unwrap(),
            "second export"
        );
    }
}
