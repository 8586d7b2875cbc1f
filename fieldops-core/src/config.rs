use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::browser::Locator;
use crate::error::{ConfigError, Result};
use crate::extract::Target;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExtractorConfig {
    pub portal: PortalSection,
    pub credentials: CredentialsSection,
    #[serde(default)]
    pub chromium: ChromiumSection,
    pub download: DownloadSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    pub login: LoginSection,
    pub view: ViewSection,
    pub export: ExportSection,
    pub targets: Vec<Target>,
}

impl ExtractorConfig {
    pub fn download_dir(&self) -> PathBuf {
        PathBuf::from(&self.download.dir)
    }

    pub fn diagnostics_dir(&self) -> PathBuf {
        PathBuf::from(&self.download.diagnostics_dir)
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.portal.url).map_err(|err| {
            ConfigError::Invalid(format!("portal.url {:?}: {err}", self.portal.url))
        })?;
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid("at least one [[targets]] entry is required".into()));
        }
        let mut names = HashSet::new();
        let mut base_names = HashSet::new();
        for target in &self.targets {
            if !names.insert(target.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate target name: {}",
                    target.name
                )));
            }
            let base = target.base_name.as_str();
            if base.is_empty() || base.contains(['/', '\\']) || base.contains('.') {
                return Err(ConfigError::Invalid(format!(
                    "target {}: base_name must be a bare file stem, got {base:?}",
                    target.name
                )));
            }
            if !base_names.insert(base) {
                return Err(ConfigError::Invalid(format!("duplicate base_name: {base}")));
            }
        }
        if self.export.trigger.is_empty() {
            return Err(ConfigError::Invalid(
                "export.trigger needs at least one locator".into(),
            ));
        }
        if self.timeouts.actuator_attempts == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.actuator_attempts must be at least 1".into(),
            ));
        }
        if self.timeouts.export_grace() >= self.timeouts.capture_budget() {
            return Err(ConfigError::Invalid(
                "timeouts.export_grace_seconds must be shorter than capture_budget_seconds"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Configured targets restricted to `names`, keeping configured order.
    pub fn select_targets(&self, names: &[String]) -> Result<Vec<Target>> {
        if names.is_empty() {
            return Ok(self.targets.clone());
        }
        for name in names {
            if !self.targets.iter().any(|target| &target.name == name) {
                return Err(ConfigError::Invalid(format!("unknown target: {name}")));
            }
        }
        Ok(self
            .targets
            .iter()
            .filter(|target| names.contains(&target.name))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalSection {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsSection {
    pub username_env: String,
    pub password_env: String,
}

impl CredentialsSection {
    pub fn resolve(&self) -> Result<Credentials> {
        let username = read_env(&self.username_env)?;
        let password = read_env(&self.password_env)?;
        Ok(Credentials::new(username, password))
    }
}

fn read_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Invalid(format!(
            "environment variable {name} is not set"
        ))),
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub request_timeout_seconds: Option<u64>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: true,
            disable_gpu: true,
            window_width: 1600,
            window_height: 900,
            request_timeout_seconds: Some(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    pub dir: String,
    #[serde(default = "default_in_progress_suffixes")]
    pub in_progress_suffixes: Vec<String>,
    #[serde(default = "default_diagnostics_dir")]
    pub diagnostics_dir: String,
}

fn default_in_progress_suffixes() -> Vec<String> {
    vec![".crdownload".into(), ".tmp".into(), ".part".into()]
}

fn default_diagnostics_dir() -> String {
    "diagnostics".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    pub element_wait_seconds: u64,
    pub poll_interval_ms: u64,
    pub actuator_attempts: usize,
    pub stale_backoff_ms: u64,
    pub stale_jitter_ms: u64,
    pub field_wait_seconds: u64,
    pub login_marker_seconds: u64,
    pub fallback_marker_seconds: u64,
    pub area_settle_ms: u64,
    pub list_view_settle_ms: u64,
    pub filter_panel_settle_ms: u64,
    pub hierarchical_settle_ms: u64,
    pub export_menu_settle_ms: u64,
    pub export_grace_seconds: u64,
    pub capture_budget_seconds: u64,
    pub capture_poll_ms: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            element_wait_seconds: 15,
            poll_interval_ms: 250,
            actuator_attempts: 3,
            stale_backoff_ms: 1_000,
            stale_jitter_ms: 0,
            field_wait_seconds: 10,
            login_marker_seconds: 10,
            fallback_marker_seconds: 20,
            area_settle_ms: 3_000,
            list_view_settle_ms: 3_000,
            filter_panel_settle_ms: 2_000,
            hierarchical_settle_ms: 2_000,
            export_menu_settle_ms: 2_000,
            export_grace_seconds: 5,
            capture_budget_seconds: 300,
            capture_poll_ms: 1_000,
        }
    }
}

impl TimeoutsSection {
    pub fn element_wait(&self) -> Duration {
        Duration::from_secs(self.element_wait_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn export_grace(&self) -> Duration {
        Duration::from_secs(self.export_grace_seconds)
    }

    pub fn capture_budget(&self) -> Duration {
        Duration::from_secs(self.capture_budget_seconds)
    }

    pub fn capture_poll(&self) -> Duration {
        Duration::from_millis(self.capture_poll_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginSection {
    pub username: Locator,
    pub password: Locator,
    pub submit: Locator,
    pub skip_session: Locator,
    pub success_marker: Locator,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewSection {
    pub list_view: Locator,
    pub filter_panel: Locator,
    pub hierarchical_toggle: Locator,
    pub apply: Locator,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportSection {
    /// Activated in order; the first entry doubles as the no-data guard.
    pub trigger: Vec<Locator>,
}

pub fn load_extractor_config<P: AsRef<Path>>(path: P) -> Result<ExtractorConfig> {
    let config: ExtractorConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
