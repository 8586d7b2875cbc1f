use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use fieldops_core::browser::{BrowserError, BrowserLauncher, LaunchOverrides};
use fieldops_core::config::{load_extractor_config, ExtractorConfig};
use fieldops_core::extract::{ExtractionOutcome, RunReport, TargetKind, TargetOrchestrator};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] fieldops_core::ConfigError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Extração de ordens de serviço do portal de campo", long_about = None)]
pub struct Cli {
    /// Caminho do extractor.toml
    #[arg(long, default_value = "configs/extractor.toml")]
    pub config: PathBuf,
    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Ativa logs de depuração (RUST_LOG tem precedência)
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Executa a extração dos alvos configurados
    Run(RunArgs),
    /// Lista os alvos configurados
    Targets,
    /// Executa verificações de ambiente
    Health,
    /// Gera script de autocompletar para o shell
    Completions(CompletionsArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Restringe a execução a alvos específicos (pode repetir)
    #[arg(long = "target", value_name = "NAME")]
    pub targets: Vec<String>,
    /// Abre o Chromium com janela visível
    #[arg(long, default_value_t = false)]
    pub headed: bool,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(args.shell, &mut command, "fieldopsctl", &mut io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Run(args) => {
            let report = context.extract(args)?;
            render(&report, cli.format)?;
        }
        Commands::Targets => {
            let targets = context.target_list();
            render(&targets, cli.format)?;
        }
        Commands::Health => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "Uma ou mais verificações falharam".to_string(),
                ));
            }
        }
        Commands::Completions(_) => {}
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: ExtractorConfig,
    config_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config = load_extractor_config(&config_path)?;
        Ok(Self {
            config,
            config_path,
        })
    }

    fn extract(&self, args: &RunArgs) -> Result<RunReport> {
        let targets = self.config.select_targets(&args.targets)?;
        let credentials = self.config.credentials.resolve()?;
        let overrides = LaunchOverrides {
            headless: args.headed.then_some(false),
        };
        let launcher =
            BrowserLauncher::new(self.config.chromium.clone(), self.config.download_dir())
                .with_overrides(overrides);
        let orchestrator = TargetOrchestrator::new(self.config.clone());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let result = runtime.block_on(orchestrator.run(&targets, &launcher, &credentials));
        match result {
            Ok(report) => {
                info!(run_id = %report.run_id, "run complete");
                Ok(report)
            }
            Err(BrowserError::Authentication(reason)) => Err(AppError::Authentication(reason)),
            Err(err) => Err(err.into()),
        }
    }

    fn target_list(&self) -> TargetList {
        TargetList {
            rows: self
                .config
                .targets
                .iter()
                .map(|target| TargetEntry {
                    name: target.name.clone(),
                    kind: target.kind,
                    base_name: target.base_name.clone(),
                    hierarchical_filter: target.hierarchical_filter,
                })
                .collect(),
        }
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = vec![HealthEntry::ok(
            "extractor.toml",
            format!("{}", self.config_path.display()),
        )];
        results.push(HealthEntry::ok("portal", self.config.portal.url.clone()));
        results.push(self.check_directory("download", &self.config.download_dir()));
        results.push(self.check_directory("diagnostics", &self.config.diagnostics_dir()));
        results.push(match &self.config.chromium.executable_path {
            Some(path) => self.check_path("chromium", Path::new(path)),
            None => HealthEntry::warn("chromium", "executável será detectado automaticamente"),
        });
        for variable in [
            &self.config.credentials.username_env,
            &self.config.credentials.password_env,
        ] {
            results.push(match std::env::var(variable) {
                Ok(value) if !value.is_empty() => HealthEntry::ok(variable.as_str(), "definida"),
                _ => HealthEntry::error(variable.as_str(), "variável de ambiente ausente"),
            });
        }
        results
    }

    fn check_path(&self, name: &str, path: &Path) -> HealthEntry {
        if path.exists() {
            HealthEntry::ok(name, format!("{}", path.display()))
        } else {
            HealthEntry::error(name, format!("{path} ausente", path = path.display()))
        }
    }

    fn check_directory(&self, name: &str, path: &Path) -> HealthEntry {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
            Ok(_) => HealthEntry::error(
                name,
                format!("{path} não é diretório", path = path.display()),
            ),
            Err(_) => HealthEntry::warn(
                name,
                format!("{path} não encontrado (será criado)", path = path.display()),
            ),
        }
    }
}

impl DisplayFallback for RunReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Execução {id} ({duration}s)",
            id = self.run_id,
            duration = (self.finished_at - self.started_at).num_seconds()
        )];
        for report in &self.outcomes {
            let detail = match &report.outcome {
                ExtractionOutcome::Success { artifact } => format!(
                    "{path} ({size} bytes, sha256 {hash})",
                    path = artifact.path.display(),
                    size = artifact.size,
                    hash = artifact.sha256
                ),
                ExtractionOutcome::SkippedNoData => "sem dados para exportar".to_string(),
                ExtractionOutcome::Failed { reason } => reason.clone(),
            };
            lines.push(format!(
                "[{status}] {name} ({kind}) — {detail}",
                status = report.outcome.label(),
                name = report.target,
                kind = report.kind
            ));
        }
        let metrics = &self.metrics;
        lines.push(format!(
            "Sucesso: {ok}, sem dados: {skipped}, falhas: {failed}, retentativas: {stale}, fallback de login: {fallbacks}",
            ok = metrics.targets_succeeded,
            skipped = metrics.targets_skipped,
            failed = metrics.targets_failed,
            stale = metrics.stale_retries,
            fallbacks = metrics.login_fallbacks
        ));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct TargetList {
    pub rows: Vec<TargetEntry>,
}

#[derive(Debug, Serialize)]
pub struct TargetEntry {
    pub name: String,
    pub kind: TargetKind,
    pub base_name: String,
    pub hierarchical_filter: bool,
}

impl DisplayFallback for TargetList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "Nenhum alvo configurado".to_string();
        }
        let mut lines = Vec::new();
        for row in &self.rows {
            lines.push(format!(
                "{name:<12} {kind:<10} {base}{hier}",
                name = row.name,
                kind = row.kind.to_string(),
                base = row.base_name,
                hier = if row.hierarchical_filter {
                    " (hierárquico)"
                } else {
                    ""
                }
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in self {
            lines.push(format!(
                "[{status}] {name} — {detail}",
                status = entry.status,
                name = entry.name,
                detail = entry.detail
            ));
        }
        lines.join("\n")
    }
}
