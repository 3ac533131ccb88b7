//! Benchmark configuration.
//!
//! Values come from three layers, highest precedence first: command-line
//! flags (and `SANDKASTEN_API_KEY`), an optional `sandbench.toml`, and
//! built-in defaults. [`BenchConfig::resolve`] validates the merged values
//! into an immutable configuration shared by every runner.

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::backend::BenchError;

const CONFIG_FILE: &str = "sandbench.toml";
const DEFAULT_WORKSPACE_PREFIX: &str = "sandbench";

// -----------------------------------------------------------------------------
// Enumerations
// -----------------------------------------------------------------------------

/// Which backends to benchmark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Target {
    #[default]
    Sandkasten,
    Docker,
    Both,
}

impl Target {
    /// True if the Sandkasten backend runs.
    pub fn includes_sandkasten(self) -> bool {
        matches!(self, Self::Sandkasten | Self::Both)
    }

    /// True if the Docker backend runs.
    pub fn includes_docker(self) -> bool {
        matches!(self, Self::Docker | Self::Both)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sandkasten => write!(f, "sandkasten"),
            Self::Docker => write!(f, "docker"),
            Self::Both => write!(f, "both"),
        }
    }
}

impl FromStr for Target {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sandkasten" => Ok(Self::Sandkasten),
            "docker" => Ok(Self::Docker),
            "both" => Ok(Self::Both),
            _ => Err(BenchError::config(format!(
                "target must be sandkasten, docker, or both (got '{s}')"
            ))),
        }
    }
}

/// How Sandkasten runs are bound to workspaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum WorkspaceMode {
    /// Sessions are created without a workspace.
    #[default]
    None,
    /// Every run reuses one workspace.
    Shared,
    /// Every run gets a fresh workspace.
    PerRun,
}

impl fmt::Display for WorkspaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Shared => write!(f, "shared"),
            Self::PerRun => write!(f, "per-run"),
        }
    }
}

impl FromStr for WorkspaceMode {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "shared" => Ok(Self::Shared),
            "per-run" => Ok(Self::PerRun),
            _ => Err(BenchError::config(format!(
                "workspace-mode must be none, shared, or per-run (got '{s}')"
            ))),
        }
    }
}

// -----------------------------------------------------------------------------
// Config file
// -----------------------------------------------------------------------------

/// Contents of `sandbench.toml`. Every key is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FileConfig {
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub sandkasten: SandkastenFile,
    #[serde(default)]
    pub workload: WorkloadFile,
    #[serde(default)]
    pub workspace: WorkspaceFile,
    #[serde(default)]
    pub docker: DockerFile,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            json: false,
            sandkasten: SandkastenFile::default(),
            workload: WorkloadFile::default(),
            workspace: WorkspaceFile::default(),
            docker: DockerFile::default(),
        }
    }
}

/// `[sandkasten]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SandkastenFile {
    /// Control API base URL
    #[serde(default = "default_host")]
    pub host: String,
    /// Bearer token; `SANDKASTEN_API_KEY` and `--api-key` take precedence
    #[serde(default)]
    pub api_key: String,
    /// Session image (empty uses the daemon default)
    #[serde(default)]
    pub image: String,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
    #[serde(default = "default_runs")]
    pub cold_runs: i64,
    #[serde(default = "default_runs")]
    pub warm_runs: i64,
    #[serde(default = "default_warm_wait_seconds")]
    pub warm_wait_seconds: i64,
    #[serde(default)]
    pub existing_session_ids: Vec<String>,
    /// Command run in existing sessions when no workload is set
    #[serde(default = "default_ping_cmd")]
    pub existing_ping_cmd: String,
}

impl Default for SandkastenFile {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_key: String::new(),
            image: String::new(),
            ttl_seconds: default_ttl_seconds(),
            cold_runs: default_runs(),
            warm_runs: default_runs(),
            warm_wait_seconds: default_warm_wait_seconds(),
            existing_session_ids: Vec::new(),
            existing_ping_cmd: default_ping_cmd(),
        }
    }
}

/// `[workload]` section, shared by both backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WorkloadFile {
    /// Command to run in every sandbox (empty disables workloads)
    #[serde(default)]
    pub command: String,
    #[serde(default = "default_workload_timeout_ms")]
    pub timeout_ms: i64,
    /// Resource polling interval while a workload runs
    #[serde(default = "default_poll_ms")]
    pub poll_ms: i64,
}

impl Default for WorkloadFile {
    fn default() -> Self {
        Self {
            command: String::new(),
            timeout_ms: default_workload_timeout_ms(),
            poll_ms: default_poll_ms(),
        }
    }
}

/// `[workspace]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WorkspaceFile {
    #[serde(default = "default_workspace_mode")]
    pub mode: String,
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_workspace_prefix")]
    pub prefix: String,
    #[serde(default = "default_true")]
    pub cleanup: bool,
    /// Shortcut for `mode = "per-run"`
    #[serde(default)]
    pub fresh_environment: bool,
}

impl Default for WorkspaceFile {
    fn default() -> Self {
        Self {
            mode: default_workspace_mode(),
            id: String::new(),
            prefix: default_workspace_prefix(),
            cleanup: true,
            fresh_environment: false,
        }
    }
}

/// `[docker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DockerFile {
    #[serde(default = "default_docker_image")]
    pub image: String,
    #[serde(default = "default_runs")]
    pub runs: i64,
    #[serde(default)]
    pub existing_ids: Vec<String>,
    #[serde(default = "default_keepalive_cmd")]
    pub keepalive_cmd: String,
    #[serde(default = "default_exec_shell")]
    pub exec_shell: String,
}

impl Default for DockerFile {
    fn default() -> Self {
        Self {
            image: default_docker_image(),
            runs: default_runs(),
            existing_ids: Vec::new(),
            keepalive_cmd: default_keepalive_cmd(),
            exec_shell: default_exec_shell(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_target() -> String {
    "sandkasten".to_string()
}

fn default_host() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_ttl_seconds() -> i64 {
    1800
}

fn default_runs() -> i64 {
    3
}

fn default_warm_wait_seconds() -> i64 {
    10
}

fn default_ping_cmd() -> String {
    ":".to_string()
}

fn default_workload_timeout_ms() -> i64 {
    300_000
}

fn default_poll_ms() -> i64 {
    200
}

fn default_workspace_mode() -> String {
    "none".to_string()
}

fn default_workspace_prefix() -> String {
    DEFAULT_WORKSPACE_PREFIX.to_string()
}

fn default_docker_image() -> String {
    "python:3.12-slim".to_string()
}

fn default_keepalive_cmd() -> String {
    "while true; do sleep 3600; done".to_string()
}

fn default_exec_shell() -> String {
    "sh".to_string()
}

impl FileConfig {
    /// Loads the config file.
    ///
    /// An explicit path must exist. Otherwise `./sandbench.toml` and then
    /// `<config dir>/sandbench/config.toml` are tried; if neither exists the
    /// built-in defaults are used.
    pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match discover(cwd) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}

fn discover(cwd: &Path) -> Option<PathBuf> {
    let local = cwd.join(CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("sandbench").join("config.toml"))
        .filter(|path| path.is_file())
}

// -----------------------------------------------------------------------------
// Command-line overrides
// -----------------------------------------------------------------------------

/// Command-line flags. Anything left unset falls back to the config file.
#[derive(Debug, Default, Clone, Args)]
pub(crate) struct Overrides {
    /// Benchmark target: sandkasten | docker | both
    #[arg(long)]
    pub target: Option<String>,

    /// Sandkasten API base URL
    #[arg(long)]
    pub host: Option<String>,

    /// Sandkasten API key
    #[arg(long, env = "SANDKASTEN_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Sandkasten image (empty uses daemon default)
    #[arg(long)]
    pub image: Option<String>,

    /// Sandkasten session TTL in seconds
    #[arg(long, allow_negative_numbers = true)]
    pub ttl_seconds: Option<i64>,

    /// Number of Sandkasten cold runs
    #[arg(long, allow_negative_numbers = true)]
    pub cold_runs: Option<i64>,

    /// Number of Sandkasten warm (pre-pooled) runs
    #[arg(long, allow_negative_numbers = true)]
    pub warm_runs: Option<i64>,

    /// Seconds to wait for a warm pool slot
    #[arg(long, allow_negative_numbers = true)]
    pub warm_wait_seconds: Option<i64>,

    /// Workload command run in every sandbox (both backends)
    #[arg(long)]
    pub workload: Option<String>,

    /// Workload timeout in milliseconds
    #[arg(long, allow_negative_numbers = true)]
    pub workload_timeout_ms: Option<i64>,

    /// Resource polling interval in milliseconds
    #[arg(long, allow_negative_numbers = true)]
    pub poll_ms: Option<i64>,

    /// Comma-separated existing Sandkasten session IDs
    #[arg(long)]
    pub existing_session_ids: Option<String>,

    /// Command for existing Sandkasten sessions when --workload is empty
    #[arg(long)]
    pub existing_ping_cmd: Option<String>,

    /// Sandkasten workspace mode: none | shared | per-run
    #[arg(long)]
    pub workspace_mode: Option<String>,

    /// Workspace ID for shared mode (generated when empty)
    #[arg(long)]
    pub workspace_id: Option<String>,

    /// Prefix for generated workspace IDs
    #[arg(long)]
    pub workspace_prefix: Option<String>,

    /// Delete workspaces created by the benchmark
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub workspace_cleanup: Option<bool>,

    /// Shortcut for --workspace-mode per-run
    #[arg(long)]
    pub fresh_environment: bool,

    /// Docker image
    #[arg(long)]
    pub docker_image: Option<String>,

    /// Number of Docker create/start runs
    #[arg(long, allow_negative_numbers = true)]
    pub docker_runs: Option<i64>,

    /// Comma-separated existing Docker container IDs
    #[arg(long)]
    pub docker_existing_ids: Option<String>,

    /// Command that keeps benchmark containers alive
    #[arg(long)]
    pub docker_keepalive_cmd: Option<String>,

    /// Shell used for docker exec (sh or bash)
    #[arg(long)]
    pub docker_exec_shell: Option<String>,

    /// Emit the report as JSON
    #[arg(long)]
    pub json: bool,
}

// -----------------------------------------------------------------------------
// Resolved configuration
// -----------------------------------------------------------------------------

/// Workspace handling for Sandkasten runs, as recorded in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct WorkspaceOptions {
    pub mode: WorkspaceMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    pub cleanup: bool,
}

/// Sandkasten-specific settings.
#[derive(Debug, Clone)]
pub(crate) struct SandkastenSettings {
    pub host: String,
    pub api_key: String,
    pub image: String,
    pub ttl_seconds: u64,
    pub cold_runs: u32,
    pub warm_runs: u32,
    pub warm_wait: Duration,
    pub existing_ids: Vec<String>,
    pub existing_ping_cmd: String,
}

/// Workload settings shared by both backends.
#[derive(Debug, Clone)]
pub(crate) struct WorkloadSettings {
    /// Empty means no workload.
    pub command: String,
    pub timeout_ms: u64,
    pub poll: Duration,
}

/// Docker-specific settings.
#[derive(Debug, Clone)]
pub(crate) struct DockerSettings {
    pub image: String,
    pub runs: u32,
    pub existing_ids: Vec<String>,
    pub keepalive_cmd: String,
    pub exec_shell: String,
}

/// Validated, immutable benchmark configuration.
#[derive(Debug, Clone)]
pub(crate) struct BenchConfig {
    pub target: Target,
    pub json: bool,
    pub sandkasten: SandkastenSettings,
    pub workload: WorkloadSettings,
    pub workspace: WorkspaceOptions,
    pub docker: DockerSettings,
}

impl BenchConfig {
    /// Merges flags over the file config and validates the result.
    pub fn resolve(file: FileConfig, cli: Overrides) -> Result<Self, BenchError> {
        let FileConfig {
            target,
            json,
            sandkasten: sk,
            workload: wl,
            workspace: ws,
            docker: dk,
        } = file;

        let target: Target = cli.target.unwrap_or(target).parse()?;

        let workload = WorkloadSettings {
            command: cli.workload.unwrap_or(wl.command).trim().to_string(),
            timeout_ms: positive("workload-timeout-ms", cli.workload_timeout_ms.unwrap_or(wl.timeout_ms))?,
            poll: Duration::from_millis(positive("poll-ms", cli.poll_ms.unwrap_or(wl.poll_ms))?),
        };

        let sandkasten = SandkastenSettings {
            host: cli
                .host
                .unwrap_or(sk.host)
                .trim()
                .trim_end_matches('/')
                .to_string(),
            api_key: cli.api_key.unwrap_or(sk.api_key).trim().to_string(),
            image: cli.image.unwrap_or(sk.image).trim().to_string(),
            ttl_seconds: non_negative("ttl-seconds", cli.ttl_seconds.unwrap_or(sk.ttl_seconds))?,
            cold_runs: count("cold-runs", cli.cold_runs.unwrap_or(sk.cold_runs))?,
            warm_runs: count("warm-runs", cli.warm_runs.unwrap_or(sk.warm_runs))?,
            warm_wait: Duration::from_secs(non_negative(
                "warm-wait-seconds",
                cli.warm_wait_seconds.unwrap_or(sk.warm_wait_seconds),
            )?),
            existing_ids: match cli.existing_session_ids {
                Some(raw) => parse_csv(&raw),
                None => clean_list(sk.existing_session_ids),
            },
            existing_ping_cmd: cli
                .existing_ping_cmd
                .unwrap_or(sk.existing_ping_cmd)
                .trim()
                .to_string(),
        };

        let docker = DockerSettings {
            image: cli.docker_image.unwrap_or(dk.image).trim().to_string(),
            runs: count("docker-runs", cli.docker_runs.unwrap_or(dk.runs))?,
            existing_ids: match cli.docker_existing_ids {
                Some(raw) => parse_csv(&raw),
                None => clean_list(dk.existing_ids),
            },
            keepalive_cmd: cli.docker_keepalive_cmd.unwrap_or(dk.keepalive_cmd),
            exec_shell: cli.docker_exec_shell.unwrap_or(dk.exec_shell).trim().to_string(),
        };

        let mut mode: WorkspaceMode = cli.workspace_mode.unwrap_or(ws.mode).parse()?;
        if cli.fresh_environment || ws.fresh_environment {
            mode = WorkspaceMode::PerRun;
        }
        let prefix = cli.workspace_prefix.unwrap_or(ws.prefix).trim().to_string();
        let id = Some(cli.workspace_id.unwrap_or(ws.id).trim().to_string())
            .filter(|id| !id.is_empty());
        let id = match mode {
            WorkspaceMode::Shared => Some(id.unwrap_or_else(|| new_workspace_id(&prefix))),
            _ => id,
        };
        let workspace = WorkspaceOptions {
            mode,
            id,
            prefix,
            cleanup: cli.workspace_cleanup.unwrap_or(ws.cleanup),
        };

        Ok(Self {
            target,
            json: cli.json || json,
            sandkasten,
            workload,
            workspace,
            docker,
        })
    }
}

fn count(name: &str, value: i64) -> Result<u32, BenchError> {
    u32::try_from(value)
        .map_err(|_| BenchError::config(format!("{name} must be >= 0 (got {value})")))
}

fn non_negative(name: &str, value: i64) -> Result<u64, BenchError> {
    u64::try_from(value)
        .map_err(|_| BenchError::config(format!("{name} must be >= 0 (got {value})")))
}

fn positive(name: &str, value: i64) -> Result<u64, BenchError> {
    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| BenchError::config(format!("{name} must be > 0 (got {value})")))
}

/// Splits a comma-separated list, trimming entries and dropping empty ones.
pub(crate) fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Generates a workspace id `<prefix>-<unix nanos>`.
///
/// The suffix is strictly increasing within the process, even when two ids
/// are requested within the same clock tick.
pub(crate) fn new_workspace_id(prefix: &str) -> String {
    static LAST: AtomicU64 = AtomicU64::new(0);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default();
    let previous = LAST
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_default();
    let stamp = now.max(previous + 1);

    let prefix = prefix.trim();
    let prefix = if prefix.is_empty() {
        DEFAULT_WORKSPACE_PREFIX
    } else {
        prefix
    };
    format!("{prefix}-{stamp}")
}
