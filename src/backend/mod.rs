//! Backend adapters for the two sandboxing systems under test.
//!
//! Both adapters present the same surface to the benchmark runners:
//! sample, exec and destroy through [`Backend`], plus a backend-specific
//! create. Sandkasten additionally exposes session listing and workspace
//! management.

mod docker;
mod error;
#[cfg(test)]
pub(crate) mod mock;
mod sandkasten;

pub(crate) use docker::DockerCli;
pub(crate) use error::BenchError;
pub(crate) use sandkasten::SandkastenClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

/// Session status the daemon reports for pre-warmed, unclaimed sessions.
pub(crate) const POOL_IDLE: &str = "pool_idle";

/// A point-in-time resource reading that can be folded into a running peak.
pub(crate) trait Snapshot: Copy + Debug + Send + Sync + 'static {
    /// Returns the field-wise maximum of two readings.
    #[must_use]
    fn peak(self, other: Self) -> Self;
}

/// Sandkasten resource reading: memory and a cumulative CPU counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SessionStats {
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default)]
    pub cpu_usage_usec: u64,
}

impl Snapshot for SessionStats {
    fn peak(self, other: Self) -> Self {
        Self {
            memory_bytes: self.memory_bytes.max(other.memory_bytes),
            cpu_usage_usec: self.cpu_usage_usec.max(other.cpu_usage_usec),
        }
    }
}

/// Docker resource reading: memory and instantaneous CPU percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ContainerStats {
    pub memory_bytes: u64,
    pub cpu_percent: f64,
}

impl Snapshot for ContainerStats {
    fn peak(self, other: Self) -> Self {
        Self {
            memory_bytes: self.memory_bytes.max(other.memory_bytes),
            cpu_percent: self.cpu_percent.max(other.cpu_percent),
        }
    }
}

/// Result of running a command inside a sandbox.
///
/// A non-zero exit code is data, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub(crate) struct ExecOutcome {
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Operations shared by every backend.
#[async_trait]
pub(crate) trait Backend: Send + Sync {
    /// Resource reading shape this backend reports.
    type Snapshot: Snapshot;

    /// Backend name for logs and error messages.
    fn name(&self) -> &'static str;

    /// Reads current resource usage of a sandbox.
    async fn sample(&self, id: &str) -> Result<Self::Snapshot, BenchError>;

    /// Runs a shell command and waits for it to exit or time out.
    async fn exec(&self, id: &str, cmd: &str, timeout_ms: u64) -> Result<ExecOutcome, BenchError>;

    /// Tears the sandbox down. Callers log and swallow failures.
    async fn destroy(&self, id: &str) -> Result<(), BenchError>;
}

/// Body of `POST /v1/sessions`. Empty fields are left to daemon defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub(crate) struct CreateSession {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
}

impl CreateSession {
    /// Builds a request, dropping an empty image, zero TTL and empty workspace.
    pub fn new(image: &str, ttl_seconds: u64, workspace_id: Option<&str>) -> Self {
        Self {
            image: non_empty(image),
            ttl_seconds: (ttl_seconds > 0).then_some(ttl_seconds),
            workspace_id: workspace_id.and_then(non_empty),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Session as reported by the Sandkasten daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl SessionInfo {
    /// True if the daemon handed this session out from its warm pool.
    pub fn acquired_from_pool(&self) -> bool {
        self.acquire_source
            .as_deref()
            .is_some_and(|source| source.trim().eq_ignore_ascii_case("pool"))
    }

    /// True if this is an idle pooled session usable for `image`.
    ///
    /// An empty `image` matches any image. `workspace_id = None` matches any
    /// workspace; `Some(id)` requires the session to be bound to `id`.
    pub fn is_idle_match(&self, image: &str, workspace_id: Option<&str>) -> bool {
        self.status == POOL_IDLE
            && (image.is_empty() || self.image == image)
            && workspace_id.map_or(true, |ws| self.workspace_id.as_deref() == Some(ws))
    }
}

/// Sandkasten control-plane operations.
#[async_trait]
pub(crate) trait SandkastenApi: Backend<Snapshot = SessionStats> {
    /// Creates a session and measures request-to-parsed-response latency.
    async fn create_session(
        &self,
        request: &CreateSession,
    ) -> Result<(SessionInfo, Duration), BenchError>;

    /// Lists every session the daemon knows about.
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, BenchError>;

    /// Materializes a workspace by writing a marker file into it.
    async fn ensure_workspace(&self, id: &str) -> Result<(), BenchError>;

    /// Deletes a workspace.
    async fn delete_workspace(&self, id: &str) -> Result<(), BenchError>;
}

/// Container runtime operations.
#[async_trait]
pub(crate) trait ContainerApi: Backend<Snapshot = ContainerStats> {
    /// Starts a detached container kept alive by `keepalive`, returning its id
    /// and the measured start latency.
    async fn run_container(
        &self,
        image: &str,
        keepalive: &str,
    ) -> Result<(String, Duration), BenchError>;
}
