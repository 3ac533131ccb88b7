//! Benchmark report model.
//!
//! The report is built once by the orchestrator and then either serialized
//! as JSON or rendered by [`format`]. Sandkasten and Docker keep separate
//! record shapes because their CPU readings differ: a cumulative microsecond
//! counter versus an instantaneous percentage.

mod format;
mod hardware;

pub(crate) use format::render;
pub(crate) use hardware::HardwareInfo;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::{ContainerStats, SessionStats};
use crate::bench::Measured;
use crate::config::WorkspaceOptions;

/// Top-level report.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct BenchReport {
    pub generated_at: DateTime<Utc>,
    pub hardware: HardwareInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandkasten: Option<SandReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerReport>,
}

// -----------------------------------------------------------------------------
// Sandkasten
// -----------------------------------------------------------------------------

/// Scenario of a measured Sandkasten run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum RunMode {
    Cold,
    Warm,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SandReport {
    pub host: String,
    pub image: String,
    pub workspace: WorkspaceOptions,
    pub cold_runs: Vec<SandRun>,
    pub warm_runs: Vec<SandRun>,
    pub existing_runs: Vec<SandExistingRun>,
    pub cold_summary: SandSummary,
    pub warm_summary: SandSummary,
    pub existing_summary: ExistingSummary,
}

/// One measured session creation.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SandRun {
    pub mode: RunMode,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    /// Create latency in milliseconds, microsecond precision.
    pub startup_ms: f64,
    /// True iff the daemon served the session from its warm pool.
    pub classified_pooled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquire_detail: Option<String>,
    pub startup_memory_bytes: u64,
    pub startup_cpu_usec: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<SandWorkload>,
}

/// Reading of a caller-provided session.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SandExistingRun {
    pub session_id: String,
    pub memory_bytes: u64,
    pub cpu_usage_usec: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<SandWorkload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SandWorkload {
    pub command: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub cpu_start_usec: u64,
    pub cpu_end_usec: u64,
    /// `cpu_end_usec - cpu_start_usec`, clamped at zero.
    pub cpu_delta_usec: u64,
    pub memory_start_bytes: u64,
    pub memory_end_bytes: u64,
    pub memory_peak_bytes: u64,
}

impl SandWorkload {
    pub fn new(command: &str, measured: &Measured<SessionStats>) -> Self {
        Self {
            command: command.to_string(),
            exit_code: measured.exit_code,
            duration_ms: measured.duration_ms,
            cpu_start_usec: measured.before.cpu_usage_usec,
            cpu_end_usec: measured.after.cpu_usage_usec,
            cpu_delta_usec: measured
                .after
                .cpu_usage_usec
                .saturating_sub(measured.before.cpu_usage_usec),
            memory_start_bytes: measured.before.memory_bytes,
            memory_end_bytes: measured.after.memory_bytes,
            memory_peak_bytes: measured.peak.memory_bytes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct SandSummary {
    pub count: usize,
    pub startup_avg_ms: f64,
    pub startup_min_ms: f64,
    pub startup_max_ms: f64,
    pub startup_mem_avg_mib: f64,
    pub startup_cpu_avg_ms: f64,
    pub pooled_hits: usize,
    pub workload_count: usize,
    pub workload_avg_ms: f64,
    pub workload_cpu_avg_ms: f64,
    pub workload_mem_peak_avg_mib: f64,
    pub workload_exit_non_zero: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct ExistingSummary {
    pub count: usize,
    pub memory_avg_mib: f64,
    pub cpu_avg_ms: f64,
    pub workload_count: usize,
    pub workload_avg_ms: f64,
    pub workload_cpu_avg_ms: f64,
    pub workload_mem_peak_avg_mib: f64,
    pub workload_exit_non_zero: usize,
}

// -----------------------------------------------------------------------------
// Docker
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub(crate) struct DockerReport {
    pub image: String,
    pub runs: Vec<DockerRun>,
    pub existing_runs: Vec<DockerExistingRun>,
    pub summary: DockerSummary,
    pub existing_summary: DockerExistingSummary,
}

/// One measured container start.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct DockerRun {
    pub container_id: String,
    pub startup_ms: f64,
    pub startup_memory_bytes: u64,
    pub startup_cpu_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<DockerWorkload>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct DockerExistingRun {
    pub container_id: String,
    pub memory_bytes: u64,
    pub cpu_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<DockerWorkload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct DockerWorkload {
    pub command: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub mem_start_bytes: u64,
    pub mem_end_bytes: u64,
    pub mem_peak_bytes: u64,
    pub cpu_start_percent: f64,
    pub cpu_end_percent: f64,
    pub cpu_peak_percent: f64,
}

impl DockerWorkload {
    pub fn new(command: &str, measured: &Measured<ContainerStats>) -> Self {
        Self {
            command: command.to_string(),
            exit_code: measured.exit_code,
            duration_ms: measured.duration_ms,
            mem_start_bytes: measured.before.memory_bytes,
            mem_end_bytes: measured.after.memory_bytes,
            mem_peak_bytes: measured.peak.memory_bytes,
            cpu_start_percent: measured.before.cpu_percent,
            cpu_end_percent: measured.after.cpu_percent,
            cpu_peak_percent: measured.peak.cpu_percent,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct DockerSummary {
    pub count: usize,
    pub startup_avg_ms: f64,
    pub startup_min_ms: f64,
    pub startup_max_ms: f64,
    pub startup_mem_avg_mib: f64,
    pub startup_cpu_avg_percent: f64,
    pub workload_count: usize,
    pub workload_avg_ms: f64,
    pub workload_mem_peak_avg_mib: f64,
    pub workload_cpu_peak_avg_percent: f64,
    pub workload_exit_non_zero: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct DockerExistingSummary {
    pub count: usize,
    pub memory_avg_mib: f64,
    pub cpu_avg_percent: f64,
    pub workload_count: usize,
    pub workload_avg_ms: f64,
    pub workload_mem_peak_avg_mib: f64,
    pub workload_cpu_peak_avg_percent: f64,
    pub workload_exit_non_zero: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspaceMode;

    fn measured_session(before: (u64, u64), after: (u64, u64), peak_mem: u64) -> Measured<SessionStats> {
        Measured {
            before: SessionStats {
                memory_bytes: before.0,
                cpu_usage_usec: before.1,
            },
            after: SessionStats {
                memory_bytes: after.0,
                cpu_usage_usec: after.1,
            },
            peak: SessionStats {
                memory_bytes: peak_mem,
                cpu_usage_usec: after.1,
            },
            exit_code: 0,
            duration_ms: 12,
        }
    }

    #[test]
    fn test_sand_workload_cpu_delta_clamped() {
        let w = SandWorkload::new("true", &measured_session((10, 5_000), (20, 7_500), 30));
        assert_eq!(w.cpu_delta_usec, 2_500);
        assert_eq!(w.memory_peak_bytes, 30);

        // A counter reset on the daemon must not underflow.
        let w = SandWorkload::new("true", &measured_session((10, 9_000), (20, 100), 30));
        assert_eq!(w.cpu_delta_usec, 0);
    }

    #[test]
    fn test_report_json_omits_absent_sections() {
        let report = BenchReport {
            generated_at: Utc::now(),
            hardware: HardwareInfo::default(),
            sandkasten: Some(SandReport {
                host: "http://127.0.0.1:8080".to_string(),
                image: String::new(),
                workspace: WorkspaceOptions {
                    mode: WorkspaceMode::PerRun,
                    id: None,
                    prefix: "sandbench".to_string(),
                    cleanup: true,
                },
                cold_runs: vec![SandRun {
                    mode: RunMode::Cold,
                    session_id: "s1".to_string(),
                    workspace_id: None,
                    startup_ms: 1.5,
                    classified_pooled: false,
                    acquire_detail: None,
                    startup_memory_bytes: 1024,
                    startup_cpu_usec: 10,
                    workload: None,
                }],
                warm_runs: Vec::new(),
                existing_runs: Vec::new(),
                cold_summary: SandSummary::default(),
                warm_summary: SandSummary::default(),
                existing_summary: ExistingSummary::default(),
            }),
            docker: None,
        };

        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("docker").is_none());
        assert!(value["generated_at"].is_string());
        let sand = &value["sandkasten"];
        assert_eq!(sand["workspace"]["mode"], "per-run");
        assert!(sand["workspace"].get("id").is_none());
        let run = &sand["cold_runs"][0];
        assert_eq!(run["mode"], "cold");
        assert_eq!(run["classified_pooled"], false);
        assert!(run.get("workload").is_none());
        assert!(run.get("workspace_id").is_none());
        assert_eq!(sand["warm_summary"]["count"], 0);
    }
}
