//! Plain-text rendering of a [`BenchReport`].

use colored::Colorize;
use std::fmt::Write;

use super::{
    BenchReport, DockerExistingRun, DockerExistingSummary, DockerReport, DockerRun, DockerSummary,
    ExistingSummary, SandExistingRun, SandReport, SandRun, SandSummary,
};
use crate::bench::{bytes_to_mib, usec_to_ms};

/// Renders the report as the human-readable layout.
pub(crate) fn render(report: &BenchReport) -> String {
    let mut out = String::new();
    let hw = &report.hardware;

    let _ = writeln!(
        out,
        "{}",
        format!("Sandbench report ({})", report.generated_at.to_rfc3339()).bold()
    );
    let _ = writeln!(
        out,
        "Host: {} | Kernel: {} | CPU: {} ({} cores) | RAM: {} MiB\n",
        hw.hostname, hw.kernel, hw.cpu_model, hw.logical_cpus, hw.memory_total_mb
    );

    if let Some(ref sand) = report.sandkasten {
        render_sandkasten(&mut out, sand);
        out.push('\n');
    }
    if let Some(ref docker) = report.docker {
        render_docker(&mut out, docker);
    }
    out
}

fn render_sandkasten(out: &mut String, report: &SandReport) {
    let image = if report.image.is_empty() {
        "<default>"
    } else {
        report.image.as_str()
    };
    let title = format!(
        "Sandkasten ({}, image={}, workspace={})",
        report.host, image, report.workspace.mode
    );
    let _ = writeln!(out, "{}", title.cyan().bold());
    render_sand_runs(out, "Cold", &report.cold_runs, &report.cold_summary);
    render_sand_runs(out, "Warm", &report.warm_runs, &report.warm_summary);
    render_sand_existing(out, &report.existing_runs, &report.existing_summary);
}

fn render_sand_runs(out: &mut String, label: &str, runs: &[SandRun], s: &SandSummary) {
    let _ = writeln!(
        out,
        "  {}: runs={} avg={:.2}ms min={:.2}ms max={:.2}ms pooled={} mem={:.2}MiB cpu={:.2}ms",
        label,
        s.count,
        s.startup_avg_ms,
        s.startup_min_ms,
        s.startup_max_ms,
        s.pooled_hits,
        s.startup_mem_avg_mib,
        s.startup_cpu_avg_ms
    );
    if s.workload_count > 0 {
        let _ = writeln!(
            out,
            "    workload: avg={:.2}ms cpu={:.2}ms mem_peak={:.2}MiB non_zero={}",
            s.workload_avg_ms, s.workload_cpu_avg_ms, s.workload_mem_peak_avg_mib, s.workload_exit_non_zero
        );
    }

    let mut ordered: Vec<&SandRun> = runs.iter().collect();
    ordered.sort_by(|a, b| a.startup_ms.total_cmp(&b.startup_ms));
    for r in ordered {
        let _ = writeln!(
            out,
            "    - id={} startup={:.2}ms pooled={} mem={:.2}MiB cpu={:.2}ms",
            r.session_id,
            r.startup_ms,
            r.classified_pooled,
            bytes_to_mib(r.startup_memory_bytes),
            usec_to_ms(r.startup_cpu_usec)
        );
    }
}

fn render_sand_existing(out: &mut String, runs: &[SandExistingRun], s: &ExistingSummary) {
    if runs.is_empty() {
        return;
    }
    let _ = writeln!(
        out,
        "  Existing sessions: count={} mem_avg={:.2}MiB cpu_avg={:.2}ms",
        s.count, s.memory_avg_mib, s.cpu_avg_ms
    );
    if s.workload_count > 0 {
        let _ = writeln!(
            out,
            "    workload: avg={:.2}ms cpu={:.2}ms mem_peak={:.2}MiB non_zero={}",
            s.workload_avg_ms, s.workload_cpu_avg_ms, s.workload_mem_peak_avg_mib, s.workload_exit_non_zero
        );
    }
}

fn render_docker(out: &mut String, report: &DockerReport) {
    let _ = writeln!(out, "{}", format!("Docker (image={})", report.image).cyan().bold());
    render_docker_runs(out, &report.runs, &report.summary);
    render_docker_existing(out, &report.existing_runs, &report.existing_summary);
}

fn render_docker_runs(out: &mut String, runs: &[DockerRun], s: &DockerSummary) {
    let _ = writeln!(
        out,
        "  Runs: count={} avg={:.2}ms min={:.2}ms max={:.2}ms mem={:.2}MiB cpu={:.2}%",
        s.count, s.startup_avg_ms, s.startup_min_ms, s.startup_max_ms, s.startup_mem_avg_mib, s.startup_cpu_avg_percent
    );
    if s.workload_count > 0 {
        let _ = writeln!(
            out,
            "    workload: avg={:.2}ms mem_peak={:.2}MiB cpu_peak={:.2}% non_zero={}",
            s.workload_avg_ms, s.workload_mem_peak_avg_mib, s.workload_cpu_peak_avg_percent, s.workload_exit_non_zero
        );
    }

    let mut ordered: Vec<&DockerRun> = runs.iter().collect();
    ordered.sort_by(|a, b| a.startup_ms.total_cmp(&b.startup_ms));
    for r in ordered {
        let _ = writeln!(
            out,
            "    - id={} startup={:.2}ms mem={:.2}MiB cpu={:.2}%",
            r.container_id,
            r.startup_ms,
            bytes_to_mib(r.startup_memory_bytes),
            r.startup_cpu_percent
        );
    }
}

fn render_docker_existing(out: &mut String, runs: &[DockerExistingRun], s: &DockerExistingSummary) {
    if runs.is_empty() {
        return;
    }
    let _ = writeln!(
        out,
        "  Existing containers: count={} mem_avg={:.2}MiB cpu_avg={:.2}%",
        s.count, s.memory_avg_mib, s.cpu_avg_percent
    );
    if s.workload_count > 0 {
        let _ = writeln!(
            out,
            "    workload: avg={:.2}ms mem_peak={:.2}MiB cpu_peak={:.2}% non_zero={}",
            s.workload_avg_ms, s.workload_mem_peak_avg_mib, s.workload_cpu_peak_avg_percent, s.workload_exit_non_zero
        );
    }
}
