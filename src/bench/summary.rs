//! Reduces run lists to summary statistics.
//!
//! All averages are arithmetic. An empty list yields an all-zero summary.

use crate::report::{
    DockerExistingRun, DockerExistingSummary, DockerRun, DockerSummary, ExistingSummary,
    SandExistingRun, SandRun, SandSummary,
};

/// Converts bytes to binary mebibytes.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn bytes_to_mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Converts microseconds to milliseconds.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn usec_to_ms(usec: u64) -> f64 {
    usec as f64 / 1000.0
}

#[allow(clippy::cast_precision_loss)]
fn avg(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn min(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::min).unwrap_or_default()
}

fn max(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or_default()
}

/// Workload subtotals shared by every summary shape.
#[derive(Default)]
struct WorkloadTally {
    durations: Vec<f64>,
    cpu: Vec<f64>,
    mem_peak: Vec<f64>,
    non_zero: usize,
}

impl WorkloadTally {
    #[allow(clippy::cast_precision_loss)]
    fn add(&mut self, duration_ms: u64, cpu: f64, mem_peak_bytes: u64, exit_code: i32) {
        self.durations.push(duration_ms as f64);
        self.cpu.push(cpu);
        self.mem_peak.push(bytes_to_mib(mem_peak_bytes));
        if exit_code != 0 {
            self.non_zero += 1;
        }
    }
}

pub(crate) fn summarize_sand(runs: &[SandRun]) -> SandSummary {
    if runs.is_empty() {
        return SandSummary::default();
    }
    let startup: Vec<f64> = runs.iter().map(|r| r.startup_ms).collect();
    let mem: Vec<f64> = runs.iter().map(|r| bytes_to_mib(r.startup_memory_bytes)).collect();
    let cpu: Vec<f64> = runs.iter().map(|r| usec_to_ms(r.startup_cpu_usec)).collect();

    let mut tally = WorkloadTally::default();
    for w in runs.iter().filter_map(|r| r.workload.as_ref()) {
        tally.add(w.duration_ms, usec_to_ms(w.cpu_delta_usec), w.memory_peak_bytes, w.exit_code);
    }

    SandSummary {
        count: runs.len(),
        startup_avg_ms: avg(&startup),
        startup_min_ms: min(&startup),
        startup_max_ms: max(&startup),
        startup_mem_avg_mib: avg(&mem),
        startup_cpu_avg_ms: avg(&cpu),
        pooled_hits: runs.iter().filter(|r| r.classified_pooled).count(),
        workload_count: tally.durations.len(),
        workload_avg_ms: avg(&tally.durations),
        workload_cpu_avg_ms: avg(&tally.cpu),
        workload_mem_peak_avg_mib: avg(&tally.mem_peak),
        workload_exit_non_zero: tally.non_zero,
    }
}

pub(crate) fn summarize_sand_existing(runs: &[SandExistingRun]) -> ExistingSummary {
    if runs.is_empty() {
        return ExistingSummary::default();
    }
    let mem: Vec<f64> = runs.iter().map(|r| bytes_to_mib(r.memory_bytes)).collect();
    let cpu: Vec<f64> = runs.iter().map(|r| usec_to_ms(r.cpu_usage_usec)).collect();

    let mut tally = WorkloadTally::default();
    for w in runs.iter().filter_map(|r| r.workload.as_ref()) {
        tally.add(w.duration_ms, usec_to_ms(w.cpu_delta_usec), w.memory_peak_bytes, w.exit_code);
    }

    ExistingSummary {
        count: runs.len(),
        memory_avg_mib: avg(&mem),
        cpu_avg_ms: avg(&cpu),
        workload_count: tally.durations.len(),
        workload_avg_ms: avg(&tally.durations),
        workload_cpu_avg_ms: avg(&tally.cpu),
        workload_mem_peak_avg_mib: avg(&tally.mem_peak),
        workload_exit_non_zero: tally.non_zero,
    }
}

pub(crate) fn summarize_docker(runs: &[DockerRun]) -> DockerSummary {
    if runs.is_empty() {
        return DockerSummary::default();
    }
    let startup: Vec<f64> = runs.iter().map(|r| r.startup_ms).collect();
    let mem: Vec<f64> = runs.iter().map(|r| bytes_to_mib(r.startup_memory_bytes)).collect();
    let cpu: Vec<f64> = runs.iter().map(|r| r.startup_cpu_percent).collect();

    let mut tally = WorkloadTally::default();
    for w in runs.iter().filter_map(|r| r.workload.as_ref()) {
        tally.add(w.duration_ms, w.cpu_peak_percent, w.mem_peak_bytes, w.exit_code);
    }

    DockerSummary {
        count: runs.len(),
        startup_avg_ms: avg(&startup),
        startup_min_ms: min(&startup),
        startup_max_ms: max(&startup),
        startup_mem_avg_mib: avg(&mem),
        startup_cpu_avg_percent: avg(&cpu),
        workload_count: tally.durations.len(),
        workload_avg_ms: avg(&tally.durations),
        workload_mem_peak_avg_mib: avg(&tally.mem_peak),
        workload_cpu_peak_avg_percent: avg(&tally.cpu),
        workload_exit_non_zero: tally.non_zero,
    }
}

pub(crate) fn summarize_docker_existing(runs: &[DockerExistingRun]) -> DockerExistingSummary {
    if runs.is_empty() {
        return DockerExistingSummary::default();
    }
    let mem: Vec<f64> = runs.iter().map(|r| bytes_to_mib(r.memory_bytes)).collect();
    let cpu: Vec<f64> = runs.iter().map(|r| r.cpu_percent).collect();

    let mut tally = WorkloadTally::default();
    for w in runs.iter().filter_map(|r| r.workload.as_ref()) {
        tally.add(w.duration_ms, w.cpu_peak_percent, w.mem_peak_bytes, w.exit_code);
    }

    DockerExistingSummary {
        count: runs.len(),
        memory_avg_mib: avg(&mem),
        cpu_avg_percent: avg(&cpu),
        workload_count: tally.durations.len(),
        workload_avg_ms: avg(&tally.durations),
        workload_mem_peak_avg_mib: avg(&tally.mem_peak),
        workload_cpu_peak_avg_percent: avg(&tally.cpu),
        workload_exit_non_zero: tally.non_zero,
    }
}
