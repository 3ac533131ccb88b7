//! Host description recorded with every report.

use serde::Serialize;
use sysinfo::System;

const UNKNOWN: &str = "unknown";

/// Hardware and OS of the machine running the benchmark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub(crate) struct HardwareInfo {
    pub hostname: String,
    pub kernel: String,
    pub os: String,
    pub arch: String,
    pub cpu_model: String,
    pub logical_cpus: usize,
    pub memory_total_mb: u64,
    /// Version of the tool that produced the report.
    pub sandbench_version: String,
}

impl HardwareInfo {
    /// Probes the current host. Fields that cannot be read are `unknown` or 0.
    pub fn collect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();

        Self {
            hostname: System::host_name().unwrap_or_else(|| UNKNOWN.to_string()),
            kernel: System::kernel_version().unwrap_or_default(),
            os: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            arch: std::env::consts::ARCH.to_string(),
            cpu_model: sys
                .cpus()
                .first()
                .map(|cpu| cpu.brand().trim().to_string())
                .filter(|brand| !brand.is_empty())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            logical_cpus: sys.cpus().len(),
            memory_total_mb: sys.total_memory() / (1024 * 1024),
            sandbench_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
