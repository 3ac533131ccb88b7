//! Benchmark orchestration.
//!
//! Backends run in the order Sandkasten, Docker. A failure in a backend that
//! was requested on its own is fatal. With `--target both`, a Docker failure
//! is reported on stderr and the Sandkasten results are still returned.

mod cleanup;
mod docker;
mod sandkasten;
mod summary;
mod workload;
mod workspace;

pub(crate) use cleanup::Janitor;
pub(crate) use summary::{bytes_to_mib, usec_to_ms};
pub(crate) use workload::Measured;

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::backend::{BenchError, DockerCli, SandkastenClient};
use crate::config::{BenchConfig, Target};
use crate::report::{BenchReport, DockerReport, HardwareInfo};
use docker::DockerRunner;
use sandkasten::SandRunner;

/// Converts a measured create latency to fractional milliseconds.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn startup_ms(latency: Duration) -> f64 {
    latency.as_micros() as f64 / 1000.0
}

/// Runs every requested backend and assembles the report.
pub(crate) async fn run(config: &BenchConfig, janitor: &Janitor) -> Result<BenchReport> {
    let generated_at = Utc::now();
    let hardware = HardwareInfo::collect();

    let sandkasten = if config.target.includes_sandkasten() {
        info!("Benchmarking Sandkasten at {}", config.sandkasten.host);
        let client = Arc::new(SandkastenClient::new(
            &config.sandkasten.host,
            &config.sandkasten.api_key,
        )?);
        let report = SandRunner::new(client, config, janitor)
            .run()
            .await
            .context("sandkasten benchmark failed")?;
        Some(report)
    } else {
        None
    };

    let docker = if config.target.includes_docker() {
        info!("Benchmarking Docker image {}", config.docker.image);
        settle_docker(config.target, run_docker(config, janitor).await)?
    } else {
        None
    };

    Ok(BenchReport {
        generated_at,
        hardware,
        sandkasten,
        docker,
    })
}

async fn run_docker(config: &BenchConfig, janitor: &Janitor) -> Result<DockerReport> {
    let cli = Arc::new(DockerCli::locate(&config.docker.exec_shell)?);
    DockerRunner::new(cli, config, janitor).run().await
}

/// Applies the Docker failure policy for the selected target.
fn settle_docker(target: Target, outcome: Result<DockerReport>) -> Result<Option<DockerReport>> {
    let err = match outcome {
        Ok(report) => return Ok(Some(report)),
        Err(err) => err,
    };
    let unavailable = err
        .downcast_ref::<BenchError>()
        .is_some_and(BenchError::is_backend_unavailable);

    if target == Target::Both {
        let verb = if unavailable { "skipped" } else { "failed" };
        eprintln!("sandbench: docker benchmark {verb}: {err:#}");
        return Ok(None);
    }
    if unavailable {
        Err(err.context("docker unavailable"))
    } else {
        Err(err.context("docker benchmark failed"))
    }
}
