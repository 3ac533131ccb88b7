//! Docker runs: start, sample, optional workload, remove.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use super::cleanup::{Janitor, Teardown};
use super::startup_ms;
use super::summary::{summarize_docker, summarize_docker_existing};
use super::workload::measure;
use crate::backend::ContainerApi;
use crate::config::{BenchConfig, DockerSettings, WorkloadSettings};
use crate::report::{DockerExistingRun, DockerReport, DockerRun, DockerWorkload};

/// Runs the Docker scenarios against one container runtime.
pub(crate) struct DockerRunner<D: ContainerApi + 'static> {
    docker: Arc<D>,
    settings: DockerSettings,
    workload: WorkloadSettings,
    janitor: Janitor,
}

impl<D: ContainerApi + 'static> DockerRunner<D> {
    pub fn new(docker: Arc<D>, config: &BenchConfig, janitor: &Janitor) -> Self {
        Self {
            docker,
            settings: config.docker.clone(),
            workload: config.workload.clone(),
            janitor: janitor.clone(),
        }
    }

    pub async fn run(&self) -> Result<DockerReport> {
        let mut runs = Vec::with_capacity(self.settings.runs as usize);
        for n in 1..=self.settings.runs {
            let mut teardown = Teardown::new(Arc::clone(&self.docker), &self.janitor);
            let result = self.run_one(&mut teardown).await;
            teardown.finish().await;
            let run = result.with_context(|| format!("docker run {n}"))?;
            info!("Docker run {}/{}: {:.2}ms", n, self.settings.runs, run.startup_ms);
            runs.push(run);
        }

        let mut existing_runs = Vec::with_capacity(self.settings.existing_ids.len());
        for id in &self.settings.existing_ids {
            let run = self
                .existing(id)
                .await
                .with_context(|| format!("existing container {id}"))?;
            existing_runs.push(run);
        }

        Ok(DockerReport {
            image: self.settings.image.clone(),
            summary: summarize_docker(&runs),
            existing_summary: summarize_docker_existing(&existing_runs),
            runs,
            existing_runs,
        })
    }

    async fn run_one(&self, teardown: &mut Teardown<D>) -> Result<DockerRun> {
        let (id, latency) = self
            .docker
            .run_container(&self.settings.image, &self.settings.keepalive_cmd)
            .await
            .context("start container")?;
        teardown.track(id.clone());

        let stats = self
            .docker
            .sample(&id)
            .await
            .with_context(|| format!("stats for container {id}"))?;
        let workload = self.workload(&id).await?;

        Ok(DockerRun {
            container_id: id,
            startup_ms: startup_ms(latency),
            startup_memory_bytes: stats.memory_bytes,
            startup_cpu_percent: stats.cpu_percent,
            workload,
        })
    }

    async fn existing(&self, id: &str) -> Result<DockerExistingRun> {
        let stats = self.docker.sample(id).await.context("stats")?;
        let workload = self.workload(id).await?;
        Ok(DockerExistingRun {
            container_id: id.to_string(),
            memory_bytes: stats.memory_bytes,
            cpu_percent: stats.cpu_percent,
            workload,
        })
    }

    async fn workload(&self, id: &str) -> Result<Option<DockerWorkload>> {
        let cmd = self.workload.command.as_str();
        if cmd.is_empty() {
            return Ok(None);
        }
        let measured = measure(&self.docker, id, cmd, self.workload.timeout_ms, self.workload.poll)
            .await
            .with_context(|| format!("workload in container {id}"))?;
        Ok(Some(DockerWorkload::new(cmd, &measured)))
    }
}
