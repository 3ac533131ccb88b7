//! Sandkasten scenario runners: cold, warm and existing sessions.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::cleanup::{Janitor, Teardown};
use super::summary::{summarize_sand, summarize_sand_existing};
use super::workload::measure;
use super::workspace::WorkspaceManager;
use super::startup_ms;
use crate::backend::{BenchError, CreateSession, SandkastenApi};
use crate::config::{BenchConfig, SandkastenSettings, WorkloadSettings, WorkspaceOptions};
use crate::report::{RunMode, SandExistingRun, SandReport, SandRun, SandWorkload};

/// Cadence of session listing while waiting for a warm pool slot.
const POOL_POLL: Duration = Duration::from_millis(200);

/// Runs every configured Sandkasten scenario against one daemon.
pub(crate) struct SandRunner<S: SandkastenApi + 'static> {
    client: Arc<S>,
    settings: SandkastenSettings,
    workload: WorkloadSettings,
    workspace: WorkspaceOptions,
    workspaces: WorkspaceManager<S>,
    janitor: Janitor,
}

impl<S: SandkastenApi + 'static> SandRunner<S> {
    pub fn new(client: Arc<S>, config: &BenchConfig, janitor: &Janitor) -> Self {
        Self {
            workspaces: WorkspaceManager::new(Arc::clone(&client), &config.workspace, janitor),
            client,
            settings: config.sandkasten.clone(),
            workload: config.workload.clone(),
            workspace: config.workspace.clone(),
            janitor: janitor.clone(),
        }
    }

    /// Runs cold, warm and existing scenarios in that order.
    pub async fn run(&self) -> Result<SandReport> {
        let shared = self.workspaces.prepare_shared().await?;
        let result = self.run_scenarios().await;
        if let Some(lease) = shared {
            lease.release().await;
        }
        result
    }

    async fn run_scenarios(&self) -> Result<SandReport> {
        let mut cold_runs = Vec::with_capacity(self.settings.cold_runs as usize);
        for n in 1..=self.settings.cold_runs {
            let ws = self.workspaces.for_run().await?;
            let result = self.cold(ws.id()).await;
            ws.release().await;
            let run = result.with_context(|| format!("cold run {n}"))?;
            info!(
                "Cold run {}/{}: {:.2}ms pooled={}",
                n, self.settings.cold_runs, run.startup_ms, run.classified_pooled
            );
            cold_runs.push(run);
        }

        let mut warm_runs = Vec::with_capacity(self.settings.warm_runs as usize);
        for n in 1..=self.settings.warm_runs {
            let ws = self.workspaces.for_run().await?;
            let result = self.warm(ws.id()).await;
            ws.release().await;
            let run = result.with_context(|| format!("warm run {n}"))?;
            info!(
                "Warm run {}/{}: {:.2}ms pooled={}",
                n, self.settings.warm_runs, run.startup_ms, run.classified_pooled
            );
            warm_runs.push(run);
        }

        let mut existing_runs = Vec::with_capacity(self.settings.existing_ids.len());
        for id in &self.settings.existing_ids {
            let run = self
                .existing(id)
                .await
                .with_context(|| format!("existing session {id}"))?;
            existing_runs.push(run);
        }

        Ok(SandReport {
            host: self.settings.host.clone(),
            image: self.settings.image.clone(),
            workspace: self.workspace.clone(),
            cold_summary: summarize_sand(&cold_runs),
            warm_summary: summarize_sand(&warm_runs),
            existing_summary: summarize_sand_existing(&existing_runs),
            cold_runs,
            warm_runs,
            existing_runs,
        })
    }

    /// Drains every matching idle pool slot, then measures a create.
    ///
    /// Drained and measured sessions are destroyed before this returns.
    async fn cold(&self, workspace: Option<&str>) -> Result<SandRun> {
        let mut teardown = Teardown::new(Arc::clone(&self.client), &self.janitor);
        let result = self.cold_inner(workspace, &mut teardown).await;
        teardown.finish().await;
        result
    }

    async fn cold_inner(
        &self,
        workspace: Option<&str>,
        teardown: &mut Teardown<S>,
    ) -> Result<SandRun> {
        let idle = self
            .client
            .list_sessions()
            .await
            .context("list sessions")?
            .iter()
            .filter(|s| s.is_idle_match(&self.settings.image, None))
            .count();

        if idle > 0 {
            debug!("Draining {} idle pool session(s)", idle);
        }
        let drain = CreateSession::new(&self.settings.image, self.settings.ttl_seconds, None);
        for _ in 0..idle {
            let (info, _) = self
                .client
                .create_session(&drain)
                .await
                .context("drain pool")?;
            teardown.track(info.id);
        }

        self.run_one(RunMode::Cold, workspace, teardown).await
    }

    /// Waits for a matching idle pool slot, then measures a create.
    async fn warm(&self, workspace: Option<&str>) -> Result<SandRun> {
        if let Err(first) = self.wait_pool_idle(workspace).await {
            let Some(ws) = workspace else {
                return Err(first.into());
            };
            // Workspace pools are built on demand; one create primes it.
            debug!("No idle session for workspace {}, priming pool", ws);
            let mut primer = Teardown::new(Arc::clone(&self.client), &self.janitor);
            let request = CreateSession::new(&self.settings.image, self.settings.ttl_seconds, Some(ws));
            let primed = self.client.create_session(&request).await;
            if let Ok((ref info, _)) = primed {
                primer.track(info.id.clone());
            }
            primer.finish().await;
            primed.with_context(|| format!("wait pool idle failed ({first}), and workspace prime create failed"))?;

            self.wait_pool_idle(workspace)
                .await
                .context("workspace pool not ready after priming")?;
        }

        let mut teardown = Teardown::new(Arc::clone(&self.client), &self.janitor);
        let result = self.run_one(RunMode::Warm, workspace, &mut teardown).await;
        teardown.finish().await;
        result
    }

    /// Polls the session list until a matching `pool_idle` session shows up.
    /// List errors count as "not yet".
    async fn wait_pool_idle(&self, workspace: Option<&str>) -> Result<(), BenchError> {
        let image = self.settings.image.as_str();
        let deadline = Instant::now() + self.settings.warm_wait;
        loop {
            match self.client.list_sessions().await {
                Ok(sessions) if sessions.iter().any(|s| s.is_idle_match(image, workspace)) => {
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => debug!("Listing sessions failed while waiting for pool: {}", e),
            }
            if Instant::now() >= deadline {
                return Err(BenchError::timeout(
                    format!("pool_idle session (image={image:?} workspace_id={workspace:?})"),
                    self.settings.warm_wait,
                ));
            }
            sleep(POOL_POLL).await;
        }
    }

    /// Creates, samples and optionally loads one session. The session is
    /// handed to `teardown` as soon as it exists.
    async fn run_one(
        &self,
        mode: RunMode,
        workspace: Option<&str>,
        teardown: &mut Teardown<S>,
    ) -> Result<SandRun> {
        let request = CreateSession::new(&self.settings.image, self.settings.ttl_seconds, workspace);
        let (info, latency) = self
            .client
            .create_session(&request)
            .await
            .context("create session")?;
        teardown.track(info.id.clone());

        let stats = self
            .client
            .sample(&info.id)
            .await
            .with_context(|| format!("stats for session {}", info.id))?;

        let workload = match self.workload.command.as_str() {
            "" => None,
            cmd => {
                let measured = measure(
                    &self.client,
                    &info.id,
                    cmd,
                    self.workload.timeout_ms,
                    self.workload.poll,
                )
                .await
                .with_context(|| format!("workload in session {}", info.id))?;
                Some(SandWorkload::new(cmd, &measured))
            }
        };

        Ok(SandRun {
            mode,
            classified_pooled: info.acquired_from_pool(),
            session_id: info.id,
            workspace_id: workspace.map(String::from),
            startup_ms: startup_ms(latency),
            acquire_detail: info.acquire_detail.filter(|d| !d.is_empty()),
            startup_memory_bytes: stats.memory_bytes,
            startup_cpu_usec: stats.cpu_usage_usec,
            workload,
        })
    }

    /// Samples a caller-provided session and runs the workload, or the ping
    /// command when no workload is configured.
    async fn existing(&self, id: &str) -> Result<SandExistingRun> {
        let stats = self.client.sample(id).await.context("stats")?;

        let cmd = if self.workload.command.is_empty() {
            self.settings.existing_ping_cmd.as_str()
        } else {
            self.workload.command.as_str()
        };
        let workload = if cmd.is_empty() {
            None
        } else {
            let measured = measure(&self.client, id, cmd, self.workload.timeout_ms, self.workload.poll)
                .await
                .context("workload")?;
            Some(SandWorkload::new(cmd, &measured))
        };

        Ok(SandExistingRun {
            session_id: id.to_string(),
            memory_bytes: stats.memory_bytes,
            cpu_usage_usec: stats.cpu_usage_usec,
            workload,
        })
    }
}
