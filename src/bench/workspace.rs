//! Workspace selection for Sandkasten runs.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use super::cleanup::{Janitor, WorkspaceLease};
use crate::backend::SandkastenApi;
use crate::config::{new_workspace_id, WorkspaceMode, WorkspaceOptions};

/// Hands out a workspace id per run according to the configured mode.
pub(crate) struct WorkspaceManager<S: SandkastenApi + 'static> {
    client: Arc<S>,
    options: WorkspaceOptions,
    janitor: Janitor,
}

/// Workspace bound to one run. Per-run workspaces are deleted on release or
/// drop when cleanup is enabled.
pub(crate) struct RunWorkspace<S: SandkastenApi + 'static> {
    id: Option<String>,
    lease: Option<WorkspaceLease<S>>,
}

impl<S: SandkastenApi + 'static> RunWorkspace<S> {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub async fn release(self) {
        if let Some(lease) = self.lease {
            lease.release().await;
        }
    }
}

impl<S: SandkastenApi + 'static> WorkspaceManager<S> {
    pub fn new(client: Arc<S>, options: &WorkspaceOptions, janitor: &Janitor) -> Self {
        Self {
            client,
            options: options.clone(),
            janitor: janitor.clone(),
        }
    }

    /// Ensures the shared workspace exists.
    ///
    /// Returns a lease that deletes it when the benchmark ends, or `None`
    /// outside shared mode.
    pub async fn prepare_shared(&self) -> Result<Option<WorkspaceLease<S>>> {
        let (WorkspaceMode::Shared, Some(id)) = (self.options.mode, self.options.id.as_deref())
        else {
            return Ok(None);
        };
        self.client
            .ensure_workspace(id)
            .await
            .with_context(|| format!("ensure shared workspace {id}"))?;
        debug!("Shared workspace {} ready", id);
        Ok(Some(WorkspaceLease::new(
            Arc::clone(&self.client),
            id,
            self.options.cleanup,
            &self.janitor,
        )))
    }

    /// Picks the workspace for the next run.
    pub async fn for_run(&self) -> Result<RunWorkspace<S>> {
        match self.options.mode {
            WorkspaceMode::None => Ok(RunWorkspace {
                id: None,
                lease: None,
            }),
            WorkspaceMode::Shared => Ok(RunWorkspace {
                id: self.options.id.clone(),
                lease: None,
            }),
            WorkspaceMode::PerRun => {
                let id = new_workspace_id(&self.options.prefix);
                self.client
                    .ensure_workspace(&id)
                    .await
                    .with_context(|| format!("ensure per-run workspace {id}"))?;
                debug!("Per-run workspace {} ready", id);
                let lease = WorkspaceLease::new(
                    Arc::clone(&self.client),
                    &id,
                    self.options.cleanup,
                    &self.janitor,
                );
                Ok(RunWorkspace {
                    id: Some(id),
                    lease: Some(lease),
                })
            }
        }
    }
}
