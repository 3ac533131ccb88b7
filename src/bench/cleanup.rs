//! Uncancellable teardown.
//!
//! Destroys and deletes are spawned as detached tokio tasks, so they run to
//! completion even when the run that requested them is cancelled. Every task
//! is recorded with a shared [`Janitor`], which `main` drains before exiting.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::{Backend, SandkastenApi};

/// Registry of detached cleanup tasks.
#[derive(Debug, Clone, Default)]
pub(crate) struct Janitor {
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Janitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` detached from the caller and records it.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime available, cleanup task dropped");
            return;
        };
        let handle = runtime.spawn(task);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Number of recorded tasks not yet awaited.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Waits for every recorded task, including ones spawned while waiting.
    pub async fn settle(&self) {
        loop {
            let batch = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                if let Err(e) = handle.await {
                    warn!("Cleanup task did not complete: {}", e);
                }
            }
        }
    }
}

/// Destroys every tracked sandbox when finished or dropped.
pub(crate) struct Teardown<B: Backend + 'static> {
    backend: Arc<B>,
    ids: Vec<String>,
    janitor: Janitor,
}

impl<B: Backend + 'static> Teardown<B> {
    pub fn new(backend: Arc<B>, janitor: &Janitor) -> Self {
        Self {
            backend,
            ids: Vec::new(),
            janitor: janitor.clone(),
        }
    }

    /// Registers a sandbox for teardown.
    pub fn track(&mut self, id: impl Into<String>) {
        self.ids.push(id.into());
    }

    /// Destroys everything tracked and waits for it.
    pub async fn finish(mut self) {
        self.launch();
        self.janitor.settle().await;
    }

    fn launch(&mut self) {
        let ids = std::mem::take(&mut self.ids);
        if ids.is_empty() {
            return;
        }
        let backend = Arc::clone(&self.backend);
        self.janitor.spawn(async move {
            for id in ids {
                match backend.destroy(&id).await {
                    Ok(()) => debug!("Destroyed {} sandbox {}", backend.name(), id),
                    Err(e) => warn!("Failed to destroy {} sandbox {}: {}", backend.name(), id, e),
                }
            }
        });
    }
}

impl<B: Backend + 'static> Drop for Teardown<B> {
    fn drop(&mut self) {
        self.launch();
    }
}

/// Deletes a workspace when released or dropped.
///
/// A lease created with `delete = false` never touches the workspace.
pub(crate) struct WorkspaceLease<S: SandkastenApi + 'static> {
    client: Arc<S>,
    id: Option<String>,
    janitor: Janitor,
}

impl<S: SandkastenApi + 'static> WorkspaceLease<S> {
    pub fn new(client: Arc<S>, id: &str, delete: bool, janitor: &Janitor) -> Self {
        Self {
            client,
            id: delete.then(|| id.to_string()),
            janitor: janitor.clone(),
        }
    }

    /// Deletes the workspace and waits for it.
    pub async fn release(mut self) {
        self.launch();
        self.janitor.settle().await;
    }

    fn launch(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let client = Arc::clone(&self.client);
        self.janitor.spawn(async move {
            match client.delete_workspace(&id).await {
                Ok(()) => debug!("Deleted workspace {}", id),
                Err(e) => warn!("Failed to delete workspace {}: {}", id, e),
            }
        });
    }
}

impl<S: SandkastenApi + 'static> Drop for WorkspaceLease<S> {
    fn drop(&mut self) {
        self.launch();
    }
}
