//! In-memory fakes of both backends for testing.
//!
//! `FakeDaemon` models a Sandkasten daemon with a warm pool, workspaces and
//! scripted exec/sample behaviour. `FakeDocker` models a container runtime.
//! Both record what was torn down so tests can assert nothing leaked.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{
    Backend, BenchError, ContainerApi, ContainerStats, CreateSession, ExecOutcome, SandkastenApi,
    SessionInfo, SessionStats, POOL_IDLE,
};

/// Scripted exec behaviour shared by both fakes.
#[derive(Debug, Clone)]
pub(crate) struct ExecScript {
    /// How long the command "runs".
    pub delay: Duration,
    /// Exit code when the command finishes within its timeout.
    pub exit_code: i32,
    /// Fail the exec call itself with a transport error.
    pub fail: bool,
}

impl Default for ExecScript {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(5),
            exit_code: 0,
            fail: false,
        }
    }
}

impl ExecScript {
    async fn run(&self, timeout_ms: u64) -> Result<ExecOutcome, BenchError> {
        if self.fail {
            return Err(BenchError::transport("exec connection reset"));
        }
        let limit = Duration::from_millis(timeout_ms);
        if self.delay > limit {
            tokio::time::sleep(limit).await;
            return Ok(ExecOutcome {
                exit_code: -1,
                duration_ms: timeout_ms,
            });
        }
        tokio::time::sleep(self.delay).await;
        Ok(ExecOutcome {
            exit_code: self.exit_code,
            duration_ms: u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX),
        })
    }
}

/// Error a scripted `sample` call fails with.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SampleFault {
    /// Connection-level failure; the sampler should keep polling.
    Transient,
    /// The daemon rejected the call.
    Permanent,
}

impl SampleFault {
    fn error(self, id: &str) -> BenchError {
        match self {
            Self::Transient => BenchError::transport("stats connection reset"),
            Self::Permanent => BenchError::http_status(
                "GET",
                format!("/v1/sessions/{id}/stats"),
                500,
                "cgroup read failed",
            ),
        }
    }
}

fn scripted<T: Copy + Default>(script: &[T], calls: &AtomicUsize) -> T {
    pick(script, calls.fetch_add(1, Ordering::SeqCst))
}

fn pick<T: Copy + Default>(script: &[T], n: usize) -> T {
    if script.is_empty() {
        T::default()
    } else {
        script[n % script.len()]
    }
}

#[derive(Debug, Default)]
struct DaemonState {
    sessions: Vec<SessionInfo>,
    workspaces: BTreeSet<String>,
    deleted_workspaces: Vec<String>,
    destroyed: Vec<String>,
    create_requests: Vec<CreateSession>,
    next_id: usize,
}

impl DaemonState {
    fn mint(&mut self, image: &str, status: &str, workspace_id: Option<String>) -> SessionInfo {
        self.next_id += 1;
        SessionInfo {
            id: format!("sess-{}", self.next_id),
            image: image.to_string(),
            status: status.to_string(),
            workspace_id,
            ..Default::default()
        }
    }
}

/// A fake Sandkasten daemon.
#[derive(Debug, Default)]
pub(crate) struct FakeDaemon {
    pub(crate) state: Mutex<DaemonState>,
    pub(crate) samples: AtomicUsize,
    /// Readings returned by `sample`, cycled.
    pub stats: Vec<SessionStats>,
    /// Zero-based `sample` call numbers that fail, and how.
    pub sample_faults: Vec<(usize, SampleFault)>,
    /// Behaviour of `exec`.
    pub exec: ExecScript,
    /// Image reported for sessions created without one.
    pub default_image: String,
    /// After a workspace-bound create, add an idle pooled session for that
    /// workspace (the daemon builds workspace pools on demand).
    pub build_workspace_pools: bool,
}

impl FakeDaemon {
    /// Creates a daemon whose default image is `python`.
    pub fn new() -> Self {
        Self {
            default_image: "python".to_string(),
            ..Default::default()
        }
    }

    /// Adds `count` idle pooled sessions for `image`.
    pub fn with_idle_pool(self, image: &str, count: usize) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for _ in 0..count {
                let session = state.mint(image, POOL_IDLE, None);
                state.sessions.push(session);
            }
        }
        self
    }

    /// Snapshot of all live sessions.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.state.lock().unwrap().sessions.clone()
    }

    /// Ids destroyed so far, in order.
    pub fn destroyed(&self) -> Vec<String> {
        self.state.lock().unwrap().destroyed.clone()
    }

    /// Every create request received, in order.
    pub fn create_requests(&self) -> Vec<CreateSession> {
        self.state.lock().unwrap().create_requests.clone()
    }

    /// Workspaces that currently exist.
    pub fn workspaces(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().workspaces.clone()
    }

    /// Workspaces deleted so far, in order.
    pub fn deleted_workspaces(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_workspaces.clone()
    }

    /// Number of `sample` calls served.
    pub fn sample_count(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FakeDaemon {
    type Snapshot = SessionStats;

    fn name(&self) -> &'static str {
        "fake-sandkasten"
    }

    async fn sample(&self, id: &str) -> Result<SessionStats, BenchError> {
        let known = self.state.lock().unwrap().sessions.iter().any(|s| s.id == id);
        if !known {
            return Err(BenchError::http_status(
                "GET",
                format!("/v1/sessions/{id}/stats"),
                404,
                "session not found",
            ));
        }
        let n = self.samples.fetch_add(1, Ordering::SeqCst);
        if let Some((_, fault)) = self.sample_faults.iter().find(|(call, _)| *call == n) {
            return Err(fault.error(id));
        }
        Ok(pick(&self.stats, n))
    }

    async fn exec(&self, _id: &str, _cmd: &str, timeout_ms: u64) -> Result<ExecOutcome, BenchError> {
        self.exec.run(timeout_ms).await
    }

    async fn destroy(&self, id: &str) -> Result<(), BenchError> {
        let mut state = self.state.lock().unwrap();
        let before = state.sessions.len();
        state.sessions.retain(|s| s.id != id);
        if state.sessions.len() == before {
            return Err(BenchError::http_status(
                "DELETE",
                format!("/v1/sessions/{id}"),
                404,
                "session not found",
            ));
        }
        state.destroyed.push(id.to_string());
        Ok(())
    }
}

#[async_trait]
impl SandkastenApi for FakeDaemon {
    async fn create_session(
        &self,
        request: &CreateSession,
    ) -> Result<(SessionInfo, Duration), BenchError> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        let mut state = self.state.lock().unwrap();
        state.create_requests.push(request.clone());

        let image = request
            .image
            .clone()
            .unwrap_or_else(|| self.default_image.clone());
        let workspace = request.workspace_id.as_deref();

        let pooled = state
            .sessions
            .iter_mut()
            .find(|s| s.is_idle_match(&image, workspace) && s.workspace_id.as_deref() == workspace);

        let info = if let Some(session) = pooled {
            session.status = "running".to_string();
            session.acquire_source = Some("pool".to_string());
            session.acquire_detail = Some("warm pool hit".to_string());
            session.clone()
        } else {
            let mut session = state.mint(&image, "running", workspace.map(String::from));
            session.acquire_source = Some("cold".to_string());
            state.sessions.push(session.clone());
            if self.build_workspace_pools {
                if let Some(ws) = workspace {
                    let idle = state.mint(&image, POOL_IDLE, Some(ws.to_string()));
                    state.sessions.push(idle);
                }
            }
            session
        };
        Ok((info, Duration::from_micros(1500)))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, BenchError> {
        Ok(self.sessions())
    }

    async fn ensure_workspace(&self, id: &str) -> Result<(), BenchError> {
        self.state.lock().unwrap().workspaces.insert(id.to_string());
        Ok(())
    }

    async fn delete_workspace(&self, id: &str) -> Result<(), BenchError> {
        let mut state = self.state.lock().unwrap();
        state.workspaces.remove(id);
        state.deleted_workspaces.push(id.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DockerState {
    running: BTreeSet<String>,
    removed: Vec<String>,
    next_id: u64,
}

/// A fake container runtime.
#[derive(Debug, Default)]
pub(crate) struct FakeDocker {
    pub(crate) state: Mutex<DockerState>,
    pub(crate) samples: AtomicUsize,
    /// Readings returned by `sample`, cycled.
    pub stats: Vec<ContainerStats>,
    /// Behaviour of `exec`.
    pub exec: ExecScript,
    /// Fail every `run_container` call.
    pub fail_run: bool,
}

impl FakeDocker {
    /// Registers an already running container.
    pub fn with_running(self, id: &str) -> Self {
        self.state.lock().unwrap().running.insert(id.to_string());
        self
    }

    /// Containers still running.
    pub fn running(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().running.clone()
    }

    /// Containers removed so far, in order.
    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }
}

#[async_trait]
impl Backend for FakeDocker {
    type Snapshot = ContainerStats;

    fn name(&self) -> &'static str {
        "fake-docker"
    }

    async fn sample(&self, id: &str) -> Result<ContainerStats, BenchError> {
        if !self.state.lock().unwrap().running.contains(id) {
            return Err(BenchError::transport(format!("No such container: {id}")));
        }
        Ok(scripted(&self.stats, &self.samples))
    }

    async fn exec(&self, _id: &str, _cmd: &str, timeout_ms: u64) -> Result<ExecOutcome, BenchError> {
        self.exec.run(timeout_ms).await
    }

    async fn destroy(&self, id: &str) -> Result<(), BenchError> {
        let mut state = self.state.lock().unwrap();
        state.running.remove(id);
        state.removed.push(id.to_string());
        Ok(())
    }
}

#[async_trait]
impl ContainerApi for FakeDocker {
    async fn run_container(
        &self,
        _image: &str,
        _keepalive: &str,
    ) -> Result<(String, Duration), BenchError> {
        if self.fail_run {
            return Err(BenchError::transport("docker run exited with Some(125)"));
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("{:012x}", 0xc0ffee_u64 + state.next_id);
        state.running.insert(id.clone());
        Ok((id, Duration::from_micros(250_000)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_daemon_serves_pool_then_cold() {
        let daemon = FakeDaemon::new().with_idle_pool("python", 1);

        let (first, _) = daemon
            .create_session(&CreateSession::new("python", 60, None))
            .await
            .unwrap();
        assert!(first.acquired_from_pool());

        let (second, _) = daemon
            .create_session(&CreateSession::new("python", 60, None))
            .await
            .unwrap();
        assert!(!second.acquired_from_pool());
        assert_eq!(daemon.create_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_fake_daemon_destroy_unknown_fails() {
        let daemon = FakeDaemon::new();
        assert!(daemon.destroy("missing").await.is_err());
        assert!(daemon.destroyed().is_empty());
    }

    #[tokio::test]
    async fn test_exec_script_times_out() {
        let script = ExecScript {
            delay: Duration::from_millis(500),
            ..Default::default()
        };
        let outcome = script.run(20).await.unwrap();
        assert_eq!(outcome.exit_code, -1);
        assert_eq!(outcome.duration_ms, 20);
    }

    #[tokio::test]
    async fn test_fake_docker_tracks_removal() {
        let docker = FakeDocker::default();
        let (id, _) = docker.run_container("img", "sleep").await.unwrap();
        assert!(docker.running().contains(&id));
        docker.destroy(&id).await.unwrap();
        assert!(docker.running().is_empty());
        assert_eq!(docker.removed(), vec![id]);
    }
}
