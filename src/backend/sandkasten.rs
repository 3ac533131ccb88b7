//! Sandkasten control API client.
//!
//! JSON over HTTP with optional bearer-token auth. Every non-2xx answer
//! becomes [`BenchError::HttpStatus`] carrying method, path, status and a
//! trimmed body excerpt.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{
    Backend, BenchError, CreateSession, ExecOutcome, SandkastenApi, SessionInfo, SessionStats,
};

/// Marker file written into a workspace to materialize it.
const WORKSPACE_MARKER: &str = ".sandbench/created.txt";

/// Slack added on top of a workload timeout before the client gives up on the
/// daemon's exec response. The daemon enforces the real deadline.
const EXEC_RESPONSE_GRACE: Duration = Duration::from_secs(30);

/// HTTP adapter for a Sandkasten daemon.
#[derive(Debug, Clone)]
pub(crate) struct SandkastenClient {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

impl SandkastenClient {
    /// Creates a client for `base_url`. A blank `api_key` disables auth.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, BenchError> {
        let http = Client::builder()
            .user_agent(concat!("sandbench/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BenchError::config(format!("cannot build HTTP client: {e}")))?;
        let api_key = api_key.trim();
        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: (!api_key.is_empty()).then(|| api_key.to_string()),
            http,
        })
    }

    /// Base URL requests are sent to.
    #[cfg(test)]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends a request and returns the raw body of a 2xx response.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<String, BenchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let mut request = self.http.request(method.clone(), &url);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(ref payload) = body {
            request = request.json(payload);
        }
        if let Some(limit) = timeout {
            request = request.timeout(limit);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BenchError::timeout(
                    format!("{method} {path}"),
                    timeout.unwrap_or_default(),
                )
            } else {
                BenchError::from(e)
            }
        })?;
        let status = response.status();
        let raw = response.text().await?;

        if !status.is_success() {
            return Err(BenchError::http_status(
                method.as_str(),
                path,
                status.as_u16(),
                &raw,
            ));
        }
        Ok(raw)
    }

    /// Sends a request and decodes the JSON response body.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, BenchError> {
        let raw = self.send(method.clone(), path, body, None).await?;
        decode(&method, path, &raw)
    }
}

fn decode<T: DeserializeOwned>(method: &Method, path: &str, raw: &str) -> Result<T, BenchError> {
    serde_json::from_str(raw)
        .map_err(|e| BenchError::protocol(format!("{method} {path}: malformed response: {e}")))
}

#[async_trait]
impl Backend for SandkastenClient {
    type Snapshot = SessionStats;

    fn name(&self) -> &'static str {
        "sandkasten"
    }

    async fn sample(&self, id: &str) -> Result<SessionStats, BenchError> {
        self.call(Method::GET, &format!("/v1/sessions/{id}/stats"), None)
            .await
    }

    async fn exec(&self, id: &str, cmd: &str, timeout_ms: u64) -> Result<ExecOutcome, BenchError> {
        let path = format!("/v1/sessions/{id}/exec");
        let body = json!({ "cmd": cmd, "timeout_ms": timeout_ms });
        let limit = Duration::from_millis(timeout_ms) + EXEC_RESPONSE_GRACE;
        let raw = self
            .send(Method::POST, &path, Some(body), Some(limit))
            .await?;
        decode(&Method::POST, &path, &raw)
    }

    async fn destroy(&self, id: &str) -> Result<(), BenchError> {
        self.send(Method::DELETE, &format!("/v1/sessions/{id}"), None, None)
            .await
            .map(drop)
    }
}

#[async_trait]
impl SandkastenApi for SandkastenClient {
    async fn create_session(
        &self,
        request: &CreateSession,
    ) -> Result<(SessionInfo, Duration), BenchError> {
        let body = serde_json::to_value(request)
            .map_err(|e| BenchError::protocol(format!("cannot encode create request: {e}")))?;
        let start = Instant::now();
        let info: SessionInfo = self.call(Method::POST, "/v1/sessions", Some(body)).await?;
        let latency = start.elapsed();
        debug!(
            "Created session {} in {:?} (source={:?})",
            info.id, latency, info.acquire_source
        );
        Ok((info, latency))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, BenchError> {
        let raw = self.send(Method::GET, "/v1/sessions", None, None).await?;
        if raw.trim().is_empty() || raw.trim() == "null" {
            return Ok(Vec::new());
        }
        decode(&Method::GET, "/v1/sessions", &raw)
    }

    async fn ensure_workspace(&self, id: &str) -> Result<(), BenchError> {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let body = json!({ "path": WORKSPACE_MARKER, "text": stamp });
        self.send(
            Method::POST,
            &format!("/v1/workspaces/{id}/fs/write"),
            Some(body),
            None,
        )
        .await
        .map(drop)
    }

    async fn delete_workspace(&self, id: &str) -> Result<(), BenchError> {
        self.send(Method::DELETE, &format!("/v1/workspaces/{id}"), None, None)
            .await
            .map(drop)
    }
}
