//! Domain-specific error types for benchmark backends.
//!
//! Typed errors let the orchestrator tell a missing Docker binary apart from a
//! daemon that answered with garbage. The workload sampler keeps polling
//! through transient I/O failures and stops at the first permanent one.

use std::time::Duration;

/// Maximum number of response-body characters kept in an `HttpStatus` error.
const BODY_EXCERPT_CHARS: usize = 512;

/// Errors that can occur while benchmarking a backend.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// Configuration was rejected before any work started.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// Network or subprocess I/O failed. Transient during sampling.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// The control API answered with a non-2xx status.
    #[error("{method} {path}: {status} {body}")]
    HttpStatus {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    /// A response could not be understood.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A wait or a workload exceeded its budget.
    #[error("timed out after {}ms waiting for {what}", waited.as_millis())]
    Timeout { what: String, waited: Duration },

    /// The backend cannot be used at all on this host.
    #[error("{backend} is not available: {message}")]
    BackendUnavailable {
        backend: &'static str,
        message: String,
    },
}

impl BenchError {
    /// Creates a `Config` error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a `Transport` error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an `HttpStatus` error, trimming the body to an excerpt.
    pub fn http_status(
        method: impl Into<String>,
        path: impl Into<String>,
        status: u16,
        body: &str,
    ) -> Self {
        let body = body.trim();
        let body = match body.char_indices().nth(BODY_EXCERPT_CHARS) {
            Some((cut, _)) => format!("{}...", &body[..cut]),
            None => body.to_string(),
        };
        Self::HttpStatus {
            method: method.into(),
            path: path.into(),
            status,
            body,
        }
    }

    /// Creates a `Protocol` error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(what: impl Into<String>, waited: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            waited,
        }
    }

    /// Creates a `BackendUnavailable` error.
    pub fn backend_unavailable(backend: &'static str, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            message: message.into(),
        }
    }

    /// Returns true if retrying the same call later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns true if the backend is missing from this host.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

impl From<reqwest::Error> for BenchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::protocol(err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}
