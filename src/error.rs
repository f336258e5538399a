//! Error types shared by every component of the sync core.

use serde_json::Value;
use thiserror::Error;

use crate::api::Generation;

/// Errors surfaced by transport, protocol adapters and workspaces.
#[derive(Error, Debug)]
pub enum AlignError {
    /// The request never produced an HTTP response (DNS, TLS, timeout, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("Server rejected request ({status}): {detail}")]
    Api {
        status: u16,
        detail: String,
        /// Raw error body as sent by the server.
        payload: Value,
    },

    /// A 2xx body did not have the expected shape.
    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Operation '{operation}' is not supported by the {generation} protocol")]
    Unsupported {
        operation: &'static str,
        generation: Generation,
    },

    #[error("Job '{0}' is not tracked by the registry")]
    UnknownJob(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl AlignError {
    /// Build an API rejection from a status code and the (possibly empty) body.
    pub fn from_response(status: u16, reason: &str, body: &[u8]) -> Self {
        let payload: Value = serde_json::from_slice(body)
            .unwrap_or_else(|_| serde_json::json!({ "detail": reason }));
        let detail = match payload.get("detail") {
            Some(Value::String(s)) => s.clone(),
            // FastAPI validation errors carry a list of objects under `detail`.
            Some(other) if !other.is_null() => other.to_string(),
            _ => {
                if reason.is_empty() {
                    "Unknown error".to_string()
                } else {
                    reason.to_string()
                }
            }
        };
        AlignError::Api {
            status,
            detail,
            payload,
        }
    }

    pub fn decode(what: &'static str, source: serde_json::Error) -> Self {
        AlignError::Decode { what, source }
    }

    /// HTTP status for server rejections.
    pub fn status(&self) -> Option<u16> {
        match self {
            AlignError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the server reports that the addressed entity no longer matches
    /// the client's view (already resolved, renumbered, deleted).
    pub fn is_stale(&self) -> bool {
        matches!(self.status(), Some(404 | 409 | 410))
    }
}

impl From<reqwest::Error> for AlignError {
    fn from(err: reqwest::Error) -> Self {
        AlignError::Network(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AlignError>;
