//! Error types for VERISCAN client operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the request pipeline and progress streams.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// No response was received (connect failure, reset, client timeout).
    #[error("Network error: {message}")]
    Network { message: String },

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {}", .message.as_deref().unwrap_or("request failed"))]
    Status {
        status: u16,
        message: Option<String>,
    },

    /// The progress stream failed, closed early, or went idle.
    #[error("Stream error: {message}")]
    Stream { message: String },

    #[error("No progress event received for {timeout_ms}ms")]
    StreamIdle { timeout_ms: u64 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },
}

impl ApiError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Build a status error, extracting `error` or `message` from a JSON body.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                ["error", "message", "detail"]
                    .iter()
                    .find_map(|field| value.get(*field).and_then(|v| v.as_str()))
                    .map(str::to_string)
            })
            .or_else(|| {
                let text = String::from_utf8_lossy(body).trim().to_string();
                (!text.is_empty() && text.len() <= 512).then_some(text)
            });
        Self::Status { status, message }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            Self::Status { message, .. } => message.clone(),
            Self::Network { message } | Self::Stream { message } => Some(message.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Network failures and 5xx responses may be retried; everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn failure(&self) -> FailureReason {
        FailureReason {
            message: self.message(),
            status: self.status(),
        }
    }
}

/// Failure payload handed to callers and notification sinks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailureReason {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl From<&ApiError> for FailureReason {
    fn from(err: &ApiError) -> Self {
        err.failure()
    }
}
