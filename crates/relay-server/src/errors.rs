//! Error types for the relay core and its transport glue.

use serde_json::json;
use thiserror::Error;

/// Errors raised while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The accept loop failed.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

/// Recoverable protocol errors, answered to the sender only.
///
/// The `Display` text is the exact wire string of the `error` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON.
    #[error("Invalid JSON")]
    InvalidJson,
    /// `token` or `form_name` is missing.
    #[error("Invalid message format")]
    InvalidFormat,
    /// `token` does not match the shared secret.
    #[error("Invalid token")]
    InvalidToken,
    /// `form_name` is not in the allowed set.
    #[error("Invalid form_name")]
    InvalidFormName,
}

impl ProtocolError {
    /// Serialized `{"error": "..."}` reply.
    pub fn reply(self) -> String {
        json!({ "error": self.to_string() }).to_string()
    }

    /// Short label for metrics.
    pub fn label(self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::InvalidFormat => "invalid_format",
            Self::InvalidToken => "invalid_token",
            Self::InvalidFormName => "invalid_form_name",
        }
    }
}
