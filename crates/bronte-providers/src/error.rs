//! Driver error types
//!
//! `Upstream` carries the provider's own `code`/`type` fields so the proxy's
//! error mapper can classify without re-parsing bodies. Transport failures
//! keep the original `reqwest` error.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    /// The provider answered with an error payload.
    #[error("{provider} API error {status}: {message}")]
    Upstream {
        provider: String,
        status: u16,
        code: Option<String>,
        error_type: Option<String>,
        message: String,
        raw: Option<Value>,
    },

    /// The HTTP call itself failed (DNS, connect, TLS, body read).
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The stream broke or carried an undecodable payload.
    #[error("stream error: {0}")]
    Stream(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl DriverError {
    /// True when no provider response was received at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn upstream_code(&self) -> Option<&str> {
        match self {
            Self::Upstream { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn upstream_type(&self) -> Option<&str> {
        match self {
            Self::Upstream { error_type, .. } => error_type.as_deref(),
            _ => None,
        }
    }
}
