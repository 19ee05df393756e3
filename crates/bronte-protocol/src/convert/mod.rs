//! Conversions between the Anthropic wire format and the neutral prompt model
//!
//! - [`inbound`]: wire `MessagesRequest` -> neutral prompt (request direction)
//! - [`outbound`]: neutral turns -> wire messages (driver/response direction)

pub mod inbound;
pub mod outbound;

use thiserror::Error;

/// Translation failure. These surface to the caller as HTTP 400 with the
/// matching Anthropic error kind.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("protocol invariant violated: {0}")]
    ProtocolInvariant(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
}

impl ConvertError {
    /// The wire-facing error kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProtocolInvariant(_) => "protocol_invariant",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
        }
    }
}
