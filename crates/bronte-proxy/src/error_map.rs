//! Driver-error to Anthropic-error classification
//!
//! The mapper is a pure function from an error value to `(status, kind,
//! message)`; the server performs all writes. The mapping drives the
//! client's built-in retry behavior:
//!
//! - OpenAI `server_error` and retryable rate limits become
//!   `rate_limit_error` (429) so the client retries.
//! - OpenAI token-sized rate limits and context overflows become
//!   `request_too_large` (413) so the client shrinks the prompt instead.
//! - Transport failures become `overloaded_error` (503), also retryable.
//! - Everything else passes through as a 400 with the provider's own type.

use bronte_protocol::{wire::ErrorBody, ProviderKind};
use bronte_providers::{error_classify, DriverError};

/// A classified error ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedError {
    pub status: u16,
    pub kind: String,
    pub message: String,
}

impl MappedError {
    pub fn body(&self) -> ErrorBody {
        ErrorBody::new(self.kind.clone(), self.message.clone())
    }
}

/// Map a driver error surfaced before or during a response.
///
/// The same error value always maps to the same kind and status.
pub fn map_driver_error(provider: ProviderKind, error: &DriverError) -> MappedError {
    match error {
        DriverError::Upstream {
            code,
            error_type,
            message,
            ..
        } => classify_upstream(
            provider,
            code.as_deref(),
            error_type.as_deref(),
            message,
        ),

        DriverError::Transport(e) => overloaded(format!("upstream connection failed: {e}")),

        // The stream broke after it started; status is no longer ours to set,
        // but the kind still signals a retryable condition.
        DriverError::Stream(message) => overloaded(message.clone()),

        DriverError::InvalidResponse(message) | DriverError::Configuration(message) => {
            MappedError {
                status: 400,
                kind: "api_error".to_string(),
                message: message.clone(),
            }
        }
    }
}

/// Map a provider-reported in-band stream error (a neutral `error` event).
pub fn map_stream_error(
    provider: ProviderKind,
    code: Option<&str>,
    error_type: Option<&str>,
    message: &str,
) -> MappedError {
    classify_upstream(provider, code, error_type, message)
}

fn classify_upstream(
    provider: ProviderKind,
    code: Option<&str>,
    error_type: Option<&str>,
    message: &str,
) -> MappedError {
    if provider == ProviderKind::OpenAI {
        // 5xx from OpenAI is usually transient; surface it as retryable.
        if code == Some("server_error") {
            return rate_limited(message);
        }
        if code == Some("rate_limit_exceeded") {
            if error_type == Some("tokens") {
                return request_too_large(message);
            }
            return rate_limited(message);
        }
        if error_classify::is_context_overflow(message, code) {
            return request_too_large(message);
        }
    }

    MappedError {
        status: 400,
        kind: error_type.unwrap_or("api_error").to_string(),
        message: message.to_string(),
    }
}

fn rate_limited(message: &str) -> MappedError {
    MappedError {
        status: 429,
        kind: "rate_limit_error".to_string(),
        message: message.to_string(),
    }
}

fn request_too_large(message: &str) -> MappedError {
    MappedError {
        status: 413,
        kind: "request_too_large".to_string(),
        message: message.to_string(),
    }
}

fn overloaded(message: String) -> MappedError {
    MappedError {
        status: 503,
        kind: "overloaded_error".to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(
        provider: &str,
        code: Option<&str>,
        error_type: Option<&str>,
        message: &str,
    ) -> DriverError {
        DriverError::Upstream {
            provider: provider.to_string(),
            status: 400,
            code: code.map(str::to_string),
            error_type: error_type.map(str::to_string),
            message: message.to_string(),
            raw: None,
        }
    }

    #[test]
    fn openai_server_error_becomes_rate_limit() {
        let mapped = map_driver_error(
            ProviderKind::OpenAI,
            &upstream("openai", Some("server_error"), None, "The server had an error"),
        );
        assert_eq!(mapped.kind, "rate_limit_error");
        assert_eq!(mapped.status, 429);
    }

    #[test]
    fn openai_token_rate_limit_becomes_request_too_large() {
        let mapped = map_driver_error(
            ProviderKind::OpenAI,
            &upstream(
                "openai",
                Some("rate_limit_exceeded"),
                Some("tokens"),
                "Request too large for gpt-5",
            ),
        );
        assert_eq!(mapped.kind, "request_too_large");
        assert_eq!(mapped.status, 413);
    }

    #[test]
    fn openai_other_rate_limit_stays_retryable() {
        let mapped = map_driver_error(
            ProviderKind::OpenAI,
            &upstream(
                "openai",
                Some("rate_limit_exceeded"),
                Some("requests"),
                "Too many requests",
            ),
        );
        assert_eq!(mapped.kind, "rate_limit_error");
        assert_eq!(mapped.status, 429);
    }

    #[test]
    fn openai_context_overflow_message_maps_to_413() {
        let mapped = map_driver_error(
            ProviderKind::OpenAI,
            &upstream(
                "openai",
                Some("context_length_exceeded"),
                None,
                "This model's maximum context length is 128000 tokens",
            ),
        );
        assert_eq!(mapped.kind, "request_too_large");
        assert_eq!(mapped.status, 413);
    }

    #[test]
    fn stream_breakage_is_overloaded() {
        let mapped = map_driver_error(
            ProviderKind::Google,
            &DriverError::Stream("connection reset".to_string()),
        );
        assert_eq!(mapped.kind, "overloaded_error");
        assert_eq!(mapped.status, 503);
    }

    #[test]
    fn other_provider_errors_pass_through_as_400() {
        let mapped = map_driver_error(
            ProviderKind::Anthropic,
            &upstream(
                "anthropic",
                None,
                Some("invalid_request_error"),
                "max_tokens is required",
            ),
        );
        assert_eq!(mapped.kind, "invalid_request_error");
        assert_eq!(mapped.status, 400);
    }

    #[test]
    fn same_kind_rules_do_not_apply_to_other_providers() {
        let mapped = map_driver_error(
            ProviderKind::Xai,
            &upstream("xai", Some("server_error"), None, "boom"),
        );
        assert_eq!(mapped.kind, "api_error");
        assert_eq!(mapped.status, 400);
    }

    #[test]
    fn mid_stream_openai_server_error_rewrites() {
        let mapped = map_stream_error(
            ProviderKind::OpenAI,
            Some("server_error"),
            None,
            "The server had an error",
        );
        assert_eq!(mapped.kind, "rate_limit_error");
    }

    #[test]
    fn mapping_is_deterministic() {
        let err = upstream("openai", Some("server_error"), None, "boom");
        let a = map_driver_error(ProviderKind::OpenAI, &err);
        let b = map_driver_error(ProviderKind::OpenAI, &err);
        assert_eq!(a, b);
    }
}
