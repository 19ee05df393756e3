//! OpenAI error body parsing
//!
//! OpenAI returns errors as `{"error": {"message": "...", "type": "...",
//! "code": "..."}}`; a flat variant shows up from some compatible backends.
//! The parsed fields ride on `DriverError::Upstream` so the proxy's error
//! mapper can classify without touching the body again.

use crate::DriverError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

lazy_static! {
    // Context overflow shows up under several codes and phrasings.
    static ref CONTEXT_OVERFLOW_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)context_length_exceeded").unwrap(),
        Regex::new(r"(?i)maximum context length").unwrap(),
        Regex::new(r"(?i)exceeds.*token.*limit").unwrap(),
        Regex::new(r"(?i)reduce.*(prompt|input|context)").unwrap(),
    ];
}

/// Nested error response format (standard OpenAI format).
#[derive(Debug, Deserialize)]
struct NestedErrorResponse {
    error: FlatError,
}

/// Flat error format (rare, but some compatible backends use it).
#[derive(Debug, Deserialize)]
struct FlatError {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
}

/// Parsed fields of a provider error body.
#[derive(Debug, Default)]
pub struct ErrorInfo {
    pub message: String,
    pub error_type: Option<String>,
    pub code: Option<String>,
}

/// Parse an error body, trying the nested format first, then flat, then raw.
pub fn parse_error_body(body: &str) -> ErrorInfo {
    if let Ok(nested) = serde_json::from_str::<NestedErrorResponse>(body) {
        return ErrorInfo {
            message: nested.error.message.unwrap_or_else(|| body.to_string()),
            error_type: nested.error.error_type,
            code: nested.error.code,
        };
    }

    if let Ok(flat) = serde_json::from_str::<FlatError>(body) {
        if flat.message.is_some() || flat.error_type.is_some() || flat.code.is_some() {
            return ErrorInfo {
                message: flat.message.unwrap_or_else(|| body.to_string()),
                error_type: flat.error_type,
                code: flat.code,
            };
        }
    }

    ErrorInfo {
        message: body.to_string(),
        error_type: None,
        code: None,
    }
}

/// True when the error is a context-window overflow, whatever shape it took.
pub fn is_context_overflow(message: &str, code: Option<&str>) -> bool {
    if code == Some("context_length_exceeded") {
        return true;
    }
    CONTEXT_OVERFLOW_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(message))
}

/// Build an upstream driver error from an HTTP error response.
pub fn to_driver_error(provider: &str, status: u16, body: &str) -> DriverError {
    let info = parse_error_body(body);
    let raw: Option<Value> = serde_json::from_str(body).ok();
    DriverError::Upstream {
        provider: provider.to_string(),
        status,
        code: info.code,
        error_type: info.error_type,
        message: info.message,
        raw,
    }
}
