//! Debug sink: JSON error reports for operators
//!
//! The sink is the only cross-request side-effect channel. It is an
//! interface so tests can substitute an in-memory collector; the file
//! implementation writes one JSON file per report and swallows every I/O
//! failure, since diagnostics must never take the proxy down.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// One recorded failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub ts: String,
    /// `"request"` (translation), `"upstream"` (pre-stream), or `"stream"`.
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub kind: String,
    pub message: String,
    /// SHA-256 of the redacted request payload, for correlating reports
    /// without storing prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_digest: Option<String>,
    /// Raw stream chunks leading up to the failure (verbosity 2 only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<String>>,
}

impl ErrorReport {
    pub fn new(stage: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now().to_rfc3339(),
            stage: stage.into(),
            provider: None,
            model: None,
            status: None,
            kind: kind.into(),
            message: message.into(),
            payload_digest: None,
            chunks: None,
        }
    }
}

/// Observer for failures the proxy wants an operator to see.
pub trait DebugSink: Send + Sync {
    fn record(&self, report: ErrorReport);

    /// Whether the server should buffer stream chunks for reports.
    fn wants_chunks(&self) -> bool {
        false
    }
}

/// Disabled sink.
pub struct NullSink;

impl DebugSink for NullSink {
    fn record(&self, _report: ErrorReport) {}
}

/// Writes one JSON file per report under an operator-supplied directory.
pub struct FileSink {
    dir: PathBuf,
    level: u8,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>, level: u8) -> Self {
        Self {
            dir: dir.into(),
            level,
        }
    }
}

impl DebugSink for FileSink {
    fn record(&self, report: ErrorReport) {
        if fs::create_dir_all(&self.dir).is_err() {
            return;
        }
        let name = format!(
            "{}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            uuid::Uuid::new_v4().simple()
        );
        if let Ok(json) = serde_json::to_vec_pretty(&report) {
            let _ = fs::write(self.dir.join(name), json);
        }
    }

    fn wants_chunks(&self) -> bool {
        self.level >= 2
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemorySink {
    reports: Mutex<Vec<ErrorReport>>,
    pub buffer_chunks: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().expect("sink lock").clone()
    }
}

impl DebugSink for MemorySink {
    fn record(&self, report: ErrorReport) {
        self.reports.lock().expect("sink lock").push(report);
    }

    fn wants_chunks(&self) -> bool {
        self.buffer_chunks
    }
}

/// SHA-256 digest of a request payload with secret-looking fields redacted.
pub fn payload_digest(payload: &Value) -> String {
    let mut redacted = payload.clone();
    if let Some(obj) = redacted.as_object_mut() {
        for key in ["api_key", "apiKey", "token", "authorization", "secret"] {
            if obj.contains_key(key) {
                obj.insert(key.to_string(), Value::String("[REDACTED]".to_string()));
            }
        }
    }
    let json = serde_json::to_string(&redacted).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}
