//! The provider-neutral stream-event union
//!
//! Drivers translate their native chunked responses into this union; the
//! stream transcoder translates it onward into Anthropic SSE events. Events
//! from one driver invocation are strictly ordered.

use crate::{FinishReason, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event of a driver's response stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProviderEvent {
    /// A new response step begins (one model round trip).
    StepStart,

    TextStart,
    TextDelta {
        text: String,
    },
    TextEnd,

    ReasoningStart,
    ReasoningDelta {
        text: String,
    },
    ReasoningEnd,

    /// Incremental tool call: arguments follow as JSON fragments.
    ToolInputStart {
        id: String,
        tool_name: String,
    },
    ToolInputDelta {
        json_fragment: String,
    },
    ToolInputEnd,

    /// One-shot tool call with complete input (providers that do not stream
    /// arguments).
    ToolCall {
        id: String,
        tool_name: String,
        input: Value,
    },

    StepFinish {
        reason: FinishReason,
        usage: Usage,
    },

    /// End of the whole response.
    Finish,

    /// A provider-reported in-band error. Transport failures surface as
    /// stream `Err` items instead.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_type: Option<String>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },
}
