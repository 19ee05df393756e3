//! The provider-neutral prompt model
//!
//! A prompt is an ordered sequence of turns; each turn is an ordered list of
//! typed content parts. Drivers consume this model and never see the Anthropic
//! wire format directly (except the Anthropic driver, which renders it back).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a prompt turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn of the neutral prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub parts: Vec<Part>,

    /// Opaque cache annotation inherited by the turn's last part when that
    /// part carries none of its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<Value>,
}

impl Turn {
    pub fn new(role: TurnRole, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            cache_control: None,
        }
    }

    pub fn user(parts: Vec<Part>) -> Self {
        Self::new(TurnRole::User, parts)
    }

    pub fn assistant(parts: Vec<Part>) -> Self {
        Self::new(TurnRole::Assistant, parts)
    }

    pub fn tool(parts: Vec<Part>) -> Self {
        Self::new(TurnRole::Tool, parts)
    }
}

/// A typed content part within a turn.
///
/// The variants are deliberately exhaustive: adding a part type must be a
/// compile-time signal at every dispatch site, not a silent miss.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<Value>,
    },

    /// Opaque chain-of-thought carried across providers.
    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<Value>,
    },

    /// Binary or URL-addressed media. `media_type` is non-empty by the time a
    /// driver sees this part; see `normalize` in the providers crate.
    File {
        data: FileData,
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<Value>,
    },

    /// A tool invocation requested by the model. `call_id` is unique within
    /// an assistant turn; duplicates are suppressed on render.
    ToolCall {
        call_id: String,
        tool_name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<Value>,
    },

    /// A tool invocation result. `call_id` must match a preceding assistant
    /// `ToolCall` in prompt order; `tool_name` is resolved from that call.
    ToolResult {
        call_id: String,
        tool_name: String,
        output: ToolOutput,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<Value>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            cache_control: None,
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning {
            text: text.into(),
            cache_control: None,
        }
    }

    pub fn tool_call(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: Value,
    ) -> Self {
        Self::ToolCall {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            input,
            cache_control: None,
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: ToolOutput,
    ) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            output,
            cache_control: None,
        }
    }

    pub fn cache_control(&self) -> Option<&Value> {
        match self {
            Self::Text { cache_control, .. }
            | Self::Reasoning { cache_control, .. }
            | Self::File { cache_control, .. }
            | Self::ToolCall { cache_control, .. }
            | Self::ToolResult { cache_control, .. } => cache_control.as_ref(),
        }
    }
}

/// Payload of a `File` part.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileData {
    Bytes { data: Vec<u8> },
    Url { url: String },
}

/// Output of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutput {
    Text { text: String },
    Json { value: Value },
    ErrorText { text: String },
    ErrorJson { value: Value },
    Content { items: Vec<ToolResultItem> },
}

impl ToolOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::ErrorText { .. } | Self::ErrorJson { .. })
    }
}

/// One item of a multi-part tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultItem {
    Text {
        text: String,
    },
    /// Base64-encoded media with its MIME type.
    Media {
        data: String,
        media_type: String,
    },
}
