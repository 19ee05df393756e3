//! Common types used across the Bronte protocol

use serde::{Deserialize, Serialize};

/// Backend driver kind for model routing.
///
/// `xai` and `azure` speak OpenAI-compatible protocols but are distinct kinds
/// so the registry can wire their base URLs and auth headers differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Google,
    Xai,
    Azure,
    Anthropic,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
            Self::Google => write!(f, "google"),
            Self::Xai => write!(f, "xai"),
            Self::Azure => write!(f, "azure"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::OpenAI),
            "google" => Ok(Self::Google),
            "xai" => Ok(Self::Xai),
            "azure" => Ok(Self::Azure),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(format!("unknown driver kind: {other}")),
        }
    }
}

/// Why a generation step stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Error,
    Unknown,
}

impl FinishReason {
    /// The Anthropic `stop_reason` string for this finish reason.
    ///
    /// Anything outside {stop, tool-calls, length} maps to `"unknown"`.
    pub fn as_stop_reason(&self) -> &'static str {
        match self {
            Self::Stop => "end_turn",
            Self::ToolCalls => "tool_use",
            Self::Length => "max_tokens",
            Self::ContentFilter | Self::Error | Self::Unknown => "unknown",
        }
    }
}

/// Token usage counters. Providers vary in fidelity; missing fields are 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_input_tokens += other.cached_input_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_round_trips_through_str() {
        for kind in [
            ProviderKind::OpenAI,
            ProviderKind::Google,
            ProviderKind::Xai,
            ProviderKind::Azure,
            ProviderKind::Anthropic,
        ] {
            assert_eq!(kind.to_string().parse::<ProviderKind>(), Ok(kind));
        }
        assert!("litellm".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn finish_reason_maps_to_stop_reason() {
        assert_eq!(FinishReason::Stop.as_stop_reason(), "end_turn");
        assert_eq!(FinishReason::ToolCalls.as_stop_reason(), "tool_use");
        assert_eq!(FinishReason::Length.as_stop_reason(), "max_tokens");
        assert_eq!(FinishReason::ContentFilter.as_stop_reason(), "unknown");
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total += Usage {
            input_tokens: 10,
            output_tokens: 5,
            cached_input_tokens: 2,
        };
        total += Usage {
            input_tokens: 1,
            output_tokens: 1,
            cached_input_tokens: 0,
        };
        assert_eq!(total.input_tokens, 11);
        assert_eq!(total.output_tokens, 6);
        assert_eq!(total.cached_input_tokens, 2);
    }
}
