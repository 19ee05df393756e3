//! Backend driver trait

use async_trait::async_trait;
use bronte_protocol::wire::{ThinkingConfig, ToolChoice};
use bronte_protocol::{ProviderEvent, ProviderKind, ToolDecl, Turn};
use futures::Stream;
use std::collections::BTreeMap;
use std::pin::Pin;

use crate::DriverError;

/// Stream of neutral events from one driver invocation.
///
/// Dropping the stream cancels the invocation: the underlying HTTP body
/// reader is dropped with it, which closes the upstream request.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent, DriverError>> + Send>>;

/// OpenAI reasoning effort hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::str::FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal" => Ok(Self::Minimal),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown reasoning effort: {other}")),
        }
    }
}

/// OpenAI service tier hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceTier {
    Flex,
    Priority,
}

impl ServiceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flex => "flex",
            Self::Priority => "priority",
        }
    }
}

impl std::str::FromStr for ServiceTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flex" => Ok(Self::Flex),
            "priority" => Ok(Self::Priority),
            other => Err(format!("unknown service tier: {other}")),
        }
    }
}

/// Per-provider knobs that do not belong in the neutral prompt.
///
/// Only the OpenAI driver consumes these; all other drivers ignore them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderHints {
    pub reasoning_effort: Option<ReasoningEffort>,
    pub service_tier: Option<ServiceTier>,
}

/// One driver invocation: the neutral prompt plus generation parameters.
#[derive(Debug, Clone)]
pub struct DriverRequest {
    /// Model identifier with the provider prefix already stripped.
    pub model: String,
    pub system: Option<String>,
    pub turns: Vec<Turn>,
    /// Tools keyed by name; schemas already adapted for the target provider.
    pub tools: BTreeMap<String, ToolDecl>,
    pub tool_choice: Option<ToolChoice>,
    pub max_output_tokens: u32,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
    /// `metadata.user_id` from the inbound request.
    pub user_id: Option<String>,
    /// Forwarded verbatim to the Anthropic driver; ignored elsewhere.
    pub thinking: Option<ThinkingConfig>,
    pub hints: ProviderHints,
}

impl DriverRequest {
    pub fn new(model: impl Into<String>, turns: Vec<Turn>, max_output_tokens: u32) -> Self {
        Self {
            model: model.into(),
            system: None,
            turns,
            tools: BTreeMap::new(),
            tool_choice: None,
            max_output_tokens,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            user_id: None,
            thinking: None,
            hints: ProviderHints::default(),
        }
    }
}

/// A backend driver: given a neutral prompt, produce a neutral event stream.
#[async_trait]
pub trait ProviderDriver: Send + Sync {
    async fn invoke(&self, request: DriverRequest) -> Result<EventStream, DriverError>;

    fn kind(&self) -> ProviderKind;

    /// Registry name, e.g. `"openai"` or `"xai"`.
    fn name(&self) -> &str;
}
