//! Anthropic native driver
//!
//! The adapter's own wire format is Anthropic's, so this driver renders the
//! neutral prompt back through the outbound converter, sends a native
//! `/v1/messages` request, and decodes Anthropic SSE into neutral events.

use async_stream::stream;
use async_trait::async_trait;
use bronte_protocol::convert::outbound::{render_prompt, RenderOptions};
use bronte_protocol::{wire, FinishReason, ProviderEvent, ProviderKind, ToolDecl, Usage};
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::sse::SseBuffer;
use crate::{DriverError, DriverRequest, EventStream, ProviderDriver};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API driver.
pub struct AnthropicDriver {
    name: String,
    api_key: SecretString,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicDriver {
    pub fn new(name: impl Into<String>, api_key: SecretString, base_url: Option<String>) -> Self {
        Self {
            name: name.into(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, request: &DriverRequest) -> Result<(MessagesBody, String), DriverError> {
        let rendered = render_prompt(
            request.system.as_deref(),
            &request.turns,
            &RenderOptions::default(),
        )
        .map_err(|e| DriverError::InvalidResponse(e.to_string()))?;

        for warning in &rendered.warnings {
            tracing::warn!(provider = %self.name, "{warning}");
        }
        let betas = rendered.betas.into_iter().collect::<Vec<_>>().join(",");

        let tools: Vec<ToolDecl> = request.tools.values().cloned().collect();
        Ok((
            MessagesBody {
                model: request.model.clone(),
                messages: rendered.messages,
                system: rendered.system,
                max_tokens: request.max_output_tokens,
                stream: true,
                temperature: request.temperature,
                top_p: request.top_p,
                stop_sequences: request.stop_sequences.clone(),
                tools: (!tools.is_empty()).then_some(tools),
                tool_choice: request.tool_choice.clone(),
                thinking: request.thinking.clone(),
                metadata: request.user_id.clone().map(|user_id| wire::Metadata {
                    user_id: Some(user_id),
                }),
            },
            betas,
        ))
    }
}

#[async_trait]
impl ProviderDriver for AnthropicDriver {
    async fn invoke(&self, request: DriverRequest) -> Result<EventStream, DriverError> {
        let (body, betas) = self.build_body(&request)?;
        let url = format!("{}/v1/messages", self.base_url);
        tracing::debug!(provider = %self.name, model = %request.model, "dispatching messages request");

        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        if !betas.is_empty() {
            builder = builder.header("anthropic-beta", betas);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error(&self.name, status, &body));
        }

        let provider = self.name.clone();
        Ok(Box::pin(stream! {
            let mut sse = SseBuffer::new();
            let mut translator = AnthropicTranslator::default();
            let mut bytes = response.bytes_stream();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(DriverError::Stream(format!(
                            "{provider} stream read failed: {e}"
                        )));
                        return;
                    }
                };
                sse.push(&chunk);

                while let Some(frame) = sse.next_frame() {
                    if frame.data.is_empty() {
                        continue;
                    }
                    let parsed: AnthropicEvent = match serde_json::from_str(&frame.data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            yield Err(DriverError::Stream(format!(
                                "{provider} sent undecodable event: {e}"
                            )));
                            return;
                        }
                    };
                    for event in translator.feed(parsed) {
                        let failed = matches!(event, ProviderEvent::Error { .. });
                        yield Ok(event);
                        if failed {
                            return;
                        }
                    }
                }
            }
        }))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Parse Anthropic's `{"type":"error","error":{"type","message"}}` shape.
fn upstream_error(provider: &str, status: u16, body: &str) -> DriverError {
    let raw: Option<Value> = serde_json::from_str(body).ok();
    let detail = raw.as_ref().and_then(|v| v.get("error"));
    DriverError::Upstream {
        provider: provider.to_string(),
        status,
        code: None,
        error_type: detail
            .and_then(|d| d.get("type"))
            .and_then(Value::as_str)
            .map(str::to_string),
        message: detail
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
            .unwrap_or(body)
            .to_string(),
        raw,
    }
}

/// What kind of block an index opened with.
#[derive(Debug, Clone, Copy)]
enum OpenKind {
    Text,
    Reasoning,
    Tool,
}

/// Anthropic SSE -> neutral events.
///
/// Anthropic already brackets blocks; this mostly re-tags events and carries
/// usage across `message_start`/`message_delta`.
#[derive(Debug, Default)]
struct AnthropicTranslator {
    open_blocks: HashMap<u64, OpenKind>,
    usage: Usage,
}

impl AnthropicTranslator {
    fn feed(&mut self, event: AnthropicEvent) -> Vec<ProviderEvent> {
        match event {
            AnthropicEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.usage.input_tokens = usage.input_tokens;
                    self.usage.cached_input_tokens = usage.cache_read_input_tokens;
                }
                vec![ProviderEvent::StepStart]
            }

            AnthropicEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                BlockStart::Text { .. } => {
                    self.open_blocks.insert(index, OpenKind::Text);
                    vec![ProviderEvent::TextStart]
                }
                BlockStart::Thinking { .. } | BlockStart::RedactedThinking { .. } => {
                    self.open_blocks.insert(index, OpenKind::Reasoning);
                    vec![ProviderEvent::ReasoningStart]
                }
                BlockStart::ToolUse { id, name, .. } => {
                    self.open_blocks.insert(index, OpenKind::Tool);
                    vec![ProviderEvent::ToolInputStart { id, tool_name: name }]
                }
            },

            AnthropicEvent::ContentBlockDelta { delta, .. } => match delta {
                BlockDelta::TextDelta { text } => vec![ProviderEvent::TextDelta { text }],
                BlockDelta::ThinkingDelta { thinking } => {
                    vec![ProviderEvent::ReasoningDelta { text: thinking }]
                }
                BlockDelta::InputJsonDelta { partial_json } => vec![ProviderEvent::ToolInputDelta {
                    json_fragment: partial_json,
                }],
                BlockDelta::SignatureDelta { .. } => Vec::new(),
            },

            AnthropicEvent::ContentBlockStop { index } => match self.open_blocks.remove(&index) {
                Some(OpenKind::Text) => vec![ProviderEvent::TextEnd],
                Some(OpenKind::Reasoning) => vec![ProviderEvent::ReasoningEnd],
                Some(OpenKind::Tool) => vec![ProviderEvent::ToolInputEnd],
                None => Vec::new(),
            },

            AnthropicEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                }
                vec![ProviderEvent::StepFinish {
                    reason: delta
                        .stop_reason
                        .as_deref()
                        .map(map_stop_reason)
                        .unwrap_or(FinishReason::Unknown),
                    usage: self.usage,
                }]
            }

            AnthropicEvent::MessageStop => vec![ProviderEvent::Finish],

            AnthropicEvent::Ping => Vec::new(),

            AnthropicEvent::Error { error } => vec![ProviderEvent::Error {
                code: None,
                error_type: Some(error.kind),
                message: error.message,
                raw: None,
            }],
        }
    }
}

fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "tool_use" => FinishReason::ToolCalls,
        "max_tokens" => FinishReason::Length,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[derive(Debug, Serialize)]
struct MessagesBody {
    model: String,
    messages: Vec<wire::Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<wire::SystemBlock>>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDecl>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<wire::ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<wire::ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<wire::Metadata>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicEvent {
    MessageStart {
        message: MessageStartBody,
    },
    ContentBlockStart {
        index: u64,
        content_block: BlockStart,
    },
    ContentBlockDelta {
        index: u64,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u64,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorDetailBody,
    },
}

#[derive(Debug, Deserialize)]
struct MessageStartBody {
    #[serde(default)]
    usage: Option<StartUsage>,
}

#[derive(Debug, Deserialize)]
struct StartUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockStart {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    RedactedThinking {
        #[serde(default)]
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    SignatureDelta { signature: String },
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorDetailBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}
