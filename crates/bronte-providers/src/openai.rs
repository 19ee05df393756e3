//! OpenAI chat-completions driver
//!
//! Also serves xAI and Azure OpenAI: both speak the same protocol, differing
//! only in base URL and auth header. The registry wires those variants up via
//! the dedicated constructors, mirroring how OpenAI-compatible providers
//! share one client.

pub mod error_classify;

use async_stream::stream;
use async_trait::async_trait;
use bronte_protocol::{
    wire::ToolChoice, FileData, FinishReason, Part, ProviderEvent, ProviderKind, ToolDecl,
    ToolOutput, ToolResultItem, Turn, TurnRole, Usage,
};
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sse::SseBuffer;
use crate::{media, DriverError, DriverRequest, EventStream, ProviderDriver};

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_XAI_BASE_URL: &str = "https://api.x.ai";
const AZURE_API_VERSION: &str = "2025-01-01-preview";

/// How the API key travels.
#[derive(Debug, Clone, Copy)]
enum AuthStyle {
    Bearer,
    ApiKeyHeader,
}

/// Driver for OpenAI-compatible chat-completions backends.
pub struct OpenAiDriver {
    name: String,
    kind: ProviderKind,
    api_key: SecretString,
    base_url: String,
    auth: AuthStyle,
    client: reqwest::Client,
}

impl OpenAiDriver {
    pub fn openai(name: impl Into<String>, api_key: SecretString, base_url: Option<String>) -> Self {
        Self::build(
            name,
            ProviderKind::OpenAI,
            api_key,
            base_url.unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            AuthStyle::Bearer,
        )
    }

    pub fn xai(name: impl Into<String>, api_key: SecretString, base_url: Option<String>) -> Self {
        Self::build(
            name,
            ProviderKind::Xai,
            api_key,
            base_url.unwrap_or_else(|| DEFAULT_XAI_BASE_URL.to_string()),
            AuthStyle::Bearer,
        )
    }

    /// Azure requires an explicit resource base URL; requests go to the
    /// deployment-scoped path with an `api-key` header.
    pub fn azure(name: impl Into<String>, api_key: SecretString, base_url: String) -> Self {
        Self::build(
            name,
            ProviderKind::Azure,
            api_key,
            base_url,
            AuthStyle::ApiKeyHeader,
        )
    }

    fn build(
        name: impl Into<String>,
        kind: ProviderKind,
        api_key: SecretString,
        base_url: String,
        auth: AuthStyle,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            client: reqwest::Client::new(),
        }
    }

    fn url_for(&self, model: &str) -> String {
        match self.kind {
            ProviderKind::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, model, AZURE_API_VERSION
            ),
            _ => format!("{}/v1/chat/completions", self.base_url),
        }
    }

    fn build_body(&self, request: &DriverRequest) -> ChatRequest {
        let messages = convert_turns(request.system.as_deref(), &request.turns);

        let tools: Vec<ChatTool> = request
            .tools
            .values()
            .filter_map(|decl| match decl {
                ToolDecl::Function(f) => Some(ChatTool {
                    kind: "function",
                    function: ChatFunction {
                        name: f.name.clone(),
                        description: f.description.clone(),
                        parameters: f.input_schema.clone(),
                    },
                }),
                ToolDecl::Builtin(v) => {
                    tracing::warn!(
                        tool = v.get("name").and_then(<serde_json::Value>::as_str).unwrap_or("?"),
                        "dropping Anthropic built-in tool for {} backend",
                        self.name
                    );
                    None
                }
            })
            .collect();
        let has_tools = !tools.is_empty();

        // Reasoning and service-tier hints apply to OpenAI proper only.
        let (reasoning_effort, reasoning_summary, service_tier) =
            if self.kind == ProviderKind::OpenAI {
                (
                    request.hints.reasoning_effort.map(|e| e.as_str()),
                    (request.hints.reasoning_effort.is_some()
                        && supports_reasoning_summary(&request.model))
                    .then_some("auto"),
                    request.hints.service_tier.map(|t| t.as_str()),
                )
            } else {
                (None, None, None)
            };

        ChatRequest {
            model: request.model.clone(),
            messages,
            max_completion_tokens: request.max_output_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop_sequences.clone(),
            user: request.user_id.clone(),
            tools: has_tools.then_some(tools),
            tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
            parallel_tool_calls: has_tools.then_some(true),
            reasoning_effort,
            reasoning_summary,
            service_tier,
        }
    }
}

#[async_trait]
impl ProviderDriver for OpenAiDriver {
    async fn invoke(&self, request: DriverRequest) -> Result<EventStream, DriverError> {
        let url = self.url_for(&request.model);
        let body = self.build_body(&request);
        tracing::debug!(provider = %self.name, model = %request.model, "dispatching chat completion");

        let mut builder = self.client.post(&url).json(&body);
        builder = match self.auth {
            AuthStyle::Bearer => builder.bearer_auth(self.api_key.expose_secret()),
            AuthStyle::ApiKeyHeader => builder.header("api-key", self.api_key.expose_secret()),
        };

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(error_classify::to_driver_error(&self.name, status, &body));
        }

        Ok(chat_event_stream(response, self.name.clone()))
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn supports_reasoning_summary(model: &str) -> bool {
    ["gpt-5", "o1", "o3", "o4"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".to_string()),
        ToolChoice::Any => Value::String("required".to_string()),
        ToolChoice::Tool { name } => serde_json::json!({
            "type": "function",
            "function": {"name": name}
        }),
    }
}

/// Render neutral turns into chat-completions messages.
fn convert_turns(system: Option<&str>, turns: &[Turn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(turns.len() + 1);

    if let Some(text) = system {
        if !text.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: Some(ChatContent::Text(text.to_string())),
                tool_calls: None,
                tool_call_id: None,
            });
        }
    }

    for turn in turns {
        match turn.role {
            TurnRole::System => {
                for part in &turn.parts {
                    if let Part::Text { text, .. } = part {
                        messages.push(ChatMessage {
                            role: "system",
                            content: Some(ChatContent::Text(text.clone())),
                            tool_calls: None,
                            tool_call_id: None,
                        });
                    }
                }
            }

            TurnRole::User => {
                let mut parts: Vec<ChatContentPart> = Vec::new();
                let mut plain = String::new();
                let mut multipart = false;
                for part in &turn.parts {
                    match part {
                        Part::Text { text, .. } => {
                            if multipart {
                                parts.push(ChatContentPart::Text { text: text.clone() });
                            } else {
                                plain.push_str(text);
                            }
                        }
                        Part::File {
                            data, media_type, ..
                        } => {
                            if !multipart {
                                multipart = true;
                                if !plain.is_empty() {
                                    parts.push(ChatContentPart::Text {
                                        text: std::mem::take(&mut plain),
                                    });
                                }
                            }
                            let url = match data {
                                FileData::Bytes { data } => media::to_data_url(media_type, data),
                                FileData::Url { url } => url.clone(),
                            };
                            parts.push(ChatContentPart::ImageUrl {
                                image_url: ChatImageUrl { url },
                            });
                        }
                        // Reasoning/tool parts do not occur in user turns.
                        _ => {}
                    }
                }
                let content = if multipart {
                    ChatContent::Parts(parts)
                } else {
                    ChatContent::Text(plain)
                };
                messages.push(ChatMessage {
                    role: "user",
                    content: Some(content),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }

            TurnRole::Assistant => {
                let mut text = String::new();
                let mut tool_calls: Vec<ChatToolCall> = Vec::new();
                for part in &turn.parts {
                    match part {
                        Part::Text { text: t, .. } => text.push_str(t),
                        // Chat completions has no reasoning input channel.
                        Part::Reasoning { .. } => {}
                        Part::ToolCall {
                            call_id,
                            tool_name,
                            input,
                            ..
                        } => tool_calls.push(ChatToolCall {
                            id: call_id.clone(),
                            kind: "function",
                            function: ChatFunctionCall {
                                name: tool_name.clone(),
                                arguments: input.to_string(),
                            },
                        }),
                        _ => {}
                    }
                }
                let has_calls = !tool_calls.is_empty();
                if text.is_empty() && !has_calls {
                    continue;
                }
                messages.push(ChatMessage {
                    role: "assistant",
                    content: (!text.is_empty()).then_some(ChatContent::Text(text)),
                    tool_calls: has_calls.then_some(tool_calls),
                    tool_call_id: None,
                });
            }

            TurnRole::Tool => {
                for part in &turn.parts {
                    if let Part::ToolResult {
                        call_id, output, ..
                    } = part
                    {
                        messages.push(ChatMessage {
                            role: "tool",
                            content: Some(ChatContent::Text(tool_output_text(output))),
                            tool_calls: None,
                            tool_call_id: Some(call_id.clone()),
                        });
                    }
                }
            }
        }
    }

    messages
}

fn tool_output_text(output: &ToolOutput) -> String {
    match output {
        ToolOutput::Text { text } | ToolOutput::ErrorText { text } => text.clone(),
        ToolOutput::Json { value } | ToolOutput::ErrorJson { value } => value.to_string(),
        ToolOutput::Content { items } => items
            .iter()
            .map(|item| match item {
                ToolResultItem::Text { text } => text.as_str(),
                ToolResultItem::Media { .. } => "[image content omitted]",
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Convert the upstream SSE response into a neutral event stream.
fn chat_event_stream(response: reqwest::Response, provider: String) -> EventStream {
    Box::pin(stream! {
        yield Ok(ProviderEvent::StepStart);

        let mut sse = SseBuffer::new();
        let mut translator = ChunkTranslator::default();
        let mut bytes = response.bytes_stream();
        let mut done = false;

        'outer: while let Some(chunk) = bytes.next().await {
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
                if frame.data.trim() == "[DONE]" {
                    done = true;
                    break 'outer;
                }
                let parsed: ChatChunk = match serde_json::from_str(&frame.data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        yield Err(DriverError::Stream(format!(
                            "{provider} sent undecodable chunk: {e}"
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

        if !done {
            tracing::debug!(%provider, "upstream stream ended without [DONE]");
        }
        for event in translator.finish() {
            yield Ok(event);
        }
    })
}

/// Open block kinds tracked while translating a chat stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Reasoning,
    Tool,
}

/// Synchronous chunk-to-events state machine.
///
/// Chat completions interleave text, `reasoning_content`, and indexed tool
/// call deltas without any bracketing; this synthesizes the neutral
/// start/delta/end triples the transcoder expects.
#[derive(Debug, Default)]
struct ChunkTranslator {
    open: Option<OpenBlock>,
    current_tool_index: Option<u64>,
    finish: Option<FinishReason>,
    usage: Usage,
}

impl ChunkTranslator {
    fn feed(&mut self, chunk: ChatChunk) -> Vec<ProviderEvent> {
        let mut events = Vec::new();

        if let Some(raw) = chunk.error {
            events.push(error_event(&raw));
            return events;
        }

        if let Some(usage) = chunk.usage {
            self.usage.input_tokens = usage.prompt_tokens;
            self.usage.output_tokens = usage.completion_tokens;
            if let Some(details) = usage.prompt_tokens_details {
                self.usage.cached_input_tokens = details.cached_tokens.unwrap_or(0);
            }
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        if let Some(reasoning) = choice.delta.reasoning_content {
            if !reasoning.is_empty() {
                self.switch_to(OpenBlock::Reasoning, &mut events);
                events.push(ProviderEvent::ReasoningDelta { text: reasoning });
            }
        }

        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                self.switch_to(OpenBlock::Text, &mut events);
                events.push(ProviderEvent::TextDelta { text });
            }
        }

        if let Some(tool_calls) = choice.delta.tool_calls {
            for call in tool_calls {
                if self.open != Some(OpenBlock::Tool) || self.current_tool_index != Some(call.index)
                {
                    self.close_open(&mut events);
                    self.open = Some(OpenBlock::Tool);
                    self.current_tool_index = Some(call.index);
                    let function = call.function.as_ref();
                    events.push(ProviderEvent::ToolInputStart {
                        id: call
                            .id
                            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4())),
                        tool_name: function
                            .and_then(|f| f.name.clone())
                            .unwrap_or_else(|| "unknown".to_string()),
                    });
                }
                if let Some(arguments) = call.function.and_then(|f| f.arguments) {
                    if !arguments.is_empty() {
                        events.push(ProviderEvent::ToolInputDelta {
                            json_fragment: arguments,
                        });
                    }
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish = Some(map_finish_reason(&reason));
        }

        events
    }

    /// Close whatever is open and emit the final step events.
    fn finish(&mut self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        self.close_open(&mut events);
        events.push(ProviderEvent::StepFinish {
            reason: self.finish.take().unwrap_or(FinishReason::Unknown),
            usage: self.usage,
        });
        events.push(ProviderEvent::Finish);
        events
    }

    fn switch_to(&mut self, block: OpenBlock, events: &mut Vec<ProviderEvent>) {
        if self.open == Some(block) && block != OpenBlock::Tool {
            return;
        }
        if self.open != Some(block) {
            self.close_open(events);
            self.open = Some(block);
            events.push(match block {
                OpenBlock::Text => ProviderEvent::TextStart,
                OpenBlock::Reasoning => ProviderEvent::ReasoningStart,
                OpenBlock::Tool => unreachable!("tool blocks open in feed"),
            });
        }
    }

    fn close_open(&mut self, events: &mut Vec<ProviderEvent>) {
        match self.open.take() {
            Some(OpenBlock::Text) => events.push(ProviderEvent::TextEnd),
            Some(OpenBlock::Reasoning) => events.push(ProviderEvent::ReasoningEnd),
            Some(OpenBlock::Tool) => {
                events.push(ProviderEvent::ToolInputEnd);
                self.current_tool_index = None;
            }
            None => {}
        }
    }
}

fn error_event(raw: &Value) -> ProviderEvent {
    let detail = raw.get("error").unwrap_or(raw);
    ProviderEvent::Error {
        code: detail
            .get("code")
            .and_then(Value::as_str)
            .map(str::to_string),
        error_type: detail
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string),
        message: detail
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("provider reported an error")
            .to_string(),
        raw: Some(raw.clone()),
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_completion_tokens: u32,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_summary: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_tier: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<ChatContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ChatImageUrl },
}

#[derive(Debug, Serialize)]
struct ChatImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    index: u64,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize, Clone)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bronte_protocol::FunctionTool;
    use serde_json::json;

    fn driver() -> OpenAiDriver {
        OpenAiDriver::openai("openai", SecretString::from("sk-test"), None)
    }

    fn request_with_tool() -> DriverRequest {
        let mut request = DriverRequest::new(
            "gpt-5",
            vec![Turn::user(vec![Part::text("hi")])],
            1024,
        );
        request.tools.insert(
            "Search".to_string(),
            ToolDecl::Function(FunctionTool {
                name: "Search".to_string(),
                description: Some("Search the web".to_string()),
                input_schema: json!({"type": "object"}),
                cache_control: None,
            }),
        );
        request
    }

    #[test]
    fn body_uses_max_completion_tokens_and_parallel_tool_calls() {
        let body = driver().build_body(&request_with_tool());
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["max_completion_tokens"], json!(1024));
        assert_eq!(value["parallel_tool_calls"], json!(true));
        assert_eq!(value["stream_options"]["include_usage"], json!(true));
        assert!(value.get("max_tokens").is_none());
    }

    #[test]
    fn reasoning_hints_apply_to_openai_only() {
        let mut request = request_with_tool();
        request.hints.reasoning_effort = Some(crate::ReasoningEffort::High);
        request.hints.service_tier = Some(crate::ServiceTier::Flex);

        let value = serde_json::to_value(driver().build_body(&request)).unwrap();
        assert_eq!(value["reasoning_effort"], json!("high"));
        assert_eq!(value["reasoning_summary"], json!("auto"));
        assert_eq!(value["service_tier"], json!("flex"));

        let xai = OpenAiDriver::xai("xai", SecretString::from("xai-test"), None);
        let value = serde_json::to_value(xai.build_body(&request)).unwrap();
        assert!(value.get("reasoning_effort").is_none());
        assert!(value.get("service_tier").is_none());
    }

    #[test]
    fn reasoning_summary_requires_capable_model() {
        let mut request = request_with_tool();
        request.model = "gpt-4.1".to_string();
        request.hints.reasoning_effort = Some(crate::ReasoningEffort::Low);
        let value = serde_json::to_value(driver().build_body(&request)).unwrap();
        assert_eq!(value["reasoning_effort"], json!("low"));
        assert!(value.get("reasoning_summary").is_none());
    }

    #[test]
    fn azure_url_targets_deployment() {
        let azure = OpenAiDriver::azure(
            "azure",
            SecretString::from("key"),
            "https://res.openai.azure.com".to_string(),
        );
        assert_eq!(
            azure.url_for("my-deployment"),
            format!(
                "https://res.openai.azure.com/openai/deployments/my-deployment/chat/completions?api-version={AZURE_API_VERSION}"
            )
        );
    }

    #[test]
    fn tool_flow_round_trips_through_messages() {
        let turns = vec![
            Turn::user(vec![Part::text("look this up")]),
            Turn::assistant(vec![Part::tool_call("call_1", "Search", json!({"q": "x"}))]),
            Turn::tool(vec![Part::tool_result(
                "call_1",
                "Search",
                ToolOutput::Text {
                    text: "found".to_string(),
                },
            )]),
        ];
        let messages = convert_turns(Some("sys"), &turns);
        let value = serde_json::to_value(&messages).unwrap();

        assert_eq!(value[0]["role"], json!("system"));
        assert_eq!(value[1]["role"], json!("user"));
        assert_eq!(value[2]["tool_calls"][0]["function"]["name"], json!("Search"));
        assert_eq!(
            value[2]["tool_calls"][0]["function"]["arguments"],
            json!("{\"q\":\"x\"}")
        );
        assert_eq!(value[3]["role"], json!("tool"));
        assert_eq!(value[3]["tool_call_id"], json!("call_1"));
        assert_eq!(value[3]["content"], json!("found"));
    }

    #[test]
    fn user_files_switch_to_multipart_content() {
        let turns = vec![Turn::user(vec![
            Part::text("see this"),
            Part::File {
                data: FileData::Bytes {
                    data: vec![0xFF, 0xD8, 0xFF],
                },
                media_type: "image/jpeg".to_string(),
                filename: None,
                cache_control: None,
            },
        ])];
        let value = serde_json::to_value(convert_turns(None, &turns)).unwrap();
        let parts = value[0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], json!("text"));
        assert_eq!(parts[1]["type"], json!("image_url"));
        assert!(parts[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
    }

    fn chunk(value: Value) -> ChatChunk {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn translator_brackets_text_deltas() {
        let mut translator = ChunkTranslator::default();

        let events = translator.feed(chunk(json!({
            "choices": [{"delta": {"role": "assistant", "content": "hi"}}]
        })));
        assert!(matches!(events[0], ProviderEvent::TextStart));
        assert!(matches!(&events[1], ProviderEvent::TextDelta { text } if text == "hi"));

        let events = translator.feed(chunk(json!({
            "choices": [{"delta": {}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        })));
        assert!(events.is_empty());

        let events = translator.finish();
        assert!(matches!(events[0], ProviderEvent::TextEnd));
        match &events[1] {
            ProviderEvent::StepFinish { reason, usage } => {
                assert_eq!(*reason, FinishReason::Stop);
                assert_eq!(usage.input_tokens, 10);
                assert_eq!(usage.output_tokens, 5);
            }
            other => panic!("expected step finish, got {other:?}"),
        }
        assert!(matches!(events[2], ProviderEvent::Finish));
    }

    #[test]
    fn translator_switches_between_tool_calls_by_index() {
        let mut translator = ChunkTranslator::default();

        let events = translator.feed(chunk(json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "function": {"name": "Search", "arguments": "{\"q\":"}}
            ]}}]
        })));
        assert!(
            matches!(&events[0], ProviderEvent::ToolInputStart { id, tool_name } if id == "call_a" && tool_name == "Search")
        );
        assert!(matches!(&events[1], ProviderEvent::ToolInputDelta { json_fragment } if json_fragment == "{\"q\":"));

        let events = translator.feed(chunk(json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"x\"}"}},
                {"index": 1, "id": "call_b", "function": {"name": "Read", "arguments": "{}"}}
            ]}}]
        })));
        assert!(matches!(&events[0], ProviderEvent::ToolInputDelta { json_fragment } if json_fragment == "\"x\"}"));
        assert!(matches!(events[1], ProviderEvent::ToolInputEnd));
        assert!(matches!(&events[2], ProviderEvent::ToolInputStart { id, .. } if id == "call_b"));
    }

    #[test]
    fn translator_separates_reasoning_from_text() {
        let mut translator = ChunkTranslator::default();

        let events = translator.feed(chunk(json!({
            "choices": [{"delta": {"reasoning_content": "thinking..."}}]
        })));
        assert!(matches!(events[0], ProviderEvent::ReasoningStart));

        let events = translator.feed(chunk(json!({
            "choices": [{"delta": {"content": "answer"}}]
        })));
        assert!(matches!(events[0], ProviderEvent::ReasoningEnd));
        assert!(matches!(events[1], ProviderEvent::TextStart));
    }

    #[test]
    fn translator_surfaces_inline_errors() {
        let mut translator = ChunkTranslator::default();
        let events = translator.feed(chunk(json!({
            "error": {"message": "The server had an error", "type": "server_error", "code": "server_error"}
        })));
        match &events[0] {
            ProviderEvent::Error { code, message, .. } => {
                assert_eq!(code.as_deref(), Some("server_error"));
                assert_eq!(message, "The server had an error");
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[test]
    fn translator_reports_cached_tokens() {
        let mut translator = ChunkTranslator::default();
        translator.feed(chunk(json!({
            "choices": [],
            "usage": {
                "prompt_tokens": 100,
                "completion_tokens": 10,
                "prompt_tokens_details": {"cached_tokens": 64}
            }
        })));
        let events = translator.finish();
        match &events[0] {
            ProviderEvent::StepFinish { usage, .. } => {
                assert_eq!(usage.cached_input_tokens, 64);
            }
            other => panic!("expected step finish, got {other:?}"),
        }
    }
}
