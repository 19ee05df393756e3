//! Google Gemini driver

use async_stream::stream;
use async_trait::async_trait;
use base64::Engine;
use bronte_protocol::{
    FileData, FinishReason, Part, ProviderEvent, ProviderKind, ToolDecl, ToolOutput,
    ToolResultItem, Turn, TurnRole, Usage,
};
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::sse::SseBuffer;
use crate::{DriverError, DriverRequest, EventStream, ProviderDriver};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini API driver.
pub struct GeminiDriver {
    name: String,
    api_key: SecretString,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiDriver {
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

    fn build_body(&self, request: &DriverRequest) -> GeminiRequest {
        let contents = convert_turns(&request.turns);

        let declarations: Vec<GeminiFunctionDeclaration> = request
            .tools
            .values()
            .filter_map(|decl| match decl {
                ToolDecl::Function(f) => Some(GeminiFunctionDeclaration {
                    name: f.name.clone(),
                    description: f.description.clone().unwrap_or_default(),
                    parameters: f.input_schema.clone(),
                }),
                ToolDecl::Builtin(v) => {
                    tracing::warn!(
                        tool = v.get("name").and_then(<serde_json::Value>::as_str).unwrap_or("?"),
                        "dropping Anthropic built-in tool for Gemini backend"
                    );
                    None
                }
            })
            .collect();

        GeminiRequest {
            contents,
            system_instruction: request.system.as_ref().map(|text| GeminiSystemInstruction {
                parts: vec![GeminiPart::Text { text: text.clone() }],
            }),
            tools: (!declarations.is_empty()).then(|| {
                vec![GeminiTools {
                    function_declarations: declarations,
                }]
            }),
            generation_config: GeminiGenerationConfig {
                max_output_tokens: request.max_output_tokens,
                temperature: request.temperature,
                top_p: request.top_p,
                stop_sequences: request.stop_sequences.clone(),
            },
        }
    }
}

#[async_trait]
impl ProviderDriver for GeminiDriver {
    async fn invoke(&self, request: DriverRequest) -> Result<EventStream, DriverError> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, request.model
        );
        let body = self.build_body(&request);
        tracing::debug!(provider = %self.name, model = %request.model, "dispatching generateContent");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error(&self.name, status, &body));
        }

        let provider = self.name.clone();
        Ok(Box::pin(stream! {
            yield Ok(ProviderEvent::StepStart);

            let mut sse = SseBuffer::new();
            let mut translator = GeminiTranslator::default();
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
                    let parsed: GeminiChunk = match serde_json::from_str(&frame.data) {
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

            for event in translator.finish() {
                yield Ok(event);
            }
        }))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Parse Google's `{"error": {"code": 429, "message", "status"}}` shape.
fn upstream_error(provider: &str, status: u16, body: &str) -> DriverError {
    let raw: Option<Value> = serde_json::from_str(body).ok();
    let detail = raw.as_ref().and_then(|v| v.get("error"));
    DriverError::Upstream {
        provider: provider.to_string(),
        status,
        code: detail
            .and_then(|d| d.get("status"))
            .and_then(Value::as_str)
            .map(str::to_string),
        error_type: None,
        message: detail
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
            .unwrap_or(body)
            .to_string(),
        raw,
    }
}

fn convert_turns(turns: &[Turn]) -> Vec<GeminiContent> {
    let mut contents = Vec::with_capacity(turns.len());

    for turn in turns {
        let role = match turn.role {
            TurnRole::Assistant => "model",
            // Gemini has no separate tool role; results ride as user parts.
            TurnRole::User | TurnRole::Tool | TurnRole::System => "user",
        };

        let mut parts = Vec::with_capacity(turn.parts.len());
        for part in &turn.parts {
            match part {
                Part::Text { text, .. } => parts.push(GeminiPart::Text { text: text.clone() }),
                Part::Reasoning { .. } => {}
                Part::File {
                    data, media_type, ..
                } => match data {
                    FileData::Bytes { data } => parts.push(GeminiPart::InlineData {
                        inline_data: GeminiInlineData {
                            mime_type: media_type.clone(),
                            data: base64::engine::general_purpose::STANDARD.encode(data),
                        },
                    }),
                    FileData::Url { url } => parts.push(GeminiPart::Text {
                        text: format!("Image URL: {url}"),
                    }),
                },
                Part::ToolCall {
                    tool_name, input, ..
                } => parts.push(GeminiPart::FunctionCall {
                    function_call: GeminiFunctionCall {
                        name: tool_name.clone(),
                        args: input.clone(),
                    },
                }),
                Part::ToolResult {
                    tool_name, output, ..
                } => parts.push(GeminiPart::FunctionResponse {
                    function_response: GeminiFunctionResponse {
                        name: tool_name.clone(),
                        response: tool_response_value(output),
                    },
                }),
            }
        }

        if !parts.is_empty() {
            contents.push(GeminiContent {
                role: role.to_string(),
                parts,
            });
        }
    }

    contents
}

fn tool_response_value(output: &ToolOutput) -> Value {
    match output {
        ToolOutput::Text { text } => json!({"result": text}),
        ToolOutput::Json { value } => json!({"result": value}),
        ToolOutput::ErrorText { text } => json!({"error": text}),
        ToolOutput::ErrorJson { value } => json!({"error": value}),
        ToolOutput::Content { items } => {
            let text = items
                .iter()
                .map(|item| match item {
                    ToolResultItem::Text { text } => text.as_str(),
                    ToolResultItem::Media { .. } => "[image content omitted]",
                })
                .collect::<Vec<_>>()
                .join("\n");
            json!({"result": text})
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Reasoning,
}

/// Chunk-to-events state machine for Gemini streams.
#[derive(Debug, Default)]
struct GeminiTranslator {
    open: Option<OpenBlock>,
    saw_tool_call: bool,
    finish: Option<FinishReason>,
    usage: Usage,
}

impl GeminiTranslator {
    fn feed(&mut self, chunk: GeminiChunk) -> Vec<ProviderEvent> {
        let mut events = Vec::new();

        if let Some(raw) = chunk.error {
            let detail = raw.get("error").unwrap_or(&raw);
            events.push(ProviderEvent::Error {
                code: detail
                    .get("status")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                error_type: None,
                message: detail
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("provider reported an error")
                    .to_string(),
                raw: Some(raw.clone()),
            });
            return events;
        }

        if let Some(usage) = chunk.usage_metadata {
            self.usage.input_tokens = usage.prompt_token_count;
            self.usage.output_tokens = usage.candidates_token_count;
            self.usage.cached_input_tokens = usage.cached_content_token_count;
        }

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return events;
        };

        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(call) = part.function_call {
                    self.close_open(&mut events);
                    self.saw_tool_call = true;
                    events.push(ProviderEvent::ToolCall {
                        id: format!("call_{}", uuid::Uuid::new_v4()),
                        tool_name: call.name,
                        input: call.args,
                    });
                    continue;
                }
                let Some(text) = part.text else { continue };
                if text.is_empty() {
                    continue;
                }
                let target = if part.thought.unwrap_or(false) {
                    OpenBlock::Reasoning
                } else {
                    OpenBlock::Text
                };
                if self.open != Some(target) {
                    self.close_open(&mut events);
                    self.open = Some(target);
                    events.push(match target {
                        OpenBlock::Text => ProviderEvent::TextStart,
                        OpenBlock::Reasoning => ProviderEvent::ReasoningStart,
                    });
                }
                events.push(match target {
                    OpenBlock::Text => ProviderEvent::TextDelta { text },
                    OpenBlock::Reasoning => ProviderEvent::ReasoningDelta { text },
                });
            }
        }

        if let Some(reason) = candidate.finish_reason {
            self.finish = Some(self.map_finish_reason(&reason));
        }

        events
    }

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

    fn map_finish_reason(&self, reason: &str) -> FinishReason {
        match reason {
            // Gemini reports STOP even when the step ended on tool calls.
            "STOP" if self.saw_tool_call => FinishReason::ToolCalls,
            "STOP" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::Length,
            "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        }
    }

    fn close_open(&mut self, events: &mut Vec<ProviderEvent>) {
        match self.open.take() {
            Some(OpenBlock::Text) => events.push(ProviderEvent::TextEnd),
            Some(OpenBlock::Reasoning) => events.push(ProviderEvent::ReasoningEnd),
            None => {}
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTools>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    args: Value,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTools {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: Option<bool>,
    #[serde(default)]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    cached_content_token_count: u64,
}
