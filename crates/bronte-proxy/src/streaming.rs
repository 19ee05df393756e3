//! Neutral event stream -> Anthropic SSE
//!
//! The transcoder is a synchronous state machine: the server feeds it neutral
//! events and writes whatever frames come back. It owns the monotone block
//! index and lives for exactly one response.
//!
//! Non-streaming requests still drive the driver's stream to completion; the
//! collector assembles the events into one assistant turn for re-emission
//! through the outbound converter.

use bronte_protocol::{FinishReason, Part, ProviderEvent, ProviderKind, Usage};
use bronte_providers::DriverError;
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::error_map::{map_driver_error, map_stream_error};

/// Translates one driver invocation into Anthropic SSE frames.
pub struct StreamTranscoder {
    model: String,
    provider: ProviderKind,
    block_index: u64,
    /// One-shot tool calls already opened in this response; duplicates from
    /// synthetic backend retries are swallowed before any block is emitted.
    seen_tool_ids: HashSet<String>,
    suppress_tool_block: bool,
    closed: bool,
}

impl StreamTranscoder {
    pub fn new(model: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            model: model.into(),
            provider,
            block_index: 0,
            seen_tool_ids: HashSet::new(),
            suppress_tool_block: false,
            closed: false,
        }
    }

    /// The stream is over; no more frames will be produced.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Translate one neutral event into zero or more SSE frames.
    pub fn feed(&mut self, event: &ProviderEvent) -> Vec<String> {
        match event {
            ProviderEvent::StepStart => vec![sse_frame(
                "message_start",
                &json!({
                    "type": "message_start",
                    "message": {
                        "id": fresh_message_id(),
                        "type": "message",
                        "role": "assistant",
                        "model": self.model,
                        "content": [],
                        "stop_reason": null,
                        "stop_sequence": null,
                        "usage": {"input_tokens": 0, "output_tokens": 0}
                    }
                }),
            )],

            ProviderEvent::TextStart => vec![self.block_start(json!({"type": "text", "text": ""}))],
            ProviderEvent::TextDelta { text } => {
                vec![self.block_delta(json!({"type": "text_delta", "text": text}))]
            }
            ProviderEvent::TextEnd => vec![self.block_stop()],

            ProviderEvent::ReasoningStart => {
                vec![self.block_start(json!({"type": "thinking", "thinking": ""}))]
            }
            // Same delta carrier as text; the open block type disambiguates.
            ProviderEvent::ReasoningDelta { text } => {
                vec![self.block_delta(json!({"type": "text_delta", "text": text}))]
            }
            ProviderEvent::ReasoningEnd => vec![self.block_stop()],

            ProviderEvent::ToolInputStart { id, tool_name } => {
                if !self.seen_tool_ids.insert(id.clone()) {
                    self.suppress_tool_block = true;
                    return Vec::new();
                }
                vec![self.block_start(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": tool_name,
                    "input": {}
                }))]
            }
            ProviderEvent::ToolInputDelta { json_fragment } => {
                if self.suppress_tool_block {
                    return Vec::new();
                }
                vec![self.block_delta(
                    json!({"type": "input_json_delta", "partial_json": json_fragment}),
                )]
            }
            ProviderEvent::ToolInputEnd => {
                if self.suppress_tool_block {
                    self.suppress_tool_block = false;
                    return Vec::new();
                }
                vec![self.block_stop()]
            }

            ProviderEvent::ToolCall {
                id,
                tool_name,
                input,
            } => {
                if !self.seen_tool_ids.insert(id.clone()) {
                    return Vec::new();
                }
                let mut frames = vec![self.block_start(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": tool_name,
                    "input": {}
                }))];
                // Input rides a single delta so the client's accumulator
                // sees it; an empty object needs no delta at all.
                if input.as_object().map_or(true, |o| !o.is_empty()) {
                    frames.push(self.block_delta(json!({
                        "type": "input_json_delta",
                        "partial_json": input.to_string()
                    })));
                }
                frames.push(self.block_stop());
                frames
            }

            ProviderEvent::StepFinish { reason, usage } => vec![sse_frame(
                "message_delta",
                &json!({
                    "type": "message_delta",
                    "delta": {"stop_reason": reason.as_stop_reason(), "stop_sequence": null},
                    "usage": wire_usage(usage)
                }),
            )],

            ProviderEvent::Finish => {
                self.closed = true;
                vec![sse_frame("message_stop", &json!({"type": "message_stop"}))]
            }

            ProviderEvent::Error {
                code,
                error_type,
                message,
                ..
            } => {
                self.closed = true;
                let mapped = map_stream_error(
                    self.provider,
                    code.as_deref(),
                    error_type.as_deref(),
                    message,
                );
                vec![error_frame(&mapped.kind, &mapped.message)]
            }
        }
    }

    /// Translate a mid-stream driver failure into a final error frame.
    pub fn feed_error(&mut self, error: &DriverError) -> Vec<String> {
        self.closed = true;
        let mapped = map_driver_error(self.provider, error);
        vec![error_frame(&mapped.kind, &mapped.message)]
    }

    fn block_start(&mut self, content_block: Value) -> String {
        sse_frame(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": content_block
            }),
        )
    }

    fn block_delta(&mut self, delta: Value) -> String {
        sse_frame(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": self.block_index,
                "delta": delta
            }),
        )
    }

    fn block_stop(&mut self) -> String {
        let frame = sse_frame(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": self.block_index}),
        );
        self.block_index += 1;
        frame
    }
}

/// Anthropic usage object for `message_delta`.
///
/// Creation tokens are always 0: no backend other than Anthropic reports
/// creation, and the Anthropic driver folds its own into the read counter.
fn wire_usage(usage: &Usage) -> Value {
    json!({
        "input_tokens": usage.input_tokens,
        "output_tokens": usage.output_tokens,
        "cache_creation_input_tokens": 0,
        "cache_read_input_tokens": usage.cached_input_tokens
    })
}

pub(crate) fn fresh_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

fn sse_frame(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

pub(crate) fn error_frame(kind: &str, message: &str) -> String {
    sse_frame(
        "error",
        &json!({
            "type": "error",
            "error": {"type": kind, "message": message}
        }),
    )
}

/// Failure while collecting a non-streaming response.
#[derive(Debug)]
pub enum CollectError {
    Driver(DriverError),
    Event {
        code: Option<String>,
        error_type: Option<String>,
        message: String,
    },
}

/// A fully collected response, ready for outbound rendering.
#[derive(Debug, Default)]
pub struct CollectedResponse {
    pub parts: Vec<Part>,
    pub usage: Usage,
    pub stop_reason: &'static str,
}

/// Drive a neutral event stream to completion and assemble the parts.
pub async fn collect(
    mut stream: bronte_providers::EventStream,
) -> Result<CollectedResponse, CollectError> {
    use futures::StreamExt;

    let mut out = CollectedResponse {
        stop_reason: FinishReason::Unknown.as_stop_reason(),
        ..Default::default()
    };
    let mut text_buffer = String::new();
    let mut reasoning_buffer = String::new();
    let mut open_tool: Option<(String, String, String)> = None;

    while let Some(item) = stream.next().await {
        match item.map_err(CollectError::Driver)? {
            ProviderEvent::StepStart | ProviderEvent::TextStart | ProviderEvent::ReasoningStart => {
            }

            ProviderEvent::TextDelta { text } => text_buffer.push_str(&text),
            ProviderEvent::TextEnd => {
                out.parts.push(Part::text(std::mem::take(&mut text_buffer)));
            }

            ProviderEvent::ReasoningDelta { text } => reasoning_buffer.push_str(&text),
            ProviderEvent::ReasoningEnd => {
                out.parts
                    .push(Part::reasoning(std::mem::take(&mut reasoning_buffer)));
            }

            ProviderEvent::ToolInputStart { id, tool_name } => {
                open_tool = Some((id, tool_name, String::new()));
            }
            ProviderEvent::ToolInputDelta { json_fragment } => {
                if let Some((_, _, buffer)) = open_tool.as_mut() {
                    buffer.push_str(&json_fragment);
                }
            }
            ProviderEvent::ToolInputEnd => {
                if let Some((id, name, buffer)) = open_tool.take() {
                    out.parts.push(Part::tool_call(id, name, parse_input(&buffer)));
                }
            }

            ProviderEvent::ToolCall {
                id,
                tool_name,
                input,
            } => out.parts.push(Part::tool_call(id, tool_name, input)),

            ProviderEvent::StepFinish { reason, usage } => {
                out.usage += usage;
                out.stop_reason = reason.as_stop_reason();
            }

            ProviderEvent::Finish => break,

            ProviderEvent::Error {
                code,
                error_type,
                message,
                ..
            } => {
                return Err(CollectError::Event {
                    code,
                    error_type,
                    message,
                })
            }
        }
    }

    Ok(out)
}

/// Accumulated tool-argument JSON; backends occasionally truncate it.
fn parse_input(buffer: &str) -> Value {
    if buffer.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(buffer).unwrap_or_else(|_| json!({"raw": buffer}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bronte_protocol::FinishReason;

    fn parse_frame(frame: &str) -> (String, Value) {
        let mut event = None;
        let mut data = None;
        for line in frame.lines() {
            if let Some(rest) = line.strip_prefix("event: ") {
                event = Some(rest.to_string());
            } else if let Some(rest) = line.strip_prefix("data: ") {
                data = Some(serde_json::from_str(rest).unwrap());
            }
        }
        (event.unwrap(), data.unwrap())
    }

    fn feed_all(transcoder: &mut StreamTranscoder, events: &[ProviderEvent]) -> Vec<(String, Value)> {
        events
            .iter()
            .flat_map(|e| transcoder.feed(e))
            .map(|f| parse_frame(&f))
            .collect()
    }

    #[test]
    fn simple_text_stream_maps_to_anthropic_sse() {
        let mut transcoder = StreamTranscoder::new("gpt-5", ProviderKind::OpenAI);
        let frames = feed_all(
            &mut transcoder,
            &[
                ProviderEvent::StepStart,
                ProviderEvent::TextStart,
                ProviderEvent::TextDelta { text: "hi".into() },
                ProviderEvent::TextEnd,
                ProviderEvent::StepFinish {
                    reason: FinishReason::Stop,
                    usage: Usage {
                        input_tokens: 10,
                        output_tokens: 5,
                        cached_input_tokens: 0,
                    },
                },
                ProviderEvent::Finish,
            ],
        );

        let names: Vec<&str> = frames.iter().map(|(e, _)| e.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );

        let (_, start) = &frames[0];
        assert!(start["message"]["id"].as_str().unwrap().starts_with("msg_"));
        assert_eq!(start["message"]["usage"]["input_tokens"], json!(0));

        assert_eq!(frames[1].1["index"], json!(0));
        assert_eq!(frames[1].1["content_block"]["type"], json!("text"));
        assert_eq!(frames[2].1["delta"]["text"], json!("hi"));
        assert_eq!(frames[3].1["index"], json!(0));

        let (_, delta) = &frames[4];
        assert_eq!(delta["delta"]["stop_reason"], json!("end_turn"));
        assert_eq!(delta["delta"]["stop_sequence"], Value::Null);
        assert_eq!(
            delta["usage"],
            json!({
                "input_tokens": 10,
                "output_tokens": 5,
                "cache_creation_input_tokens": 0,
                "cache_read_input_tokens": 0
            })
        );

        assert!(transcoder.is_closed());
    }

    #[test]
    fn block_indices_are_strictly_monotone() {
        let mut transcoder = StreamTranscoder::new("gemini-2.5-pro", ProviderKind::Google);
        let frames = feed_all(
            &mut transcoder,
            &[
                ProviderEvent::StepStart,
                ProviderEvent::ReasoningStart,
                ProviderEvent::ReasoningDelta {
                    text: "mull".into(),
                },
                ProviderEvent::ReasoningEnd,
                ProviderEvent::TextStart,
                ProviderEvent::TextDelta { text: "out".into() },
                ProviderEvent::TextEnd,
                ProviderEvent::ToolCall {
                    id: "call_1".into(),
                    tool_name: "Search".into(),
                    input: json!({"q": "x"}),
                },
            ],
        );

        let start_indices: Vec<u64> = frames
            .iter()
            .filter(|(e, _)| e == "content_block_start")
            .map(|(_, d)| d["index"].as_u64().unwrap())
            .collect();
        assert_eq!(start_indices, vec![0, 1, 2]);

        let stop_indices: Vec<u64> = frames
            .iter()
            .filter(|(e, _)| e == "content_block_stop")
            .map(|(_, d)| d["index"].as_u64().unwrap())
            .collect();
        assert_eq!(stop_indices, vec![0, 1, 2]);

        // Reasoning blocks open as thinking but stream text_delta carriers.
        assert_eq!(frames[1].1["content_block"]["type"], json!("thinking"));
        assert_eq!(frames[2].1["delta"]["type"], json!("text_delta"));
    }

    #[test]
    fn one_shot_tool_call_emits_input_delta_between_start_and_stop() {
        let mut transcoder = StreamTranscoder::new("gemini-2.5-pro", ProviderKind::Google);
        let frames = feed_all(
            &mut transcoder,
            &[ProviderEvent::ToolCall {
                id: "call_1".into(),
                tool_name: "Search".into(),
                input: json!({"q": "x"}),
            }],
        );
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].1["content_block"]["input"], json!({}));
        assert_eq!(
            frames[1].1["delta"]["partial_json"],
            json!("{\"q\":\"x\"}")
        );
        assert_eq!(frames[2].0, "content_block_stop");
    }

    #[test]
    fn duplicate_tool_calls_are_suppressed_in_streaming() {
        let mut transcoder = StreamTranscoder::new("gpt-5", ProviderKind::OpenAI);
        let frames = feed_all(
            &mut transcoder,
            &[
                ProviderEvent::ToolCall {
                    id: "call_1".into(),
                    tool_name: "TodoWrite".into(),
                    input: json!({"todos": ["a"]}),
                },
                ProviderEvent::ToolCall {
                    id: "call_1".into(),
                    tool_name: "TodoWrite".into(),
                    input: json!({}),
                },
            ],
        );
        let starts = frames
            .iter()
            .filter(|(e, _)| e == "content_block_start")
            .count();
        assert_eq!(starts, 1);
    }

    #[test]
    fn duplicate_incremental_tool_block_is_swallowed_whole() {
        let mut transcoder = StreamTranscoder::new("gpt-5", ProviderKind::OpenAI);
        let events = [
            ProviderEvent::ToolInputStart {
                id: "call_1".into(),
                tool_name: "Search".into(),
            },
            ProviderEvent::ToolInputDelta {
                json_fragment: "{}".into(),
            },
            ProviderEvent::ToolInputEnd,
            ProviderEvent::ToolInputStart {
                id: "call_1".into(),
                tool_name: "Search".into(),
            },
            ProviderEvent::ToolInputDelta {
                json_fragment: "{\"q\":1}".into(),
            },
            ProviderEvent::ToolInputEnd,
            ProviderEvent::TextStart,
        ];
        let frames = feed_all(&mut transcoder, &events);
        let names: Vec<&str> = frames.iter().map(|(e, _)| e.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start"
            ]
        );
        // The suppressed duplicate must not consume an index.
        assert_eq!(frames[3].1["index"], json!(1));
    }

    #[test]
    fn cached_tokens_surface_as_cache_read() {
        let mut transcoder = StreamTranscoder::new("gpt-5", ProviderKind::OpenAI);
        let frames = feed_all(
            &mut transcoder,
            &[ProviderEvent::StepFinish {
                reason: FinishReason::Stop,
                usage: Usage {
                    input_tokens: 100,
                    output_tokens: 4,
                    cached_input_tokens: 64,
                },
            }],
        );
        assert_eq!(frames[0].1["usage"]["cache_read_input_tokens"], json!(64));
        assert_eq!(frames[0].1["usage"]["cache_creation_input_tokens"], json!(0));
    }

    #[test]
    fn mid_stream_openai_server_error_is_rewritten() {
        let mut transcoder = StreamTranscoder::new("gpt-5", ProviderKind::OpenAI);
        let frames = feed_all(
            &mut transcoder,
            &[ProviderEvent::Error {
                code: Some("server_error".into()),
                error_type: None,
                message: "The server had an error".into(),
                raw: None,
            }],
        );
        assert_eq!(frames[0].0, "error");
        assert_eq!(frames[0].1["error"]["type"], json!("rate_limit_error"));
        assert!(transcoder.is_closed());
    }

    #[test]
    fn driver_stream_failure_closes_with_overloaded() {
        let mut transcoder = StreamTranscoder::new("gpt-5", ProviderKind::OpenAI);
        let frames = transcoder.feed_error(&DriverError::Stream("reset".into()));
        let (event, data) = parse_frame(&frames[0]);
        assert_eq!(event, "error");
        assert_eq!(data["error"]["type"], json!("overloaded_error"));
        assert!(transcoder.is_closed());
    }

    #[tokio::test]
    async fn collect_assembles_an_assistant_turn() {
        let events: Vec<Result<ProviderEvent, DriverError>> = vec![
            Ok(ProviderEvent::StepStart),
            Ok(ProviderEvent::ReasoningStart),
            Ok(ProviderEvent::ReasoningDelta {
                text: "think".into(),
            }),
            Ok(ProviderEvent::ReasoningEnd),
            Ok(ProviderEvent::TextStart),
            Ok(ProviderEvent::TextDelta { text: "Hel".into() }),
            Ok(ProviderEvent::TextDelta { text: "lo".into() }),
            Ok(ProviderEvent::TextEnd),
            Ok(ProviderEvent::ToolInputStart {
                id: "call_1".into(),
                tool_name: "Search".into(),
            }),
            Ok(ProviderEvent::ToolInputDelta {
                json_fragment: "{\"q\":".into(),
            }),
            Ok(ProviderEvent::ToolInputDelta {
                json_fragment: "\"x\"}".into(),
            }),
            Ok(ProviderEvent::ToolInputEnd),
            Ok(ProviderEvent::StepFinish {
                reason: FinishReason::ToolCalls,
                usage: Usage {
                    input_tokens: 9,
                    output_tokens: 3,
                    cached_input_tokens: 0,
                },
            }),
            Ok(ProviderEvent::Finish),
        ];
        let stream: bronte_providers::EventStream =
            Box::pin(futures::stream::iter(events));

        let collected = collect(stream).await.unwrap();
        assert_eq!(collected.parts.len(), 3);
        assert!(matches!(&collected.parts[0], Part::Reasoning { text, .. } if text == "think"));
        assert!(matches!(&collected.parts[1], Part::Text { text, .. } if text == "Hello"));
        match &collected.parts[2] {
            Part::ToolCall { call_id, input, .. } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(*input, json!({"q": "x"}));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert_eq!(collected.stop_reason, "tool_use");
        assert_eq!(collected.usage.input_tokens, 9);
    }

    #[tokio::test]
    async fn collect_surfaces_inline_errors() {
        let events: Vec<Result<ProviderEvent, DriverError>> = vec![
            Ok(ProviderEvent::StepStart),
            Ok(ProviderEvent::Error {
                code: Some("server_error".into()),
                error_type: None,
                message: "boom".into(),
                raw: None,
            }),
        ];
        let stream: bronte_providers::EventStream =
            Box::pin(futures::stream::iter(events));
        match collect(stream).await {
            Err(CollectError::Event { code, .. }) => {
                assert_eq!(code.as_deref(), Some("server_error"));
            }
            other => panic!("expected event error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn collect_tolerates_unparseable_tool_arguments() {
        let events: Vec<Result<ProviderEvent, DriverError>> = vec![
            Ok(ProviderEvent::ToolInputStart {
                id: "call_1".into(),
                tool_name: "Search".into(),
            }),
            Ok(ProviderEvent::ToolInputDelta {
                json_fragment: "{\"q\": tru".into(),
            }),
            Ok(ProviderEvent::ToolInputEnd),
            Ok(ProviderEvent::Finish),
        ];
        let stream: bronte_providers::EventStream =
            Box::pin(futures::stream::iter(events));
        let collected = collect(stream).await.unwrap();
        match &collected.parts[0] {
            Part::ToolCall { input, .. } => {
                assert_eq!(*input, json!({"raw": "{\"q\": tru"}));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }
}
