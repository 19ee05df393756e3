//! Neutral turns -> Anthropic wire messages
//!
//! Used in two places: the Anthropic driver renders the whole neutral prompt
//! into an outgoing request, and the proxy renders a collected assistant turn
//! into a non-streaming response body.

use crate::convert::ConvertError;
use crate::{wire, FileData, Part, ToolOutput, ToolResultItem, Turn, TurnRole};
use base64::Engine;
use std::collections::{BTreeSet, HashSet};

/// Beta capability required for document (PDF) blocks.
pub const PDF_BETA: &str = "pdfs-2024-09-25";

/// Rendering knobs.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Emit `Reasoning` parts as `thinking` blocks. When false the parts are
    /// skipped and a warning recorded.
    pub send_reasoning: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            send_reasoning: true,
        }
    }
}

/// One rendered wire message plus everything learned while rendering it.
#[derive(Debug)]
pub struct RenderedMessage {
    pub message: wire::Message,
    pub warnings: Vec<String>,
    pub betas: BTreeSet<String>,
}

/// A fully rendered prompt for an outgoing Anthropic request.
#[derive(Debug, Default)]
pub struct RenderedPrompt {
    pub system: Option<Vec<wire::SystemBlock>>,
    pub messages: Vec<wire::Message>,
    pub warnings: Vec<String>,
    pub betas: BTreeSet<String>,
}

/// Render a single turn into one wire message.
///
/// Within an assistant turn, a second `ToolCall` whose `call_id` was already
/// emitted is dropped; the first occurrence's input wins. Empty text parts
/// are dropped.
pub fn render_turn(turn: &Turn, opts: &RenderOptions) -> Result<RenderedMessage, ConvertError> {
    let role = match turn.role {
        TurnRole::Assistant => wire::Role::Assistant,
        TurnRole::User | TurnRole::Tool => wire::Role::User,
        TurnRole::System => {
            return Err(ConvertError::ProtocolInvariant(
                "system turns cannot be rendered as messages".to_string(),
            ))
        }
    };

    let mut blocks: Vec<wire::ContentBlock> = Vec::with_capacity(turn.parts.len());
    let mut warnings = Vec::new();
    let mut betas = BTreeSet::new();
    let mut seen_calls: HashSet<&str> = HashSet::new();

    for part in &turn.parts {
        let mut block = match part {
            Part::Text { text, .. } => {
                if text.is_empty() {
                    continue;
                }
                wire::ContentBlock::text(text.clone())
            }

            Part::Reasoning { text, .. } => {
                if !opts.send_reasoning {
                    let warning = "reasoning content omitted: sendReasoning is disabled";
                    tracing::warn!("{warning}");
                    warnings.push(warning.to_string());
                    continue;
                }
                wire::ContentBlock::Thinking {
                    thinking: text.clone(),
                    signature: None,
                }
            }

            Part::File {
                data,
                media_type,
                filename,
                ..
            } => file_block(data, media_type, filename.as_deref(), &mut betas)?,

            Part::ToolCall {
                call_id,
                tool_name,
                input,
                ..
            } => {
                if !seen_calls.insert(call_id.as_str()) {
                    continue;
                }
                wire::ContentBlock::ToolUse {
                    id: call_id.clone(),
                    name: tool_name.clone(),
                    input: input.clone(),
                    cache_control: None,
                }
            }

            Part::ToolResult {
                call_id, output, ..
            } => wire::ContentBlock::ToolResult {
                tool_use_id: call_id.clone(),
                content: tool_result_content(output)?,
                is_error: output.is_error().then_some(true),
                cache_control: None,
            },
        };

        if let Some(cc) = part.cache_control() {
            block.set_cache_control(cc.clone());
        }
        blocks.push(block);
    }

    // The turn-level annotation lands on the last block, unless that block
    // already carries its own.
    if let Some(cc) = &turn.cache_control {
        if let Some(last) = blocks.last_mut() {
            if last.cache_control().is_none() {
                last.set_cache_control(cc.clone());
            }
        }
    }

    Ok(RenderedMessage {
        message: wire::Message {
            role,
            content: wire::Content::Blocks(blocks),
        },
        warnings,
        betas,
    })
}

/// Render a whole neutral prompt for an outgoing Anthropic request.
///
/// System turns must be contiguous at the start; the final assistant prefill
/// (when the prompt ends on an assistant turn) has its trailing whitespace
/// trimmed, since the API rejects it otherwise.
pub fn render_prompt(
    system: Option<&str>,
    turns: &[Turn],
    opts: &RenderOptions,
) -> Result<RenderedPrompt, ConvertError> {
    let mut out = RenderedPrompt::default();

    let mut system_blocks: Vec<wire::SystemBlock> = Vec::new();
    if let Some(text) = system {
        system_blocks.push(system_block(text));
    }

    let mut past_system = false;
    for turn in turns {
        if turn.role == TurnRole::System {
            if past_system {
                return Err(ConvertError::ProtocolInvariant(
                    "system turns are only supported at the beginning of the prompt".to_string(),
                ));
            }
            for part in &turn.parts {
                match part {
                    Part::Text { text, .. } => system_blocks.push(system_block(text)),
                    other => {
                        return Err(ConvertError::ProtocolInvariant(format!(
                            "system turns only carry text, got {}",
                            part_kind(other)
                        )))
                    }
                }
            }
            continue;
        }

        past_system = true;
        let rendered = render_turn(turn, opts)?;
        out.warnings.extend(rendered.warnings);
        out.betas.extend(rendered.betas);
        out.messages.push(rendered.message);
    }

    if let Some(last) = out.messages.last_mut() {
        if last.role == wire::Role::Assistant {
            trim_trailing_text(last);
        }
    }

    if !system_blocks.is_empty() {
        out.system = Some(system_blocks);
    }
    Ok(out)
}

fn system_block(text: &str) -> wire::SystemBlock {
    wire::SystemBlock {
        kind: wire::SystemBlockType::Text,
        text: text.to_string(),
        cache_control: None,
    }
}

/// Right-trim the final text block of a prefilled assistant message, dropping
/// it entirely if nothing remains.
fn trim_trailing_text(message: &mut wire::Message) {
    let wire::Content::Blocks(blocks) = &mut message.content else {
        return;
    };
    if let Some(wire::ContentBlock::Text { text, .. }) = blocks.last_mut() {
        let trimmed = text.trim_end();
        if trimmed.len() != text.len() {
            *text = trimmed.to_string();
        }
        if text.is_empty() {
            blocks.pop();
        }
    }
}

fn file_block(
    data: &FileData,
    media_type: &str,
    filename: Option<&str>,
    betas: &mut BTreeSet<String>,
) -> Result<wire::ContentBlock, ConvertError> {
    let source = match data {
        FileData::Bytes { data } => wire::MediaSource::Base64 {
            media_type: media_type.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(data),
        },
        FileData::Url { url } => wire::MediaSource::Url { url: url.clone() },
    };

    if media_type == "application/pdf" {
        betas.insert(PDF_BETA.to_string());
        return Ok(wire::ContentBlock::Document {
            source,
            title: filename.map(str::to_string),
            cache_control: None,
        });
    }
    if media_type.starts_with("image/") {
        return Ok(wire::ContentBlock::Image {
            source,
            cache_control: None,
        });
    }
    Err(ConvertError::UnsupportedMediaType(media_type.to_string()))
}

fn tool_result_content(output: &ToolOutput) -> Result<wire::ToolResultContent, ConvertError> {
    match output {
        ToolOutput::Text { text } | ToolOutput::ErrorText { text } => {
            Ok(wire::ToolResultContent::String(text.clone()))
        }
        ToolOutput::Json { value } | ToolOutput::ErrorJson { value } => {
            Ok(wire::ToolResultContent::String(value.to_string()))
        }
        ToolOutput::Content { items } => {
            let mut blocks = Vec::with_capacity(items.len());
            for item in items {
                blocks.push(match item {
                    ToolResultItem::Text { text } => wire::ContentBlock::text(text.clone()),
                    ToolResultItem::Media { data, media_type } => {
                        if media_type.starts_with("image/") {
                            wire::ContentBlock::Image {
                                source: wire::MediaSource::Base64 {
                                    media_type: media_type.clone(),
                                    data: data.clone(),
                                },
                                cache_control: None,
                            }
                        } else if media_type == "application/pdf" {
                            // Lossy fallback; not a stable contract.
                            wire::ContentBlock::text("[document content omitted]")
                        } else {
                            return Err(ConvertError::UnsupportedMediaType(media_type.clone()));
                        }
                    }
                });
            }
            Ok(wire::ToolResultContent::Blocks(blocks))
        }
    }
}

fn part_kind(part: &Part) -> &'static str {
    match part {
        Part::Text { .. } => "text",
        Part::Reasoning { .. } => "reasoning",
        Part::File { .. } => "file",
        Part::ToolCall { .. } => "tool_call",
        Part::ToolResult { .. } => "tool_result",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blocks_of(message: &wire::Message) -> &[wire::ContentBlock] {
        match &message.content {
            wire::Content::Blocks(blocks) => blocks,
            wire::Content::String(_) => panic!("expected block content"),
        }
    }

    #[test]
    fn duplicate_tool_call_keeps_first_input() {
        let turn = Turn::assistant(vec![
            Part::tool_call("call_123", "TodoWrite", json!({"todos": ["a", "b"]})),
            Part::tool_call("call_123", "TodoWrite", json!({})),
        ]);
        let rendered = render_turn(&turn, &RenderOptions::default()).unwrap();
        let blocks = blocks_of(&rendered.message);
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            wire::ContentBlock::ToolUse { id, input, .. } => {
                assert_eq!(id, "call_123");
                assert_eq!(*input, json!({"todos": ["a", "b"]}));
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
    }

    #[test]
    fn mixed_content_dedup_preserves_order() {
        let turn = Turn::assistant(vec![
            Part::text("Let me help."),
            Part::tool_call("x", "Search", json!({"q": "t"})),
            Part::text("..."),
            Part::tool_call("x", "Search", json!({"q": "d"})),
        ]);
        let rendered = render_turn(&turn, &RenderOptions::default()).unwrap();
        let blocks = blocks_of(&rendered.message);
        assert_eq!(blocks.len(), 3);
        assert!(matches!(&blocks[0], wire::ContentBlock::Text { text, .. } if text == "Let me help."));
        match &blocks[1] {
            wire::ContentBlock::ToolUse { id, input, .. } => {
                assert_eq!(id, "x");
                assert_eq!(*input, json!({"q": "t"}));
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
        assert!(matches!(&blocks[2], wire::ContentBlock::Text { text, .. } if text == "..."));
    }

    #[test]
    fn empty_text_parts_are_dropped() {
        let turn = Turn::assistant(vec![Part::text(""), Part::text("kept")]);
        let rendered = render_turn(&turn, &RenderOptions::default()).unwrap();
        assert_eq!(blocks_of(&rendered.message).len(), 1);
    }

    #[test]
    fn reasoning_is_gated_by_send_reasoning() {
        let turn = Turn::assistant(vec![Part::reasoning("thought"), Part::text("answer")]);

        let on = render_turn(&turn, &RenderOptions::default()).unwrap();
        assert_eq!(blocks_of(&on.message).len(), 2);
        assert!(matches!(
            blocks_of(&on.message)[0],
            wire::ContentBlock::Thinking { .. }
        ));

        let off = render_turn(
            &turn,
            &RenderOptions {
                send_reasoning: false,
            },
        )
        .unwrap();
        assert_eq!(blocks_of(&off.message).len(), 1);
        assert_eq!(off.warnings.len(), 1);
    }

    #[test]
    fn pdf_file_adds_beta_and_document_block() {
        let turn = Turn::user(vec![Part::File {
            data: FileData::Bytes {
                data: b"%PDF-1.7".to_vec(),
            },
            media_type: "application/pdf".to_string(),
            filename: Some("report.pdf".to_string()),
            cache_control: None,
        }]);
        let rendered = render_turn(&turn, &RenderOptions::default()).unwrap();
        assert!(rendered.betas.contains(PDF_BETA));
        assert!(matches!(
            blocks_of(&rendered.message)[0],
            wire::ContentBlock::Document { .. }
        ));
    }

    #[test]
    fn non_image_media_is_rejected() {
        let turn = Turn::user(vec![Part::File {
            data: FileData::Url {
                url: "https://example.com/a.mp3".to_string(),
            },
            media_type: "audio/mpeg".to_string(),
            filename: None,
            cache_control: None,
        }]);
        let err = render_turn(&turn, &RenderOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "unsupported_media_type");
    }

    #[test]
    fn turn_cache_control_lands_on_last_block_only() {
        let mut turn = Turn::user(vec![Part::text("a"), Part::text("b")]);
        turn.cache_control = Some(json!({"type": "ephemeral"}));
        let rendered = render_turn(&turn, &RenderOptions::default()).unwrap();
        let blocks = blocks_of(&rendered.message);
        assert!(blocks[0].cache_control().is_none());
        assert_eq!(blocks[1].cache_control(), Some(&json!({"type": "ephemeral"})));
    }

    #[test]
    fn own_cache_control_beats_turn_level() {
        let mut turn = Turn::user(vec![Part::Text {
            text: "a".to_string(),
            cache_control: Some(json!({"type": "ephemeral", "ttl": "1h"})),
        }]);
        turn.cache_control = Some(json!({"type": "ephemeral"}));
        let rendered = render_turn(&turn, &RenderOptions::default()).unwrap();
        assert_eq!(
            blocks_of(&rendered.message)[0].cache_control(),
            Some(&json!({"type": "ephemeral", "ttl": "1h"}))
        );
    }

    #[test]
    fn prefill_assistant_text_is_right_trimmed() {
        let turns = vec![
            Turn::user(vec![Part::text("question")]),
            Turn::assistant(vec![Part::text("The answer is:  \n")]),
        ];
        let rendered = render_prompt(None, &turns, &RenderOptions::default()).unwrap();
        match &blocks_of(&rendered.messages[1])[0] {
            wire::ContentBlock::Text { text, .. } => assert_eq!(text, "The answer is:"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn system_after_non_system_fails() {
        let turns = vec![
            Turn::new(TurnRole::System, vec![Part::text("one")]),
            Turn::user(vec![Part::text("hi")]),
            Turn::new(TurnRole::System, vec![Part::text("two")]),
        ];
        let err = render_prompt(None, &turns, &RenderOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "protocol_invariant");
    }

    #[test]
    fn leading_system_turns_merge_with_system_param() {
        let turns = vec![
            Turn::new(TurnRole::System, vec![Part::text("from turn")]),
            Turn::user(vec![Part::text("hi")]),
        ];
        let rendered = render_prompt(Some("from param"), &turns, &RenderOptions::default()).unwrap();
        let system = rendered.system.unwrap();
        assert_eq!(system.len(), 2);
        assert_eq!(system[0].text, "from param");
        assert_eq!(system[1].text, "from turn");
    }

    #[test]
    fn tool_turn_renders_as_user_tool_result() {
        let turn = Turn::tool(vec![Part::tool_result(
            "call_9",
            "Read",
            ToolOutput::ErrorText {
                text: "no such file".to_string(),
            },
        )]);
        let rendered = render_turn(&turn, &RenderOptions::default()).unwrap();
        assert_eq!(rendered.message.role, wire::Role::User);
        match &blocks_of(&rendered.message)[0] {
            wire::ContentBlock::ToolResult {
                tool_use_id,
                is_error,
                ..
            } => {
                assert_eq!(tool_use_id, "call_9");
                assert_eq!(*is_error, Some(true));
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[test]
    fn pdf_tool_result_media_falls_back_to_placeholder_text() {
        let turn = Turn::tool(vec![Part::tool_result(
            "call_9",
            "Fetch",
            ToolOutput::Content {
                items: vec![ToolResultItem::Media {
                    data: "aGk=".to_string(),
                    media_type: "application/pdf".to_string(),
                }],
            },
        )]);
        let rendered = render_turn(&turn, &RenderOptions::default()).unwrap();
        match &blocks_of(&rendered.message)[0] {
            wire::ContentBlock::ToolResult { content, .. } => match content {
                wire::ToolResultContent::Blocks(blocks) => {
                    assert!(matches!(
                        &blocks[0],
                        wire::ContentBlock::Text { text, .. } if text == "[document content omitted]"
                    ));
                }
                other => panic!("expected blocks, got {other:?}"),
            },
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    // Round-trip purity for text-only prompts: wire -> neutral -> wire keeps
    // the block list, modulo empty-text drops and the prefill trim.
    #[test]
    fn text_only_round_trip_is_pure() {
        let req: wire::MessagesRequest = serde_json::from_value(json!({
            "model": "openai/gpt-5",
            "max_tokens": 10,
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "first"},
                    {"type": "text", "text": ""}
                ]},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "reply  "}
                ]}
            ]
        }))
        .unwrap();

        let neutral = crate::convert::inbound::convert_request(&req).unwrap();
        let rendered =
            render_prompt(None, &neutral.turns, &RenderOptions::default()).unwrap();

        let user = blocks_of(&rendered.messages[0]);
        assert_eq!(user.len(), 1);
        assert!(matches!(&user[0], wire::ContentBlock::Text { text, .. } if text == "first"));

        let assistant = blocks_of(&rendered.messages[1]);
        assert!(matches!(&assistant[0], wire::ContentBlock::Text { text, .. } if text == "reply"));
    }
}
