//! Anthropic wire request -> neutral prompt
//!
//! Walks the request's messages top to bottom, turning each content block
//! into a neutral part. Tool results become separate `tool` turns; their tool
//! names are resolved from a `call_id -> tool_name` table built while walking
//! the same prompt.

use crate::convert::ConvertError;
use crate::{wire, FileData, Part, ToolDecl, ToolOutput, ToolResultItem, Turn, TurnRole};
use base64::Engine;
use std::collections::{BTreeMap, HashMap};

/// The neutral form of an inbound `/v1/messages` request.
#[derive(Debug, Clone, Default)]
pub struct ConvertedRequest {
    /// System text blocks concatenated with `"\n"`.
    pub system: Option<String>,
    pub turns: Vec<Turn>,
    /// Tools keyed by name, in declaration order.
    pub tools: BTreeMap<String, ToolDecl>,
}

/// Convert a wire request into the neutral prompt model.
pub fn convert_request(req: &wire::MessagesRequest) -> Result<ConvertedRequest, ConvertError> {
    let system = req.system.as_ref().map(system_text);

    let mut tools = BTreeMap::new();
    if let Some(decls) = &req.tools {
        for decl in decls {
            match decl.name() {
                Some(name) => {
                    tools.insert(name.to_string(), decl.clone());
                }
                None => tracing::warn!("dropping tool declaration without a name"),
            }
        }
    }

    let mut turns = Vec::new();
    let mut call_names: HashMap<String, String> = HashMap::new();

    for msg in &req.messages {
        let role = match msg.role {
            wire::Role::User => TurnRole::User,
            wire::Role::Assistant => TurnRole::Assistant,
        };

        let mut pending: Vec<Part> = Vec::new();
        for block in msg.content.as_blocks() {
            match block {
                wire::ContentBlock::Text {
                    text,
                    cache_control,
                } => pending.push(Part::Text {
                    text,
                    cache_control,
                }),

                wire::ContentBlock::Thinking { thinking, .. } => {
                    pending.push(Part::reasoning(thinking));
                }

                // The opaque payload rides along as reasoning text.
                wire::ContentBlock::RedactedThinking { data } => {
                    pending.push(Part::reasoning(data));
                }

                wire::ContentBlock::Image {
                    source,
                    cache_control,
                } => pending.push(file_part(source, None, cache_control)?),

                wire::ContentBlock::Document {
                    source,
                    title,
                    cache_control,
                } => pending.push(file_part(
                    source,
                    Some(("application/pdf", title)),
                    cache_control,
                )?),

                wire::ContentBlock::ToolUse {
                    id,
                    name,
                    input,
                    cache_control,
                } => {
                    call_names.insert(id.clone(), name.clone());
                    pending.push(Part::ToolCall {
                        call_id: id,
                        tool_name: name,
                        input,
                        cache_control,
                    });
                }

                wire::ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                    cache_control,
                } => {
                    let tool_name = call_names.get(&tool_use_id).cloned().ok_or_else(|| {
                        ConvertError::ProtocolInvariant(format!(
                            "tool_result '{tool_use_id}' has no preceding tool_use"
                        ))
                    })?;

                    // Tool results live in their own `tool` turn; flush any
                    // content gathered so far to preserve block order.
                    if !pending.is_empty() {
                        turns.push(Turn::new(role, std::mem::take(&mut pending)));
                    }
                    turns.push(Turn::tool(vec![Part::ToolResult {
                        call_id: tool_use_id,
                        tool_name,
                        output: tool_output(content, is_error.unwrap_or(false))?,
                        cache_control,
                    }]));
                }
            }
        }

        if !pending.is_empty() {
            turns.push(Turn::new(role, pending));
        }
    }

    Ok(ConvertedRequest {
        system,
        turns,
        tools,
    })
}

fn system_text(system: &wire::SystemContent) -> String {
    match system {
        wire::SystemContent::String(s) => s.clone(),
        wire::SystemContent::Blocks(blocks) => blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Build a `File` part from a media source.
///
/// URL image sources carry no media type on the wire; it stays empty here and
/// is filled in by normalization before any driver sees the part.
fn file_part(
    source: wire::MediaSource,
    document: Option<(&str, Option<String>)>,
    cache_control: Option<serde_json::Value>,
) -> Result<Part, ConvertError> {
    let filename = document.as_ref().and_then(|(_, title)| title.clone());
    let (data, media_type) = match source {
        wire::MediaSource::Base64 { media_type, data } => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data.as_bytes())
                .map_err(|e| {
                    ConvertError::ProtocolInvariant(format!("invalid base64 media data: {e}"))
                })?;
            (FileData::Bytes { data: bytes }, media_type)
        }
        wire::MediaSource::Url { url } => {
            let media_type = document
                .as_ref()
                .map(|(mt, _)| mt.to_string())
                .unwrap_or_default();
            (FileData::Url { url }, media_type)
        }
    };
    Ok(Part::File {
        data,
        media_type,
        filename,
        cache_control,
    })
}

fn tool_output(
    content: wire::ToolResultContent,
    is_error: bool,
) -> Result<ToolOutput, ConvertError> {
    match content {
        wire::ToolResultContent::String(text) => Ok(if is_error {
            ToolOutput::ErrorText { text }
        } else {
            ToolOutput::Text { text }
        }),
        wire::ToolResultContent::Blocks(blocks) => {
            let mut items = Vec::with_capacity(blocks.len());
            for block in blocks {
                match block {
                    wire::ContentBlock::Text { text, .. } => {
                        items.push(ToolResultItem::Text { text });
                    }
                    wire::ContentBlock::Image {
                        source: wire::MediaSource::Base64 { media_type, data },
                        ..
                    } => items.push(ToolResultItem::Media { data, media_type }),
                    // No bytes to embed; keep the reference as text.
                    wire::ContentBlock::Image {
                        source: wire::MediaSource::Url { url },
                        ..
                    } => items.push(ToolResultItem::Text { text: url }),
                    other => {
                        return Err(ConvertError::ProtocolInvariant(format!(
                            "unsupported block in tool_result content: {}",
                            block_kind(&other)
                        )))
                    }
                }
            }
            if is_error {
                let text = items
                    .iter()
                    .filter_map(|item| match item {
                        ToolResultItem::Text { text } => Some(text.as_str()),
                        ToolResultItem::Media { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(ToolOutput::ErrorText { text })
            } else {
                Ok(ToolOutput::Content { items })
            }
        }
    }
}

fn block_kind(block: &wire::ContentBlock) -> &'static str {
    match block {
        wire::ContentBlock::Text { .. } => "text",
        wire::ContentBlock::Thinking { .. } => "thinking",
        wire::ContentBlock::RedactedThinking { .. } => "redacted_thinking",
        wire::ContentBlock::Image { .. } => "image",
        wire::ContentBlock::Document { .. } => "document",
        wire::ContentBlock::ToolUse { .. } => "tool_use",
        wire::ContentBlock::ToolResult { .. } => "tool_result",
    }
}
