//! Translation between provider-agnostic conversation types and the Claude API format.

use serde_json::{json, Value};

use relay_tool_runtime::conversation::{ContentPart, ConversationMessage, ImageSource};
use relay_tool_runtime::provider::ServerTool;
use relay_tool_runtime::tool::ToolDefinition;

/// Translate a [`ToolDefinition`] into the Claude API tool format.
pub(super) fn tool_definition_to_claude(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

pub(super) fn server_tool_to_claude(tool: &ServerTool) -> Value {
    match tool {
        ServerTool::WebSearch { max_uses } => json!({
            "type": "web_search_20250305",
            "name": "web_search",
            "max_uses": max_uses,
        }),
    }
}

/// Extracted document text is inlined as a labelled text block.
pub(super) fn document_block_text(name: &str, text: &str) -> String {
    format!("[Content from {}]:\n{}\n\n---\n\n", name, text)
}

fn part_to_claude(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"type": "text", "text": text}),
        ContentPart::Image { source } => match source {
            ImageSource::Base64 { media_type, data } => json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media_type, "data": data},
            }),
            ImageSource::Url { url } => json!({
                "type": "image",
                "source": {"type": "url", "url": url},
            }),
        },
        ContentPart::Document { name, text } => json!({
            "type": "text",
            "text": document_block_text(name, text),
        }),
    }
}

/// Translate a [`ConversationMessage`] into a Claude API message object.
///
/// Returns `None` for an assistant message with no content, which the API
/// would reject.
pub(super) fn message_to_claude(msg: &ConversationMessage) -> Option<Value> {
    match msg {
        ConversationMessage::User(content) => {
            let blocks: Vec<Value> = content.parts.iter().map(part_to_claude).collect();
            Some(json!({
                "role": "user",
                "content": blocks,
            }))
        }
        ConversationMessage::Assistant(content) => {
            let mut blocks: Vec<Value> = Vec::new();
            if let Some(text) = content.text.as_ref().filter(|t| !t.is_empty()) {
                blocks.push(json!({"type": "text", "text": text}));
            }
            for tc in &content.tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": tc.id,
                    "name": tc.name,
                    "input": tc.input,
                }));
            }
            if blocks.is_empty() {
                return None;
            }
            Some(json!({
                "role": "assistant",
                "content": blocks,
            }))
        }
        ConversationMessage::ToolResults(results) => {
            let blocks: Vec<Value> = results
                .iter()
                .map(|result| {
                    json!({
                        "type": "tool_result",
                        "tool_use_id": result.tool_call_id,
                        "content": result.content,
                        "is_error": result.is_error,
                    })
                })
                .collect();
            Some(json!({
                "role": "user",
                "content": blocks,
            }))
        }
    }
}

pub(super) fn messages_to_claude(messages: &[ConversationMessage]) -> Vec<Value> {
    messages.iter().filter_map(message_to_claude).collect()
}
