//! Translation of Anthropic streaming events into [`ProviderEvent`]s.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, trace, warn};

use relay_tool_runtime::provider::{ProviderEvent, StopReason};
use relay_tool_runtime::stream::Citation;

/// What a content-block index refers to, learned at `content_block_start`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    Text,
    ToolUse { id: String },
    Other,
}

/// Stateful translator for one response.
///
/// Anthropic identifies deltas and stops by block index only, so the
/// translator remembers which index belongs to which tool call.
#[derive(Debug, Default)]
pub(super) struct EventTranslator {
    blocks: HashMap<u64, Block>,
    finished: bool,
}

impl EventTranslator {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// `message_stop` has been seen; the response is complete.
    pub(super) fn is_finished(&self) -> bool {
        self.finished
    }

    /// Translate one SSE frame. `event_type` falls back to the payload's
    /// `type` field when the frame had no `event:` line.
    pub(super) fn translate(&mut self, event_type: Option<&str>, data: &str) -> Vec<ProviderEvent> {
        let parsed: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "skipping malformed provider frame");
                return Vec::new();
            }
        };
        let event_type = event_type
            .map(str::to_string)
            .or_else(|| parsed["type"].as_str().map(str::to_string))
            .unwrap_or_default();

        let mut events = Vec::new();
        match event_type.as_str() {
            "message_start" => {
                let usage = &parsed["message"]["usage"];
                if usage.is_object() {
                    events.push(ProviderEvent::Usage {
                        input_tokens: usage["input_tokens"].as_u64(),
                        output_tokens: usage["output_tokens"].as_u64(),
                    });
                }
            }
            "content_block_start" => self.block_start(&parsed, &mut events),
            "content_block_delta" => self.block_delta(&parsed, &mut events),
            "content_block_stop" => {
                let index = parsed["index"].as_u64().unwrap_or(0);
                // Emit ToolCallEnd only for tool_use blocks
                if let Some(Block::ToolUse { id }) = self.blocks.remove(&index) {
                    events.push(ProviderEvent::ToolCallEnd { id });
                }
            }
            "message_delta" => {
                let usage = &parsed["usage"];
                if usage.is_object() {
                    events.push(ProviderEvent::Usage {
                        input_tokens: usage["input_tokens"].as_u64(),
                        output_tokens: usage["output_tokens"].as_u64(),
                    });
                }
                if let Some(reason) = parsed["delta"]["stop_reason"].as_str() {
                    events.push(ProviderEvent::MessageEnd {
                        stop_reason: stop_reason(reason),
                    });
                }
            }
            "message_stop" => self.finished = true,
            "ping" => {}
            "error" => {
                let message = parsed["error"]["message"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| data.to_string());
                events.push(ProviderEvent::Error { message });
            }
            other => {
                trace!(event_type = other, "ignoring unknown SSE event type");
            }
        }
        events
    }

    fn block_start(&mut self, parsed: &Value, events: &mut Vec<ProviderEvent>) {
        let index = parsed["index"].as_u64().unwrap_or(0);
        let block = &parsed["content_block"];
        match block["type"].as_str() {
            Some("text") => {
                self.blocks.insert(index, Block::Text);
                // Text block starting -- initial text if present
                if let Some(text) = block["text"].as_str() {
                    if !text.is_empty() {
                        events.push(ProviderEvent::TextDelta(text.to_string()));
                    }
                }
            }
            Some(kind @ ("tool_use" | "server_tool_use")) => {
                let id = block["id"].as_str().unwrap_or("").to_string();
                let name = block["name"].as_str().unwrap_or("").to_string();
                debug!(id = %id, name = %name, kind, "tool block started");
                self.blocks.insert(index, Block::ToolUse { id: id.clone() });
                events.push(ProviderEvent::ToolCallStart {
                    id,
                    name,
                    server_side: kind == "server_tool_use",
                });
            }
            Some("web_search_tool_result") => {
                self.blocks.insert(index, Block::Other);
                if let Some(results) = block["content"].as_array() {
                    for result in results {
                        if result["type"] == "web_search_result" {
                            events.push(ProviderEvent::Citation(Citation {
                                title: result["title"].as_str().unwrap_or("").to_string(),
                                url: result["url"].as_str().unwrap_or("").to_string(),
                                cited_text: None,
                            }));
                        }
                    }
                }
            }
            other => {
                trace!(block_type = ?other, "ignoring content block");
                self.blocks.insert(index, Block::Other);
            }
        }
    }

    fn block_delta(&mut self, parsed: &Value, events: &mut Vec<ProviderEvent>) {
        let index = parsed["index"].as_u64().unwrap_or(0);
        let delta = &parsed["delta"];
        match delta["type"].as_str() {
            Some("text_delta") => {
                if let Some(text) = delta["text"].as_str() {
                    events.push(ProviderEvent::TextDelta(text.to_string()));
                }
            }
            Some("input_json_delta") => {
                let Some(json_str) = delta["partial_json"].as_str() else {
                    return;
                };
                match self.blocks.get(&index) {
                    Some(Block::ToolUse { id }) => events.push(ProviderEvent::ToolCallDelta {
                        id: id.clone(),
                        partial_json: json_str.to_string(),
                    }),
                    _ => warn!(index, "input_json_delta for a block that is not a tool call"),
                }
            }
            Some("citations_delta") => {
                let citation = &delta["citation"];
                events.push(ProviderEvent::Citation(Citation {
                    title: citation["title"]
                        .as_str()
                        .or_else(|| citation["document_title"].as_str())
                        .unwrap_or("")
                        .to_string(),
                    url: citation["url"].as_str().unwrap_or("").to_string(),
                    cited_text: citation["cited_text"].as_str().map(String::from),
                }));
            }
            other => trace!(delta_type = ?other, "ignoring delta"),
        }
    }
}

fn stop_reason(reason: &str) -> StopReason {
    match reason {
        "end_turn" => StopReason::EndTurn,
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        other => {
            debug!(stop_reason = other, "treating stop reason as end of turn");
            StopReason::EndTurn
        }
    }
}
