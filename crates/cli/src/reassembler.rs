//! Client-side reassembly of a relayed event stream.
//!
//! A [`ConversationBuffer`] is rebuilt purely from the events it is given,
//! in arrival order, so replaying the same stream always yields the same
//! buffer.

use serde::Serialize;
use serde_json::Value;

use relay_tool_runtime::stream::{Citation, ErrorReason, StreamEvent, Usage};

/// Tool results longer than this are cut for display.
pub const DISPLAY_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferStatus {
    #[default]
    Streaming,
    Done,
    Failed,
}

/// One visible step of tool activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolStep {
    ToolCall { id: String, name: String, input: Value },
    /// `content` is already truncated for display.
    ToolResult {
        id: String,
        name: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationBuffer {
    text: String,
    steps: Vec<ToolStep>,
    citations: Vec<Citation>,
    suggestions: Vec<String>,
    usage: Usage,
    conversation_id: Option<String>,
    status: BufferStatus,
    error: Option<(ErrorReason, String)>,
    final_taken: bool,
}

impl ConversationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the buffer. Events after `done` or `error` are
    /// ignored.
    pub fn apply(mut self, event: &StreamEvent) -> Self {
        if self.status != BufferStatus::Streaming {
            tracing::debug!(kind = event.kind(), "ignoring event after terminal");
            return self;
        }

        match event {
            StreamEvent::TextDelta { content } => self.text.push_str(content),
            StreamEvent::ToolCall { id, name, input } => self.steps.push(ToolStep::ToolCall {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            StreamEvent::ToolResult {
                id,
                name,
                content,
                is_error,
            } => self.steps.push(ToolStep::ToolResult {
                id: id.clone(),
                name: name.clone(),
                content: truncate_for_display(content),
                is_error: *is_error,
            }),
            StreamEvent::Citation(citation) => self.citations.push(citation.clone()),
            StreamEvent::Citations { citations } => self.citations.extend(citations.iter().cloned()),
            StreamEvent::Suggestions { suggestions } => self.suggestions = suggestions.clone(),
            StreamEvent::Usage { usage } => self.usage.add(*usage),
            StreamEvent::ConversationId { id } => self.conversation_id = Some(id.clone()),
            StreamEvent::Done => self.status = BufferStatus::Done,
            StreamEvent::Error { message, reason } => {
                if !self.text.is_empty() {
                    self.text.push_str("\n\n");
                }
                self.text.push_str(&error_marker(*reason, message));
                self.error = Some((*reason, message.clone()));
                self.status = BufferStatus::Failed;
            }
        }
        self
    }

    /// The finished assistant message, once, after `done`.
    pub fn take_final(&mut self) -> Option<String> {
        if self.status != BufferStatus::Done || self.final_taken {
            return None;
        }
        self.final_taken = true;
        Some(self.text.clone())
    }

    /// Start a new turn. Only the conversation id carries over.
    pub fn reset(self) -> Self {
        Self {
            conversation_id: self.conversation_id,
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn steps(&self) -> &[ToolStep] {
        &self.steps
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn status(&self) -> BufferStatus {
        self.status
    }

    pub fn error(&self) -> Option<&(ErrorReason, String)> {
        self.error.as_ref()
    }
}

fn error_marker(reason: ErrorReason, message: &str) -> String {
    let reason = serde_json::to_value(reason)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    format!("[error ({reason}): {message}]")
}

/// Cut to [`DISPLAY_LIMIT`] characters, marking the cut with `...`.
pub fn truncate_for_display(content: &str) -> String {
    match content.char_indices().nth(DISPLAY_LIMIT) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}
