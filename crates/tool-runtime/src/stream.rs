use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events emitted to every listener of an agentic run.
///
/// Provider-agnostic: the turn driver translates provider output into this
/// vocabulary and nothing downstream of it looks at provider payloads. The
/// same enum is the wire format (`{"type": "...", ...}`) and the in-process
/// representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of assistant text, always a suffix of what was sent before.
    TextDelta { content: String },
    /// The model requested a tool.
    ToolCall {
        id: String,
        name: String,
        input: Value,
    },
    /// Output of a tool, correlated to an earlier `ToolCall` by `id`.
    ToolResult {
        id: String,
        name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Citation(Citation),
    /// Batched citations. Accepted on decode; the server emits single citations.
    Citations { citations: Vec<Citation> },
    Suggestions { suggestions: Vec<String> },
    Usage { usage: Usage },
    /// Announces the id under which the conversation is persisted.
    ConversationId { id: String },
    Done,
    Error {
        message: String,
        #[serde(default)]
        reason: ErrorReason,
    },
}

impl StreamEvent {
    /// The `type` tag, also used as the SSE `event:` name for named frames.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::TextDelta { .. } => "text_delta",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Citation(_) => "citation",
            StreamEvent::Citations { .. } => "citations",
            StreamEvent::Suggestions { .. } => "suggestions",
            StreamEvent::Usage { .. } => "usage",
            StreamEvent::ConversationId { .. } => "conversation_id",
            StreamEvent::Done => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// `done` and `error` end a stream; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }

    pub fn text(content: impl Into<String>) -> Self {
        StreamEvent::TextDelta {
            content: content.into(),
        }
    }

    pub fn error(reason: ErrorReason, message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
            reason,
        }
    }
}

/// A source the model cited (web search result or cited document span).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cited_text: Option<String>,
}

/// Token counters reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Why a stream ended with an error. Lets clients tell a loop-budget stop
/// apart from a dropped connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// Connection to the provider failed or closed early.
    Transport,
    /// The provider reported an error.
    #[default]
    Provider,
    /// The byte stream could not be framed or violated text monotonicity.
    Protocol,
    Timeout,
    /// The turn-count ceiling was reached while tools were still requested.
    Ceiling,
    Cancelled,
    Persistence,
}
