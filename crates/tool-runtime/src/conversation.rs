use crate::tool::{ToolCall, ToolResult};
use serde::{Deserialize, Serialize};

/// Who authored a persisted or replayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConversationMessage {
    /// User input: text plus any attachments
    User(UserContent),
    /// Assistant's response (may contain text and/or tool calls)
    Assistant(AssistantContent),
    /// Results of every tool call of one turn, in call order
    ToolResults(Vec<ToolResult>),
}

/// Content from the assistant that can contain mixed text and tool calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantContent {
    /// Text blocks in the response
    pub text: Option<String>,
    /// Tool calls requested by the assistant
    pub tool_calls: Vec<ToolCall>,
}

/// Ordered parts of one user message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContent {
    pub parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { source: ImageSource },
    /// Text already extracted from an uploaded file (e.g. a PDF).
    Document { name: String, text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

impl UserContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn with_part(mut self, part: ContentPart) -> Self {
        self.parts.push(part);
        self
    }

    /// The text parts joined together, attachments left out.
    pub fn plain_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn approximate_len(&self) -> usize {
        self.parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.len(),
                ContentPart::Document { text, .. } => text.len(),
                ContentPart::Image { source } => match source {
                    ImageSource::Base64 { data, .. } => data.len(),
                    ImageSource::Url { url } => url.len(),
                },
            })
            .sum()
    }
}

/// An attachment as sent by a client alongside a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    /// `url` is either `data:<mime>;base64,<data>` or an http(s) URL.
    Image {
        #[serde(default)]
        name: Option<String>,
        url: String,
    },
    Document { name: String, text: String },
}

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("unsupported image url: {0}")]
    UnsupportedImageUrl(String),
    #[error("data url is not base64 encoded")]
    NotBase64,
}

impl Attachment {
    pub fn into_part(self) -> Result<ContentPart, AttachmentError> {
        match self {
            Attachment::Document { name, text } => Ok(ContentPart::Document { name, text }),
            Attachment::Image { url, .. } => {
                if let Some(rest) = url.strip_prefix("data:") {
                    let (meta, data) = rest.split_once(',').ok_or(AttachmentError::NotBase64)?;
                    let media_type = meta
                        .strip_suffix(";base64")
                        .ok_or(AttachmentError::NotBase64)?;
                    Ok(ContentPart::Image {
                        source: ImageSource::Base64 {
                            media_type: media_type.to_string(),
                            data: data.to_string(),
                        },
                    })
                } else if url.starts_with("http://") || url.starts_with("https://") {
                    Ok(ContentPart::Image {
                        source: ImageSource::Url { url },
                    })
                } else {
                    let shown: String = url.chars().take(32).collect();
                    Err(AttachmentError::UnsupportedImageUrl(shown))
                }
            }
        }
    }
}

/// Manages conversation history with context window awareness.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
    /// Maximum approximate token count before truncation
    max_tokens: usize,
    /// System prompt (always retained)
    system_prompt: Option<String>,
}

impl Conversation {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_tokens,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Replay a plain-text history entry (from a client or the store).
    pub fn push_text(&mut self, role: Role, text: impl Into<String>) {
        let text = text.into();
        match role {
            Role::User => self.messages.push(ConversationMessage::User(UserContent::text(text))),
            Role::Assistant => self.messages.push(ConversationMessage::Assistant(AssistantContent {
                text: Some(text),
                tool_calls: Vec::new(),
            })),
        }
    }

    /// Start a new exchange. Older history is trimmed first so the new
    /// message fits the budget.
    pub fn add_user(&mut self, content: UserContent) {
        self.trim_history(content.approximate_len() / 4);
        self.messages.push(ConversationMessage::User(content));
    }

    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.add_user(UserContent::text(text));
    }

    pub fn add_assistant_response(&mut self, content: AssistantContent) {
        self.messages.push(ConversationMessage::Assistant(content));
    }

    pub fn add_tool_results(&mut self, results: Vec<ToolResult>) {
        self.messages.push(ConversationMessage::ToolResults(results));
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Approximate token count using character count / 4 heuristic.
    fn approximate_tokens(&self) -> usize {
        let char_count: usize = self
            .messages
            .iter()
            .map(|m| match m {
                ConversationMessage::User(content) => content.approximate_len(),
                ConversationMessage::Assistant(content) => {
                    content.text.as_ref().map_or(0, |t| t.len())
                        + content
                            .tool_calls
                            .iter()
                            .map(|tc| tc.input.to_string().len())
                            .sum::<usize>()
                }
                ConversationMessage::ToolResults(results) => {
                    results.iter().map(|r| r.content.len()).sum()
                }
            })
            .sum();
        char_count / 4
    }

    /// Drop whole exchanges from the front until `incoming` more tokens fit.
    ///
    /// Only called before a user message is added, so messages of the
    /// exchange in progress are never removed and the history always opens
    /// with a user message.
    fn trim_history(&mut self, incoming: usize) {
        while !self.messages.is_empty() && self.approximate_tokens() + incoming > self.max_tokens {
            self.messages.remove(0);
            while !matches!(self.messages.first(), None | Some(ConversationMessage::User(_))) {
                self.messages.remove(0);
            }
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(100_000) // 100k tokens default
    }
}
