use crate::conversation::ConversationMessage;
use crate::stream::{Citation, ErrorReason};
use crate::tool::ToolDefinition;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// Provider-level events, already stripped of any provider wire shape.
///
/// The turn driver is the only consumer; it turns these into
/// [`StreamEvent`](crate::stream::StreamEvent)s and a turn result.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Incremental text.
    TextDelta(String),
    /// Cumulative text so far, for providers that resend everything.
    TextSnapshot(String),
    ToolCallStart {
        id: String,
        name: String,
        /// Executed by the provider itself (e.g. web search).
        server_side: bool,
    },
    ToolCallDelta { id: String, partial_json: String },
    ToolCallEnd { id: String },
    Citation(Citation),
    /// Partial usage report; `None` leaves the previous value.
    Usage {
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
    },
    MessageEnd { stop_reason: StopReason },
    Error { message: String },
}

/// Tools the provider runs on its side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerTool {
    WebSearch { max_uses: u32 },
}

/// Everything needed for one call to the provider.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub messages: Vec<ConversationMessage>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub server_tools: Vec<ServerTool>,
    pub temperature: f32,
    pub max_tokens: u32,
}

pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent, LlmError>> + Send>>;

/// Trait for LLM providers that support tool use and streaming.
///
/// This trait lives in tool-runtime (not in crates/llm) because it's
/// defined by the consumer (the agentic loop), not the provider.
/// Implementations live in crates/llm.
#[async_trait]
pub trait ToolAwareLlmProvider: Send + Sync {
    /// Open a streaming response. Errors here are connection or status
    /// failures; anything after that arrives through the stream.
    async fn stream_with_tools(&self, request: TurnRequest) -> Result<ProviderStream, LlmError>;

    /// Provider name for logging/debugging (e.g., "claude", "mock")
    fn provider_name(&self) -> &str;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Authentication failed")]
    AuthError,
    #[error("Stream error: {0}")]
    StreamError(String),
    /// The byte stream could not be framed.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl LlmError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            LlmError::NetworkError(_) | LlmError::StreamError(_) => ErrorReason::Transport,
            LlmError::Protocol(_) => ErrorReason::Protocol,
            LlmError::ApiError { .. }
            | LlmError::InvalidResponse(_)
            | LlmError::RateLimited { .. }
            | LlmError::AuthError => ErrorReason::Provider,
        }
    }
}

/// Mock LLM provider for testing the agentic loop without real API calls.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use futures::stream::{self, StreamExt};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Scripted {
        Events(Vec<Result<ProviderEvent, LlmError>>),
        /// Yield the events, then never produce another chunk.
        Stall(Vec<ProviderEvent>),
        Reject(LlmError),
    }

    /// A mock provider that replays scripted responses in FIFO order and
    /// records every request it receives.
    pub struct MockLlmProvider {
        responses: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<TurnRequest>>,
    }

    impl MockLlmProvider {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn push(&self, scripted: Scripted) {
            self.responses.lock().unwrap().push_back(scripted);
        }

        /// Queue a response that will be returned on the next call.
        pub fn queue_response(&self, events: Vec<ProviderEvent>) {
            self.push(Scripted::Events(events.into_iter().map(Ok).collect()));
        }

        /// Queue a response whose stream fails after `events`.
        pub fn queue_failure(&self, events: Vec<ProviderEvent>, error: LlmError) {
            let mut items: Vec<_> = events.into_iter().map(Ok).collect();
            items.push(Err(error));
            self.push(Scripted::Events(items));
        }

        pub fn queue_stall(&self, events: Vec<ProviderEvent>) {
            self.push(Scripted::Stall(events));
        }

        /// The next call fails before any stream is opened.
        pub fn queue_rejection(&self, error: LlmError) {
            self.push(Scripted::Reject(error));
        }

        /// Queue a simple text response.
        pub fn queue_text(&self, text: &str) {
            self.queue_response(vec![
                ProviderEvent::TextDelta(text.to_string()),
                ProviderEvent::MessageEnd {
                    stop_reason: StopReason::EndTurn,
                },
            ]);
        }

        /// Queue a turn that requests the given `(id, name, input)` tools.
        pub fn queue_tool_calls(&self, calls: &[(&str, &str, Value)]) {
            self.queue_response(tool_call_events(calls));
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn requests(&self) -> Vec<TurnRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Default for MockLlmProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Start/delta/end events for each call, then a tool-use stop.
    pub fn tool_call_events(calls: &[(&str, &str, Value)]) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        for (id, name, input) in calls {
            events.push(ProviderEvent::ToolCallStart {
                id: id.to_string(),
                name: name.to_string(),
                server_side: false,
            });
            events.push(ProviderEvent::ToolCallDelta {
                id: id.to_string(),
                partial_json: input.to_string(),
            });
            events.push(ProviderEvent::ToolCallEnd { id: id.to_string() });
        }
        events.push(ProviderEvent::MessageEnd {
            stop_reason: StopReason::ToolUse,
        });
        events
    }

    #[async_trait]
    impl ToolAwareLlmProvider for MockLlmProvider {
        async fn stream_with_tools(&self, request: TurnRequest) -> Result<ProviderStream, LlmError> {
            self.requests.lock().unwrap().push(request);
            let scripted = self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
                Scripted::Events(vec![Ok(ProviderEvent::MessageEnd {
                    stop_reason: StopReason::EndTurn,
                })])
            });
            match scripted {
                Scripted::Events(items) => Ok(Box::pin(stream::iter(items))),
                Scripted::Stall(events) => Ok(Box::pin(
                    stream::iter(events.into_iter().map(Ok)).chain(stream::pending()),
                )),
                Scripted::Reject(error) => Err(error),
            }
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reasons() {
        assert_eq!(LlmError::NetworkError("reset".into()).reason(), ErrorReason::Transport);
        assert_eq!(LlmError::AuthError.reason(), ErrorReason::Provider);
        assert_eq!(LlmError::Protocol("overflow".into()).reason(), ErrorReason::Protocol);
        assert_eq!(
            LlmError::RateLimited { retry_after_secs: 5 }.reason(),
            ErrorReason::Provider
        );
    }

    #[tokio::test]
    async fn mock_replays_in_order_and_records_requests() {
        use futures::StreamExt;
        let provider = mock::MockLlmProvider::new();
        provider.queue_text("first");
        provider.queue_text("second");

        let request = TurnRequest {
            messages: vec![],
            system_prompt: None,
            tools: vec![],
            server_tools: vec![],
            temperature: 0.0,
            max_tokens: 16,
        };
        for expected in ["first", "second"] {
            let events: Vec<_> = provider
                .stream_with_tools(request.clone())
                .await
                .unwrap()
                .collect()
                .await;
            assert_eq!(events[0].as_ref().unwrap(), &ProviderEvent::TextDelta(expected.into()));
        }
        assert_eq!(provider.call_count(), 2);
    }
}
