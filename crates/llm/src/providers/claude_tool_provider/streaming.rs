//! [`ToolAwareLlmProvider`] trait implementation for the Claude streaming API.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, warn};

use relay_tool_runtime::frame::parse_fields;
use relay_tool_runtime::provider::{LlmError, ProviderEvent, ProviderStream, ToolAwareLlmProvider, TurnRequest};
use relay_tool_runtime::sse::{SseError, SseParser, DEFAULT_MAX_BUFFER_BYTES};

use super::sse::EventTranslator;
use super::translate::{messages_to_claude, server_tool_to_claude, tool_definition_to_claude};

/// Claude (Anthropic) provider with streaming tool-use support.
///
/// Uses the Anthropic Messages API (`/v1/messages`) with `stream: true` to emit
/// incremental [`ProviderEvent`]s that the turn driver can consume.
pub struct ClaudeToolProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_frame_buffer: usize,
}

impl ClaudeToolProvider {
    /// Create a new Claude tool provider.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `model` - Model name (e.g. `"claude-sonnet-4-5-20250929"`)
    /// * `base_url` - API base URL (e.g. `"https://api.anthropic.com"`)
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_frame_buffer: DEFAULT_MAX_BUFFER_BYTES,
        }
    }

    /// Create a provider with sensible defaults.
    pub fn with_defaults(api_key: String) -> Self {
        Self::new(
            api_key,
            "claude-sonnet-4-5-20250929".to_string(),
            "https://api.anthropic.com".to_string(),
        )
    }

    /// Bound on a single not-yet-delimited SSE frame.
    pub fn with_max_frame_buffer(mut self, bytes: usize) -> Self {
        self.max_frame_buffer = bytes;
        self
    }

    pub(super) fn request_body(&self, request: &TurnRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages_to_claude(&request.messages),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        });

        let mut api_tools: Vec<Value> = request.tools.iter().map(tool_definition_to_claude).collect();
        api_tools.extend(request.server_tools.iter().map(server_tool_to_claude));
        if !api_tools.is_empty() {
            body["tools"] = json!(api_tools);
        }

        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }
        body
    }
}

/// Turn a stream of raw SSE frames into provider events.
///
/// Ends after `message_stop` without waiting for the connection to close.
pub(super) fn provider_events<S>(frames: S) -> ProviderStream
where
    S: Stream<Item = Result<String, SseError>> + Send + 'static,
{
    struct State<S> {
        frames: Pin<Box<S>>,
        translator: EventTranslator,
        pending: VecDeque<ProviderEvent>,
        done: bool,
    }

    let state = State {
        frames: Box::pin(frames),
        translator: EventTranslator::new(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            // First, drain any pending events
            if let Some(evt) = state.pending.pop_front() {
                return Some((Ok(evt), state));
            }
            if state.done || state.translator.is_finished() {
                return None;
            }

            match state.frames.next().await {
                Some(Ok(frame)) => {
                    let raw = parse_fields(&frame);
                    let Some(data) = raw.data else {
                        continue;
                    };
                    let events = state.translator.translate(raw.event.as_deref(), &data);
                    state.pending.extend(events);
                }
                Some(Err(SseError::BufferOverflow { limit })) => {
                    state.done = true;
                    return Some((
                        Err(LlmError::Protocol(format!("SSE frame exceeded {limit} bytes"))),
                        state,
                    ));
                }
                Some(Err(SseError::Transport(e))) => {
                    state.done = true;
                    return Some((Err(LlmError::StreamError(e)), state));
                }
                None => return None,
            }
        }
    }))
}

#[async_trait]
impl ToolAwareLlmProvider for ClaudeToolProvider {
    async fn stream_with_tools(&self, request: TurnRequest) -> Result<ProviderStream, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.request_body(&request);

        debug!(model = %self.model, url = %url, messages = request.messages.len(), "starting Claude streaming request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status().as_u16();

        // Handle non-200 responses
        if status != 200 {
            let body_text = response.text().await.unwrap_or_default();
            warn!(status, "Claude request rejected");
            return Err(status_error(status, &body_text));
        }

        let frames = SseParser::with_max_buffer(self.max_frame_buffer).frames(response.bytes_stream());
        Ok(provider_events(frames))
    }

    fn provider_name(&self) -> &str {
        "claude"
    }
}

pub(super) fn status_error(status: u16, body_text: &str) -> LlmError {
    match status {
        401 => LlmError::AuthError,
        429 => {
            // Try to parse retry-after from the response
            let retry_after = serde_json::from_str::<Value>(body_text)
                .ok()
                .and_then(|v| v["error"]["retry_after_secs"].as_u64())
                .unwrap_or(30);
            LlmError::RateLimited {
                retry_after_secs: retry_after,
            }
        }
        _ => {
            let message = serde_json::from_str::<Value>(body_text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(String::from))
                .unwrap_or_else(|| body_text.to_string());
            LlmError::ApiError { status, message }
        }
    }
}
