//! One call-and-response cycle with the model provider.
//!
//! The driver owns the provider stream for the duration of a turn and
//! turns provider events into normalized [`StreamEvent`]s as they arrive.
//! The turn ends with exactly one [`TurnOutput::Finished`] or one
//! [`TurnError`]; nothing is retried.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::conversation::AssistantContent;
use crate::provider::{LlmError, ProviderEvent, ProviderStream, StopReason, ToolAwareLlmProvider, TurnRequest};
use crate::stream::{ErrorReason, StreamEvent, Usage};
use crate::tool::ToolCall;

/// How a successful turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStop {
    EndOfResponse,
    ToolRequested,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub stop: TurnStop,
    /// Calls to execute locally; empty unless `stop` is `ToolRequested`.
    pub tool_calls: Vec<ToolCall>,
    pub text: String,
    pub usage: Usage,
    /// What gets appended to the conversation as the assistant message.
    pub content: AssistantContent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutput {
    Event(StreamEvent),
    Finished(TurnResult),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TurnError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("turn exceeded {0:?}")]
    TurnTimeout(Duration),
    #[error("no data from provider for {0:?}")]
    IdleTimeout(Duration),
    #[error("provider stream ended without a stop reason")]
    IncompleteStream,
}

impl TurnError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            TurnError::Transport(_) | TurnError::IncompleteStream => ErrorReason::Transport,
            TurnError::Provider(_) => ErrorReason::Provider,
            TurnError::Protocol(_) => ErrorReason::Protocol,
            TurnError::TurnTimeout(_) | TurnError::IdleTimeout(_) => ErrorReason::Timeout,
        }
    }
}

impl From<LlmError> for TurnError {
    fn from(e: LlmError) -> Self {
        match e.reason() {
            ErrorReason::Transport => TurnError::Transport(e.to_string()),
            ErrorReason::Protocol => TurnError::Protocol(e.to_string()),
            _ => TurnError::Provider(e.to_string()),
        }
    }
}

pub type TurnStream = Pin<Box<dyn Stream<Item = Result<TurnOutput, TurnError>> + Send>>;

/// Issues one provider call per turn and enforces the turn and idle deadlines.
#[derive(Clone)]
pub struct TurnDriver {
    provider: Arc<dyn ToolAwareLlmProvider>,
    turn_timeout: Duration,
    idle_timeout: Duration,
}

impl TurnDriver {
    pub fn new(provider: Arc<dyn ToolAwareLlmProvider>) -> Self {
        Self {
            provider,
            turn_timeout: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    /// Run one turn. Nothing happens until the returned stream is polled;
    /// dropping it drops the provider connection.
    pub fn run_turn(&self, request: TurnRequest) -> TurnStream {
        let state = DriveState {
            phase: Phase::Pending(request),
            provider: self.provider.clone(),
            turn_timeout: self.turn_timeout,
            idle_timeout: self.idle_timeout,
            deadline: None,
            accumulator: TurnAccumulator::default(),
            ready: std::collections::VecDeque::new(),
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            loop {
                if let Some(output) = state.ready.pop_front() {
                    return Some((Ok(output), state));
                }

                match std::mem::replace(&mut state.phase, Phase::Done) {
                    Phase::Done => return None,
                    Phase::Pending(request) => {
                        let deadline = Instant::now() + state.turn_timeout;
                        state.deadline = Some(deadline);
                        let provider = state.provider.clone();
                        debug!(provider = provider.provider_name(), "Opening provider stream");
                        match tokio::time::timeout_at(deadline, provider.stream_with_tools(request)).await {
                            Ok(Ok(stream)) => state.phase = Phase::Streaming(stream),
                            Ok(Err(e)) => return Some((Err(TurnError::from(e)), state)),
                            Err(_) => return Some((Err(TurnError::TurnTimeout(state.turn_timeout)), state)),
                        }
                    }
                    Phase::Streaming(mut provider_stream) => {
                        let deadline = state.deadline.unwrap_or_else(Instant::now);
                        let idle_deadline = Instant::now() + state.idle_timeout;
                        let wake = deadline.min(idle_deadline);

                        match tokio::time::timeout_at(wake, provider_stream.next()).await {
                            Err(_) => {
                                let err = if Instant::now() >= deadline {
                                    TurnError::TurnTimeout(state.turn_timeout)
                                } else {
                                    TurnError::IdleTimeout(state.idle_timeout)
                                };
                                warn!(error = %err, "Turn timed out");
                                return Some((Err(err), state));
                            }
                            Ok(Some(Ok(event))) => match state.accumulator.apply(event) {
                                Ok(events) => {
                                    state.ready.extend(events.into_iter().map(TurnOutput::Event));
                                    state.phase = Phase::Streaming(provider_stream);
                                }
                                Err(e) => return Some((Err(e), state)),
                            },
                            Ok(Some(Err(e))) => {
                                warn!(error = %e, "Provider stream failed");
                                return Some((Err(TurnError::from(e)), state));
                            }
                            Ok(None) => {
                                let accumulator = std::mem::take(&mut state.accumulator);
                                match accumulator.finish() {
                                    Ok(result) => {
                                        state.ready.push_back(TurnOutput::Event(StreamEvent::Usage {
                                            usage: result.usage,
                                        }));
                                        state.ready.push_back(TurnOutput::Finished(result));
                                    }
                                    Err(e) => return Some((Err(e), state)),
                                }
                            }
                        }
                    }
                }
            }
        }))
    }
}

enum Phase {
    Pending(TurnRequest),
    Streaming(ProviderStream),
    Done,
}

struct DriveState {
    phase: Phase,
    provider: Arc<dyn ToolAwareLlmProvider>,
    turn_timeout: Duration,
    idle_timeout: Duration,
    deadline: Option<Instant>,
    accumulator: TurnAccumulator,
    ready: std::collections::VecDeque<TurnOutput>,
}

#[derive(Debug, Default)]
struct PendingCall {
    name: String,
    server_side: bool,
    arguments: String,
}

/// Folds provider events into the turn's text, tool calls and usage.
#[derive(Debug, Default)]
struct TurnAccumulator {
    text: String,
    open_calls: HashMap<String, PendingCall>,
    tool_calls: Vec<ToolCall>,
    server_calls: usize,
    stop_reason: Option<StopReason>,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl TurnAccumulator {
    fn apply(&mut self, event: ProviderEvent) -> Result<Vec<StreamEvent>, TurnError> {
        let mut out = Vec::new();
        match event {
            ProviderEvent::TextDelta(delta) => {
                if !delta.is_empty() {
                    self.text.push_str(&delta);
                    out.push(StreamEvent::text(delta));
                }
            }
            ProviderEvent::TextSnapshot(snapshot) => {
                let Some(suffix) = snapshot.strip_prefix(self.text.as_str()) else {
                    return Err(TurnError::Protocol(format!(
                        "cumulative text no longer extends the {} bytes already sent",
                        self.text.len()
                    )));
                };
                if !suffix.is_empty() {
                    let suffix = suffix.to_string();
                    self.text.push_str(&suffix);
                    out.push(StreamEvent::text(suffix));
                }
            }
            ProviderEvent::ToolCallStart { id, name, server_side } => {
                if self.open_calls.contains_key(&id) {
                    warn!(id = %id, "Duplicate tool call start, ignoring");
                } else {
                    self.open_calls.insert(
                        id,
                        PendingCall {
                            name,
                            server_side,
                            arguments: String::new(),
                        },
                    );
                }
            }
            ProviderEvent::ToolCallDelta { id, partial_json } => match self.open_calls.get_mut(&id) {
                Some(call) => call.arguments.push_str(&partial_json),
                None => warn!(id = %id, "Argument fragment for unknown tool call"),
            },
            ProviderEvent::ToolCallEnd { id } => {
                let Some(call) = self.open_calls.remove(&id) else {
                    warn!(id = %id, "End of unknown tool call");
                    return Ok(out);
                };
                let input = parse_arguments(&id, &call.arguments);
                out.push(StreamEvent::ToolCall {
                    id: id.clone(),
                    name: call.name.clone(),
                    input: input.clone(),
                });
                if call.server_side {
                    self.server_calls += 1;
                } else {
                    self.tool_calls.push(ToolCall {
                        id,
                        name: call.name,
                        input,
                    });
                }
            }
            ProviderEvent::Citation(citation) => out.push(StreamEvent::Citation(citation)),
            ProviderEvent::Usage {
                input_tokens,
                output_tokens,
            } => {
                if input_tokens.is_some() {
                    self.input_tokens = input_tokens;
                }
                if output_tokens.is_some() {
                    self.output_tokens = output_tokens;
                }
            }
            ProviderEvent::MessageEnd { stop_reason } => self.stop_reason = Some(stop_reason),
            ProviderEvent::Error { message } => return Err(TurnError::Provider(message)),
        }
        Ok(out)
    }

    fn finish(self) -> Result<TurnResult, TurnError> {
        let stop_reason = self.stop_reason.ok_or(TurnError::IncompleteStream)?;
        for id in self.open_calls.keys() {
            warn!(id = %id, "Tool call never completed, dropping it");
        }

        let stop = match stop_reason {
            StopReason::ToolUse if !self.tool_calls.is_empty() => TurnStop::ToolRequested,
            StopReason::ToolUse => {
                debug!(server_calls = self.server_calls, "Tool-use stop without local tool calls");
                TurnStop::EndOfResponse
            }
            StopReason::MaxTokens => {
                warn!("Response truncated at max tokens");
                TurnStop::EndOfResponse
            }
            StopReason::StopSequence => {
                info!("Response ended on a stop sequence");
                TurnStop::EndOfResponse
            }
            StopReason::EndTurn => TurnStop::EndOfResponse,
        };

        let tool_calls = match stop {
            TurnStop::ToolRequested => self.tool_calls,
            TurnStop::EndOfResponse => Vec::new(),
        };
        let content = AssistantContent {
            text: (!self.text.is_empty()).then(|| self.text.clone()),
            tool_calls: tool_calls.clone(),
        };

        Ok(TurnResult {
            stop,
            tool_calls,
            text: self.text,
            usage: Usage {
                input_tokens: self.input_tokens.unwrap_or(0),
                output_tokens: self.output_tokens.unwrap_or(0),
            },
            content,
        })
    }
}

fn parse_arguments(id: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(id, error = %e, "Malformed tool arguments, using empty input");
            Value::Object(Default::default())
        }
    }
}
