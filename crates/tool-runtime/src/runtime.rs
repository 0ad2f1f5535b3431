use crate::conversation::{Conversation, UserContent};
use crate::provider::{ServerTool, ToolAwareLlmProvider, TurnRequest};
use crate::registry::ToolRegistry;
use crate::sink::{EventSink, ReceiverGone};
use crate::store::{MessageStore, StoreError};
use crate::stream::{ErrorReason, StreamEvent, Usage};
use crate::tool::{SuggestionAccumulator, ToolCall, ToolContext, ToolError, ToolResult};
use crate::turn::{TurnDriver, TurnError, TurnOutput, TurnResult, TurnStop};
use futures::stream::{FuturesUnordered, StreamExt};
use relay_core::config::AgentConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the loop stands between two turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingModel,
    ExecutingTools,
    Done,
    Failed,
}

impl LoopState {
    /// Transition out of `AwaitingModel` once a turn has finished.
    ///
    /// Depends only on how the turn stopped, whether it produced tool calls,
    /// and the turn budget, so replaying a history replays the control flow.
    pub fn after_turn(stop: TurnStop, has_tool_calls: bool, turns_used: usize, max_turns: usize) -> LoopState {
        match stop {
            TurnStop::ToolRequested if has_tool_calls => {
                if turns_used < max_turns {
                    LoopState::ExecutingTools
                } else {
                    LoopState::Failed
                }
            }
            _ => LoopState::Done,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Done | LoopState::Failed)
    }
}

/// Per-request inputs that are not part of the conversation itself.
#[derive(Clone, Default)]
pub struct RunContext {
    pub request_id: String,
    /// With `store`, enables persisting the exchange on success.
    pub conversation_id: Option<String>,
    pub store: Option<Arc<dyn MessageStore>>,
    pub cancellation: CancellationToken,
    pub suggestions: SuggestionAccumulator,
}

impl RunContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::default()
        }
    }

    pub fn with_persistence(mut self, conversation_id: impl Into<String>, store: Arc<dyn MessageStore>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self.store = Some(store);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Summary of a run that reached `Done`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub state: LoopState,
    pub turns: usize,
    /// Assistant text of every turn, concatenated.
    pub text: String,
    pub suggestions: Vec<String>,
    pub usage: Usage,
}

/// A run that reached `Done` and has not been persisted yet.
struct Exchange {
    user_text: String,
    turns: usize,
    text: String,
    usage: Usage,
}

/// Events and outcome of a non-streaming run.
#[derive(Debug, Clone)]
pub struct CollectedRun {
    pub events: Vec<StreamEvent>,
    pub outcome: LoopOutcome,
}

/// The core agentic loop that orchestrates LLM ↔ Tool execution.
///
/// Flow: User → LLM → ToolCalls → Execute → Results → LLM → ... → Final Text
pub struct AgenticLoop {
    driver: TurnDriver,
    registry: Arc<ToolRegistry>,
    max_turns: usize,
    temperature: f32,
    max_tokens: u32,
    request_timeout: Duration,
    tool_timeout: Duration,
    server_tools: Vec<ServerTool>,
}

impl AgenticLoop {
    pub fn new(provider: Arc<dyn ToolAwareLlmProvider>, registry: Arc<ToolRegistry>) -> Self {
        let defaults = AgentConfig::default();
        Self {
            driver: TurnDriver::new(provider)
                .with_turn_timeout(defaults.turn_timeout())
                .with_idle_timeout(defaults.idle_timeout()),
            registry,
            max_turns: defaults.max_turns,
            temperature: 1.0,
            max_tokens: 4096,
            request_timeout: defaults.request_timeout(),
            tool_timeout: defaults.tool_timeout(),
            server_tools: Vec::new(),
        }
    }

    /// Apply the turn budget and every timeout from config.
    pub fn with_agent_config(mut self, config: &AgentConfig) -> Self {
        self.driver = self
            .driver
            .with_turn_timeout(config.turn_timeout())
            .with_idle_timeout(config.idle_timeout());
        self.max_turns = config.max_turns;
        self.request_timeout = config.request_timeout();
        self.tool_timeout = config.tool_timeout();
        self
    }

    pub fn with_max_turns(mut self, max: usize) -> Self {
        self.max_turns = max;
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.driver = self.driver.with_turn_timeout(timeout);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.driver = self.driver.with_idle_timeout(timeout);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_server_tools(mut self, tools: Vec<ServerTool>) -> Self {
        self.server_tools = tools;
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Run one user message through the loop, writing events into `tx`.
    ///
    /// Ends with exactly one `done` or `error` event unless the receiver was
    /// dropped or the run was cancelled, in which case nothing more is sent.
    pub async fn run_streaming(
        &self,
        conversation: &mut Conversation,
        user: UserContent,
        ctx: RunContext,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<LoopOutcome, AgenticLoopError> {
        let sink = EventSink::new(tx);
        let tool_cancel = ctx.cancellation.child_token();
        let _cancel_tools = tool_cancel.clone().drop_guard();

        let exchange = tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => Err(AgenticLoopError::Cancelled),
            _ = sink.closed() => Err(AgenticLoopError::ClientGone),
            exchange = tokio::time::timeout(
                self.request_timeout,
                self.drive(conversation, user, &ctx, &tool_cancel, &sink),
            ) => exchange.unwrap_or(Err(AgenticLoopError::RequestTimeout(self.request_timeout))),
        };
        // Runs outside the select so a disconnect cannot interrupt persistence.
        let result = match exchange {
            Ok(exchange) => self.finish(exchange, &ctx, &sink).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(outcome) => info!(
                request_id = %ctx.request_id,
                turns = outcome.turns,
                input_tokens = outcome.usage.input_tokens,
                output_tokens = outcome.usage.output_tokens,
                "Agentic loop complete"
            ),
            Err(e @ (AgenticLoopError::Cancelled | AgenticLoopError::ClientGone)) => {
                info!(request_id = %ctx.request_id, reason = %e, "Agentic loop stopped");
            }
            Err(e) => {
                warn!(request_id = %ctx.request_id, error = %e, "Agentic loop failed");
                if sink.fail(e.reason(), e.to_string()).await.is_err() {
                    debug!(request_id = %ctx.request_id, "Receiver gone before error event");
                }
            }
        }
        result
    }

    /// Non-streaming convenience: collects every event of the run.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        user: UserContent,
        ctx: RunContext,
    ) -> Result<CollectedRun, AgenticLoopError> {
        let (tx, mut rx) = mpsc::channel(64);
        let collect = async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        };
        let (outcome, events) = tokio::join!(self.run_streaming(conversation, user, ctx, tx), collect);
        Ok(CollectedRun {
            events,
            outcome: outcome?,
        })
    }

    async fn drive(
        &self,
        conversation: &mut Conversation,
        user: UserContent,
        ctx: &RunContext,
        tool_cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Result<Exchange, AgenticLoopError> {
        let user_text = user.plain_text();
        conversation.add_user(user);

        let tool_ctx = ToolContext {
            request_id: ctx.request_id.clone(),
            suggestions: ctx.suggestions.clone(),
            cancellation: tool_cancel.clone(),
        };
        let tools = self.registry.list();
        let mut turns = 0;
        let mut text = String::new();
        let mut usage = Usage::default();

        loop {
            turns += 1;
            debug!(turn = turns, request_id = %ctx.request_id, "Starting agentic loop turn");

            let request = TurnRequest {
                messages: conversation.messages().to_vec(),
                system_prompt: conversation.system_prompt().map(String::from),
                tools: tools.clone(),
                server_tools: self.server_tools.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };
            let result = self.relay_turn(request, sink).await?;
            usage.add(result.usage);
            text.push_str(&result.text);
            conversation.add_assistant_response(result.content.clone());

            match LoopState::after_turn(result.stop, !result.tool_calls.is_empty(), turns, self.max_turns) {
                LoopState::ExecutingTools => {
                    info!(turn = turns, count = result.tool_calls.len(), "Executing tool calls");
                    let results = self.execute_tool_calls(&result.tool_calls, &tool_ctx, sink).await?;
                    conversation.add_tool_results(results);
                }
                LoopState::Failed => return Err(AgenticLoopError::Ceiling(self.max_turns)),
                LoopState::Done => break,
                LoopState::AwaitingModel => {}
            }
        }

        Ok(Exchange {
            user_text,
            turns,
            text,
            usage,
        })
    }

    /// Persist a completed exchange, then close the stream with the captured
    /// suggestions and `done`.
    async fn finish(&self, exchange: Exchange, ctx: &RunContext, sink: &EventSink) -> Result<LoopOutcome, AgenticLoopError> {
        let Exchange {
            user_text,
            turns,
            text,
            usage,
        } = exchange;

        if let (Some(conversation_id), Some(store)) = (&ctx.conversation_id, &ctx.store) {
            store.append_exchange(conversation_id, &user_text, &text).await?;
            debug!(conversation_id = %conversation_id, "Persisted exchange");
        }
        if ctx.cancellation.is_cancelled() {
            return Err(AgenticLoopError::Cancelled);
        }

        let suggestions = ctx.suggestions.snapshot();
        if !suggestions.is_empty() {
            sink.send(StreamEvent::Suggestions {
                suggestions: suggestions.clone(),
            })
            .await?;
        }
        sink.send(StreamEvent::Done).await?;

        Ok(LoopOutcome {
            state: LoopState::Done,
            turns,
            text,
            suggestions,
            usage,
        })
    }

    /// Forward one turn's events and return its result.
    async fn relay_turn(&self, request: TurnRequest, sink: &EventSink) -> Result<TurnResult, AgenticLoopError> {
        let mut stream = self.driver.run_turn(request);
        let mut finished = None;
        while let Some(item) = stream.next().await {
            match item? {
                TurnOutput::Event(event) => {
                    if self.forwards(&event) {
                        sink.send(event).await?;
                    }
                }
                TurnOutput::Finished(result) => finished = Some(result),
            }
        }
        finished.ok_or(AgenticLoopError::Turn(TurnError::IncompleteStream))
    }

    fn forwards(&self, event: &StreamEvent) -> bool {
        match event {
            StreamEvent::ToolCall { name, .. } | StreamEvent::ToolResult { name, .. } => {
                !self.registry.is_hidden(name)
            }
            _ => true,
        }
    }

    /// Run every call concurrently. Results are forwarded as they complete
    /// and returned in call order.
    async fn execute_tool_calls(
        &self,
        calls: &[ToolCall],
        ctx: &ToolContext,
        sink: &EventSink,
    ) -> Result<Vec<ToolResult>, AgenticLoopError> {
        let mut pending: FuturesUnordered<_> = calls
            .iter()
            .enumerate()
            .map(|(index, call)| async move { (index, self.execute_one(call, ctx).await) })
            .collect();

        let mut results: Vec<Option<ToolResult>> = vec![None; calls.len()];
        while let Some((index, result)) = pending.next().await {
            let call = &calls[index];
            let event = StreamEvent::ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                content: result.content.clone(),
                is_error: result.is_error,
            };
            if self.forwards(&event) {
                sink.send(event).await?;
            }
            results[index] = Some(result);
        }

        Ok(results.into_iter().flatten().collect())
    }

    async fn execute_one(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool = %call.name, "Unknown tool requested");
            return ToolResult::error(call.id.clone(), format!("Unknown tool: {}", call.name));
        };

        let outcome = tokio::time::timeout(self.tool_timeout, tool.execute(call.input.clone(), ctx))
            .await
            .unwrap_or(Err(ToolError::Timeout(self.tool_timeout)));

        match outcome {
            Ok(mut result) => {
                result.tool_call_id = call.id.clone();
                result
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                ToolResult::error(call.id.clone(), e)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgenticLoopError {
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error("turn ceiling of {0} reached while tools were still requested")]
    Ceiling(usize),
    #[error("request exceeded {0:?}")]
    RequestTimeout(Duration),
    #[error("request cancelled")]
    Cancelled,
    #[error("client disconnected")]
    ClientGone,
    #[error("failed to persist conversation: {0}")]
    Persistence(#[from] StoreError),
}

impl AgenticLoopError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            AgenticLoopError::Turn(e) => e.reason(),
            AgenticLoopError::Ceiling(_) => ErrorReason::Ceiling,
            AgenticLoopError::RequestTimeout(_) => ErrorReason::Timeout,
            AgenticLoopError::Cancelled | AgenticLoopError::ClientGone => ErrorReason::Cancelled,
            AgenticLoopError::Persistence(_) => ErrorReason::Persistence,
        }
    }
}

impl From<ReceiverGone> for AgenticLoopError {
    fn from(_: ReceiverGone) -> Self {
        AgenticLoopError::ClientGone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockLlmProvider;
    use crate::provider::{LlmError, ProviderEvent, StopReason};
    use crate::store::memory::MemoryStore;
    use crate::tool::{EchoTool, Tool, ToolDefinition};
    use crate::tools::SuggestActionsTool;
    use crate::conversation::{ConversationMessage, Role};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// Sleeps for `ms` then returns `label`.
    struct SleepTool;

    #[async_trait]
    impl Tool for SleepTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "sleep".to_string(),
                description: "Sleeps, then answers".to_string(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
            let ms = input["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ToolResult::ok(input["label"].as_str().unwrap_or("").to_string()))
        }
    }

    fn setup_test_loop() -> (AgenticLoop, Arc<MockLlmProvider>) {
        let provider = Arc::new(MockLlmProvider::new());
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        registry.register(SleepTool).unwrap();
        registry.register_hidden(SuggestActionsTool).unwrap();

        let agentic_loop = AgenticLoop::new(
            provider.clone() as Arc<dyn ToolAwareLlmProvider>,
            Arc::new(registry),
        );
        (agentic_loop, provider)
    }

    fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.kind()).collect()
    }

    async fn run_to_end(
        agentic_loop: &AgenticLoop,
        ctx: RunContext,
    ) -> (Vec<StreamEvent>, Result<LoopOutcome, AgenticLoopError>) {
        let (tx, mut rx) = mpsc::channel(256);
        let mut conv = Conversation::default();
        let result = agentic_loop
            .run_streaming(&mut conv, UserContent::text("Hello"), ctx, tx)
            .await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (events, result)
    }

    #[test]
    fn transitions_depend_only_on_stop_calls_and_budget() {
        use LoopState::*;
        assert_eq!(LoopState::after_turn(TurnStop::EndOfResponse, false, 1, 10), Done);
        assert_eq!(LoopState::after_turn(TurnStop::ToolRequested, true, 1, 10), ExecutingTools);
        assert_eq!(LoopState::after_turn(TurnStop::ToolRequested, true, 9, 10), ExecutingTools);
        assert_eq!(LoopState::after_turn(TurnStop::ToolRequested, true, 10, 10), Failed);
        assert_eq!(LoopState::after_turn(TurnStop::ToolRequested, false, 3, 10), Done);
        assert!(Done.is_terminal() && Failed.is_terminal());
        assert!(!AwaitingModel.is_terminal() && !ExecutingTools.is_terminal());
    }

    #[tokio::test]
    async fn test_simple_text_response() {
        let (agentic_loop, provider) = setup_test_loop();
        provider.queue_text("Hello, I'm an AI assistant!");

        let mut conv = Conversation::new(100_000);
        let run = agentic_loop
            .run(&mut conv, UserContent::text("Hello"), RunContext::new("req"))
            .await
            .unwrap();

        assert_eq!(kinds(&run.events), vec!["text_delta", "usage", "done"]);
        assert_eq!(run.outcome.turns, 1);
        assert_eq!(run.outcome.text, "Hello, I'm an AI assistant!");
        assert_eq!(conv.messages().len(), 2); // user + assistant
    }

    #[tokio::test]
    async fn test_tool_call_and_response() {
        let (agentic_loop, provider) = setup_test_loop();
        provider.queue_tool_calls(&[("call_1", "echo", json!({"message": "test"}))]);
        provider.queue_text("Done!");

        let mut conv = Conversation::new(100_000);
        let run = agentic_loop
            .run(&mut conv, UserContent::text("Echo test"), RunContext::new("req"))
            .await
            .unwrap();

        assert_eq!(
            kinds(&run.events),
            vec!["tool_call", "usage", "tool_result", "text_delta", "usage", "done"]
        );
        assert_eq!(
            run.events[2],
            StreamEvent::ToolResult {
                id: "call_1".into(),
                name: "echo".into(),
                content: "test".into(),
                is_error: false,
            }
        );
        // user, assistant (tool call), tool results, assistant (text)
        assert_eq!(conv.messages().len(), 4);
        assert_eq!(provider.call_count(), 2);

        // the second request carries the tool result
        let second = &provider.requests()[1];
        assert!(matches!(
            second.messages.last(),
            Some(ConversationMessage::ToolResults(results)) if results[0].tool_call_id == "call_1"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn sibling_tools_run_concurrently_and_keep_call_order() {
        let (agentic_loop, provider) = setup_test_loop();
        provider.queue_tool_calls(&[
            ("slow", "sleep", json!({"ms": 500, "label": "slow"})),
            ("medium", "sleep", json!({"ms": 200, "label": "medium"})),
            ("fast", "sleep", json!({"ms": 10, "label": "fast"})),
        ]);
        provider.queue_text("All done");

        let mut conv = Conversation::default();
        let started = tokio::time::Instant::now();
        let run = agentic_loop
            .run(&mut conv, UserContent::text("go"), RunContext::new("req"))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(900));

        let forwarded: Vec<&str> = run
            .events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolResult { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(forwarded, vec!["fast", "medium", "slow"]);

        // The next turn sees one aggregated message in call order.
        let next_turn = &provider.requests()[1];
        let Some(ConversationMessage::ToolResults(results)) = next_turn.messages.last() else {
            panic!("expected tool results to close the history");
        };
        let ids: Vec<&str> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
        assert_eq!(ids, vec!["slow", "medium", "fast"]);
        let contents: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["slow", "medium", "fast"]);
    }

    #[tokio::test]
    async fn every_turn_keeps_the_current_question_first() {
        let (agentic_loop, provider) = setup_test_loop();
        provider.queue_tool_calls(&[("e1", "echo", json!({"message": "one"}))]);
        provider.queue_tool_calls(&[("e2", "echo", json!({"message": "two"}))]);
        provider.queue_text("Finished");

        // A budget far below the question itself.
        let mut conv = Conversation::new(100);
        conv.push_text(Role::User, "earlier question");
        conv.push_text(Role::Assistant, "earlier answer");
        let question = UserContent::text("q".repeat(800));
        let (tx, mut rx) = mpsc::channel(64);
        let result = agentic_loop
            .run_streaming(&mut conv, question.clone(), RunContext::new("req"), tx)
            .await;
        assert!(result.is_ok());
        while rx.recv().await.is_some() {}

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        for (turn, request) in requests.iter().enumerate() {
            assert_eq!(
                request.messages.first(),
                Some(&ConversationMessage::User(question.clone())),
                "turn {turn} lost the question"
            );
            assert_eq!(request.messages.len(), 1 + 2 * turn);
        }
        assert!(matches!(
            requests[2].messages.last(),
            Some(ConversationMessage::ToolResults(results)) if results[0].tool_call_id == "e2"
        ));
    }

    #[tokio::test]
    async fn hidden_tool_traffic_is_filtered_and_suggestions_precede_done() {
        let (agentic_loop, provider) = setup_test_loop();
        provider.queue_response(vec![
            ProviderEvent::TextDelta("It is sunny.".into()),
            ProviderEvent::ToolCallStart {
                id: "s1".into(),
                name: "suggest_actions".into(),
                server_side: false,
            },
            ProviderEvent::ToolCallDelta {
                id: "s1".into(),
                partial_json: r#"{"suggestions":["Weather in Paris","Weekly forecast"]}"#.into(),
            },
            ProviderEvent::ToolCallEnd { id: "s1".into() },
            ProviderEvent::MessageEnd {
                stop_reason: StopReason::ToolUse,
            },
        ]);
        provider.queue_text("");

        let mut conv = Conversation::default();
        let run = agentic_loop
            .run(&mut conv, UserContent::text("Weather?"), RunContext::new("req"))
            .await
            .unwrap();

        assert_eq!(kinds(&run.events), vec!["text_delta", "usage", "usage", "suggestions", "done"]);
        assert_eq!(
            run.outcome.suggestions,
            vec!["Weather in Paris".to_string(), "Weekly forecast".to_string()]
        );
        // the model still sees its hidden tool result
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn suggestions_are_per_request() {
        let (agentic_loop, provider) = setup_test_loop();
        provider.queue_tool_calls(&[("s1", "suggest_actions", json!({"suggestions": ["A"]}))]);
        provider.queue_text("first");
        provider.queue_text("second");

        let (_, first) = run_to_end(&agentic_loop, RunContext::new("one")).await;
        let (events, second) = run_to_end(&agentic_loop, RunContext::new("two")).await;
        assert_eq!(first.unwrap().suggestions, vec!["A".to_string()]);
        assert!(second.unwrap().suggestions.is_empty());
        assert!(!kinds(&events).contains(&"suggestions"));
    }

    #[tokio::test]
    async fn ceiling_stops_after_exactly_max_turns() {
        let (agentic_loop, provider) = setup_test_loop();
        for i in 0..12 {
            let id = format!("call_{i}");
            provider.queue_tool_calls(&[(id.as_str(), "echo", json!({"message": "again"}))]);
        }

        let (events, result) = run_to_end(&agentic_loop, RunContext::new("req")).await;

        assert_eq!(provider.call_count(), 10);
        assert!(matches!(result, Err(AgenticLoopError::Ceiling(10))));
        let last = events.last().unwrap();
        assert!(matches!(last, StreamEvent::Error { reason: ErrorReason::Ceiling, .. }));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        // the tenth turn's calls were never executed
        assert_eq!(events.iter().filter(|e| e.kind() == "tool_result").count(), 9);
    }

    #[tokio::test]
    async fn tool_failures_become_error_results() {
        let (agentic_loop, provider) = setup_test_loop();
        provider.queue_tool_calls(&[
            ("a", "does_not_exist", json!({})),
            ("b", "echo", json!({})),
            ("c", "echo", json!({"message": "ok"})),
        ]);
        provider.queue_text("Recovered");

        let (events, result) = run_to_end(&agentic_loop, RunContext::new("req")).await;
        assert_eq!(result.unwrap().text, "Recovered");

        let results: Vec<(String, bool, String)> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolResult {
                    id,
                    is_error,
                    content,
                    ..
                } => Some((id.clone(), *is_error, content.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), 3);
        let unknown = results.iter().find(|r| r.0 == "a").unwrap();
        assert!(unknown.1);
        let parsed: Value = serde_json::from_str(&unknown.2).unwrap();
        assert_eq!(parsed["error"], "Unknown tool: does_not_exist");
        assert!(results.iter().find(|r| r.0 == "b").unwrap().1);
        assert!(!results.iter().find(|r| r.0 == "c").unwrap().1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out_without_blocking_siblings() {
        let (agentic_loop, provider) = setup_test_loop();
        let agentic_loop = agentic_loop.with_tool_timeout(Duration::from_secs(1));
        provider.queue_tool_calls(&[
            ("stuck", "sleep", json!({"ms": 60_000})),
            ("quick", "echo", json!({"message": "hi"})),
        ]);
        provider.queue_text("ok");

        let (events, result) = run_to_end(&agentic_loop, RunContext::new("req")).await;
        assert!(result.is_ok());
        let stuck = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolResult { id, is_error, content, .. } if id == "stuck" => {
                    Some((*is_error, content.clone()))
                }
                _ => None,
            })
            .unwrap();
        assert!(stuck.0);
        assert!(stuck.1.contains("Timeout"));
    }

    #[tokio::test]
    async fn persists_user_then_assistant_once_on_success() {
        let (agentic_loop, provider) = setup_test_loop();
        provider.queue_response(vec![
            ProviderEvent::TextDelta("Let me check. ".into()),
            ProviderEvent::ToolCallStart {
                id: "t".into(),
                name: "echo".into(),
                server_side: false,
            },
            ProviderEvent::ToolCallDelta {
                id: "t".into(),
                partial_json: r#"{"message":"x"}"#.into(),
            },
            ProviderEvent::ToolCallEnd { id: "t".into() },
            ProviderEvent::MessageEnd {
                stop_reason: StopReason::ToolUse,
            },
        ]);
        provider.queue_text("Done.");

        let store = Arc::new(MemoryStore::new());
        let ctx = RunContext::new("req").with_persistence("conv-1", store.clone());
        let (events, result) = run_to_end(&agentic_loop, ctx).await;
        assert!(result.is_ok());
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(
            store.messages(),
            vec![
                ("conv-1".to_string(), Role::User, "Hello".to_string()),
                ("conv-1".to_string(), Role::Assistant, "Let me check. Done.".to_string()),
            ]
        );
    }

    /// Records the exchange only after a delay.
    #[derive(Default)]
    struct SlowStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl MessageStore for SlowStore {
        async fn append_message(&self, conversation_id: &str, role: Role, content: &str) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.inner.append_message(conversation_id, role, content).await
        }

        async fn append_exchange(&self, conversation_id: &str, user: &str, assistant: &str) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.inner.append_exchange(conversation_id, user, assistant).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_persistence_keeps_the_exchange_whole() {
        let (agentic_loop, provider) = setup_test_loop();
        provider.queue_text("Answer");

        let store = Arc::new(SlowStore::default());
        let ctx = RunContext::new("req").with_persistence("conv-1", store.clone());
        let (tx, mut rx) = mpsc::channel(64);
        let mut conv = Conversation::default();

        let client = async move {
            while let Some(event) = rx.recv().await {
                if matches!(event, StreamEvent::Usage { .. }) {
                    break;
                }
            }
        };
        let (result, ()) = tokio::join!(
            agentic_loop.run_streaming(&mut conv, UserContent::text("Hello"), ctx, tx),
            client
        );

        assert!(matches!(result, Err(AgenticLoopError::ClientGone)));
        assert_eq!(
            store.inner.messages(),
            vec![
                ("conv-1".to_string(), Role::User, "Hello".to_string()),
                ("conv-1".to_string(), Role::Assistant, "Answer".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn nothing_is_persisted_on_failure() {
        let (agentic_loop, provider) = setup_test_loop();
        provider.queue_failure(
            vec![ProviderEvent::TextDelta("partial".into())],
            LlmError::NetworkError("connection reset".into()),
        );

        let store = Arc::new(MemoryStore::new());
        let ctx = RunContext::new("req").with_persistence("conv-1", store.clone());
        let (events, result) = run_to_end(&agentic_loop, ctx).await;

        assert!(result.is_err());
        assert_eq!(events[0], StreamEvent::text("partial"));
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error { reason: ErrorReason::Transport, .. })
        ));
        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_a_persistence_error() {
        let (agentic_loop, provider) = setup_test_loop();
        provider.queue_text("Hi");

        let ctx = RunContext::new("req").with_persistence("conv-1", Arc::new(MemoryStore::failing()));
        let (events, result) = run_to_end(&agentic_loop, ctx).await;

        assert!(matches!(result, Err(AgenticLoopError::Persistence(_))));
        assert!(!events.contains(&StreamEvent::Done));
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error { reason: ErrorReason::Persistence, .. })
        ));
    }

    #[tokio::test]
    async fn dropped_receiver_stops_the_loop() {
        let (agentic_loop, provider) = setup_test_loop();
        provider.queue_text("never read");

        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let mut conv = Conversation::default();
        let result = agentic_loop
            .run_streaming(&mut conv, UserContent::text("hi"), RunContext::new("req"), tx)
            .await;
        assert!(matches!(result, Err(AgenticLoopError::ClientGone)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_run_writes_nothing() {
        let (agentic_loop, provider) = setup_test_loop();
        provider.queue_text("never sent");

        let token = CancellationToken::new();
        token.cancel();
        let (events, result) = run_to_end(&agentic_loop, RunContext::new("req").with_cancellation(token)).await;
        assert!(matches!(result, Err(AgenticLoopError::Cancelled)));
        assert!(events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_ends_with_timeout_error() {
        let (agentic_loop, provider) = setup_test_loop();
        let agentic_loop = agentic_loop
            .with_request_timeout(Duration::from_secs(5))
            .with_idle_timeout(Duration::from_secs(60))
            .with_turn_timeout(Duration::from_secs(60));
        provider.queue_stall(vec![ProviderEvent::TextDelta("thinking".into())]);

        let (events, result) = run_to_end(&agentic_loop, RunContext::new("req")).await;
        assert!(matches!(result, Err(AgenticLoopError::RequestTimeout(_))));
        assert_eq!(
            kinds(&events),
            vec!["text_delta", "error"]
        );
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error { reason: ErrorReason::Timeout, .. })
        ));
    }

    #[tokio::test]
    async fn replaying_the_same_script_reaches_the_same_end() {
        let script = |provider: &MockLlmProvider| {
            provider.queue_tool_calls(&[("c1", "echo", json!({"message": "ping"}))]);
            provider.queue_text("pong");
        };

        let (first_loop, first_provider) = setup_test_loop();
        script(first_provider.as_ref());
        let (first_events, first) = run_to_end(&first_loop, RunContext::new("a")).await;

        let (second_loop, second_provider) = setup_test_loop();
        script(second_provider.as_ref());
        let (second_events, second) = run_to_end(&second_loop, RunContext::new("b")).await;

        assert_eq!(first_events, second_events);
        assert_eq!(first.unwrap(), second.unwrap());
    }
}
