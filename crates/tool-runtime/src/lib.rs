pub mod conversation;
pub mod frame;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod sink;
pub mod sse;
pub mod store;
pub mod stream;
pub mod tool;
pub mod tools;
pub mod turn;

pub use conversation::{Attachment, Conversation, ConversationMessage, Role, UserContent};
pub use provider::{LlmError, ProviderEvent, StopReason, ToolAwareLlmProvider, TurnRequest};
pub use registry::ToolRegistry;
pub use runtime::{AgenticLoop, AgenticLoopError, LoopOutcome, LoopState, RunContext};
pub use sse::SseParser;
pub use store::{MessageStore, StoreError};
pub use stream::{Citation, ErrorReason, StreamEvent, Usage};
pub use tool::{SuggestionAccumulator, Tool, ToolCall, ToolContext, ToolDefinition, ToolResult};
pub use tools::{GetWeatherTool, SuggestActionsTool};
pub use turn::{TurnDriver, TurnError, TurnResult, TurnStop};
