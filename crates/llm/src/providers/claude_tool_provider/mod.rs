//! Claude (Anthropic API) implementation of [`ToolAwareLlmProvider`].
//!
//! Supports streaming tool use via SSE, translating between the Anthropic Messages
//! API format and the provider-agnostic [`ProviderEvent`] / [`ConversationMessage`] types.
//!
//! [`ToolAwareLlmProvider`]: relay_tool_runtime::ToolAwareLlmProvider
//! [`ProviderEvent`]: relay_tool_runtime::ProviderEvent
//! [`ConversationMessage`]: relay_tool_runtime::ConversationMessage

mod sse;
mod streaming;
mod translate;

pub use self::streaming::ClaudeToolProvider;
