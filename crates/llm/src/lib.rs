pub mod providers;

pub use providers::claude_tool_provider::ClaudeToolProvider;
pub use providers::{create_provider, ProviderError};
