pub mod claude_tool_provider;

use std::sync::Arc;

use relay_core::config::{AgentConfig, LlmConfig};
use relay_tool_runtime::ToolAwareLlmProvider;

use self::claude_tool_provider::ClaudeToolProvider;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

/// Create the appropriate LLM provider based on config.
pub fn create_provider(
    llm_config: &LlmConfig,
    agent_config: &AgentConfig,
) -> Result<Arc<dyn ToolAwareLlmProvider>, ProviderError> {
    match llm_config.provider.as_str() {
        "anthropic" | "claude" => {
            let api_key = llm_config
                .anthropic_api_key
                .as_ref()
                .ok_or_else(|| ProviderError::NotConfigured("ANTHROPIC_API_KEY not set".into()))?;
            Ok(Arc::new(
                ClaudeToolProvider::new(
                    api_key.clone(),
                    llm_config.anthropic_model.clone(),
                    llm_config.anthropic_base_url.clone(),
                )
                .with_max_frame_buffer(agent_config.max_frame_buffer_bytes),
            ))
        }
        other => Err(ProviderError::NotConfigured(format!(
            "unknown LLM provider: '{}'",
            other
        ))),
    }
}
