use std::sync::Arc;

use relay_core::Config;
use relay_tool_runtime::registry::RegistryError;
use relay_tool_runtime::{AgenticLoop, GetWeatherTool, SuggestActionsTool, ToolAwareLlmProvider, ToolRegistry};

use crate::store::ConversationStore;

/// Shared, read-only state for every handler.
pub struct AppState {
    pub config: Config,
    pub provider: Arc<dyn ToolAwareLlmProvider>,
    pub store: Arc<ConversationStore>,
    /// `get_weather` plus the hidden `suggest_actions`.
    pub chat_tools: Arc<ToolRegistry>,
    /// `get_weather` only.
    pub weather_tools: Arc<ToolRegistry>,
    pub no_tools: Arc<ToolRegistry>,
}

impl AppState {
    pub fn new(
        config: Config,
        provider: Arc<dyn ToolAwareLlmProvider>,
        store: Arc<ConversationStore>,
    ) -> Result<Self, RegistryError> {
        Self::with_weather_tool(config, provider, store, GetWeatherTool::new)
    }

    /// Like [`AppState::new`] with a custom weather tool factory.
    pub fn with_weather_tool(
        config: Config,
        provider: Arc<dyn ToolAwareLlmProvider>,
        store: Arc<ConversationStore>,
        weather: impl Fn() -> GetWeatherTool,
    ) -> Result<Self, RegistryError> {
        let mut chat_tools = ToolRegistry::new();
        chat_tools.register(weather())?;
        chat_tools.register_hidden(SuggestActionsTool)?;

        let mut weather_tools = ToolRegistry::new();
        weather_tools.register(weather())?;

        Ok(Self {
            config,
            provider,
            store,
            chat_tools: Arc::new(chat_tools),
            weather_tools: Arc::new(weather_tools),
            no_tools: Arc::new(ToolRegistry::new()),
        })
    }

    /// An agentic loop over `tools`, configured from the agent and LLM sections.
    pub fn agent(&self, tools: &Arc<ToolRegistry>) -> AgenticLoop {
        AgenticLoop::new(self.provider.clone(), tools.clone())
            .with_agent_config(&self.config.agent)
            .with_temperature(self.config.llm.temperature)
            .with_max_tokens(self.config.llm.max_tokens)
    }
}
