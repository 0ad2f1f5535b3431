mod api;
mod prompts;
mod router;
mod state;
mod store;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::state::AppState;
use crate::store::ConversationStore;

fn load_config() -> relay_core::Config {
    relay_core::config::load_dotenv();
    relay_core::Config::from_env()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let config = load_config();
    config.log_summary();

    let provider = relay_llm::create_provider(&config.llm, &config.agent)
        .context("LLM provider is required to serve requests")?;
    info!("LLM provider ready: {}", provider.provider_name());

    let store = Arc::new(ConversationStore::open(&config.storage.data_dir).await?);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, provider, store).context("registering tools")?);
    let app = router::build_router(state)?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
