//! `POST /api/generate`: streams a short story for a prompt.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::info;

use relay_tool_runtime::{Conversation, RunContext, UserContent};

use super::{api_error, sse_response, ApiError, Framing};
use crate::prompts;
use crate::state::AppState;

const STORY_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    if req.prompt.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "prompt must not be empty"));
    }

    let agent = state
        .agent(&state.no_tools)
        .with_max_turns(1)
        .with_max_tokens(STORY_MAX_TOKENS);
    let mut conversation = Conversation::new(STORY_MAX_TOKENS as usize * 8).with_system_prompt(prompts::STORYTELLER);

    let request_id = uuid::Uuid::new_v4().to_string();
    info!(request_id = %request_id, prompt_chars = req.prompt.len(), "Story generation request");

    let (tx, rx) = mpsc::channel(state.config.agent.channel_capacity.max(1));
    tokio::spawn(async move {
        let _ = agent
            .run_streaming(&mut conversation, UserContent::text(req.prompt), RunContext::new(request_id), tx)
            .await;
    });

    Ok(sse_response(rx, Framing::Plain))
}
