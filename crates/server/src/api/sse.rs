//! `GET /api/sse?message=...`: named-event stream for `EventSource` clients.
//!
//! Every frame carries `event: <type>` so browsers can subscribe per type.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::info;

use relay_tool_runtime::{Conversation, RunContext, UserContent};

use super::{api_error, sse_response, ApiError, Framing};
use crate::prompts;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SseParams {
    pub message: Option<String>,
}

pub async fn sse(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SseParams>,
) -> Result<Response, ApiError> {
    let message = params
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing message parameter"))?;

    let agent = state.agent(&state.no_tools).with_max_turns(1);
    let mut conversation = Conversation::new(100_000).with_system_prompt(prompts::concise());

    let request_id = uuid::Uuid::new_v4().to_string();
    info!(request_id = %request_id, "SSE request");

    let (tx, rx) = mpsc::channel(state.config.agent.channel_capacity.max(1));
    tokio::spawn(async move {
        let _ = agent
            .run_streaming(&mut conversation, UserContent::text(message), RunContext::new(request_id), tx)
            .await;
    });

    Ok(sse_response(rx, Framing::Named))
}
