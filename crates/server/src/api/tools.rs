//! `POST /api/tools`: non-streaming tool use.
//!
//! Runs the full loop, then answers with the tool steps taken and the text
//! of the final turn.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use relay_tool_runtime::{Conversation, RunContext, StreamEvent, UserContent};

use super::chat::HistoryMessage;
use super::{api_error, ApiError};
use crate::prompts;
use crate::state::AppState;

const TOOLS_MAX_TOKENS: u32 = 1024;
const NO_RESPONSE: &str = "No response";

#[derive(Debug, Deserialize)]
pub struct ToolsRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    ToolCall {
        name: String,
        input: Value,
        content: String,
    },
    ToolResult {
        name: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
pub struct ToolsResponse {
    pub steps: Vec<Step>,
    pub response: String,
}

pub async fn tools(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ToolsRequest>,
) -> Result<Json<ToolsResponse>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }

    let mut conversation = Conversation::new(100_000).with_system_prompt(prompts::tools());
    for msg in req.history {
        conversation.push_text(msg.role, msg.content);
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    info!(request_id = %request_id, "Tools request");

    let agent = state
        .agent(&state.weather_tools)
        .with_max_tokens(TOOLS_MAX_TOKENS);
    let run = agent
        .run(&mut conversation, UserContent::text(req.message), RunContext::new(request_id))
        .await
        .map_err(|e| {
            warn!(error = %e, "Tools request failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(summarize(&run.events)))
}

/// Tool steps in event order plus the text produced after the last result.
fn summarize(events: &[StreamEvent]) -> ToolsResponse {
    let mut steps = Vec::new();
    let mut response = String::new();

    for event in events {
        match event {
            StreamEvent::TextDelta { content } => response.push_str(content),
            StreamEvent::ToolCall { name, input, .. } => steps.push(Step::ToolCall {
                name: name.clone(),
                input: input.clone(),
                content: format!("Calling {name}..."),
            }),
            StreamEvent::ToolResult { name, content, .. } => {
                steps.push(Step::ToolResult {
                    name: name.clone(),
                    content: content.clone(),
                });
                // Only the final turn's text is the answer.
                response.clear();
            }
            _ => {}
        }
    }

    if response.trim().is_empty() {
        response = NO_RESPONSE.to_string();
    }
    ToolsResponse { steps, response }
}
