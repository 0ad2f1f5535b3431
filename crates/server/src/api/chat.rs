//! `POST /api/chat`: the streaming agentic chat endpoint.
//!
//! Events, in order: `conversation_id`, then the loop's own events
//! (text, visible tool traffic, citations, usage, suggestions), then
//! exactly one `done` or `error`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::info;

use relay_tool_runtime::conversation::ContentPart;
use relay_tool_runtime::provider::ServerTool;
use relay_tool_runtime::{Attachment, Conversation, Role, RunContext, StreamEvent, UserContent};

use super::{api_error, sse_response, ApiError, Framing};
use crate::prompts;
use crate::state::AppState;

const CONTEXT_TOKENS: usize = 100_000;
const WEB_SEARCH_MAX_USES: u32 = 5;

/// One prior message supplied by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Used only when the conversation has no stored messages.
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Lowers the configured turn ceiling for this request.
    #[serde(default)]
    pub max_turns: Option<usize>,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if req.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }

    let mut user = UserContent::default();
    for attachment in req.attachments {
        let part = attachment
            .into_part()
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
        user = user.with_part(part);
    }
    user = user.with_part(ContentPart::Text {
        text: req.message.clone(),
    });

    let conversation_id = match req.conversation_id {
        Some(id) => {
            if !state.store.exists(&id).await {
                return Err(api_error(
                    StatusCode::NOT_FOUND,
                    format!("conversation not found: {id}"),
                ));
            }
            id
        }
        None => state
            .store
            .create_conversation(&req.message)
            .await
            .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?,
    };

    let system_prompt = req.system_prompt.unwrap_or_else(prompts::chat);
    let mut conversation = Conversation::new(CONTEXT_TOKENS).with_system_prompt(system_prompt);
    let stored = state
        .store
        .messages(&conversation_id)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if stored.is_empty() {
        for msg in req.history {
            conversation.push_text(msg.role, msg.content);
        }
    } else {
        for msg in stored {
            conversation.push_text(msg.role, msg.content);
        }
    }

    let mut agent = state
        .agent(&state.chat_tools)
        .with_server_tools(vec![ServerTool::WebSearch {
            max_uses: WEB_SEARCH_MAX_USES,
        }]);
    if let Some(max) = req.max_turns {
        agent = agent.with_max_turns(max.min(state.config.agent.max_turns).max(1));
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    info!(request_id = %request_id, conversation_id = %conversation_id, history = conversation.len(), "Chat request");

    let (tx, rx) = mpsc::channel(state.config.agent.channel_capacity.max(1));
    tx.send(StreamEvent::ConversationId {
        id: conversation_id.clone(),
    })
    .await
    .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "event channel closed"))?;

    let ctx = RunContext::new(request_id).with_persistence(conversation_id, state.store.clone());
    tokio::spawn(async move {
        // Outcome and errors are logged by the loop itself.
        let _ = agent.run_streaming(&mut conversation, user, ctx, tx).await;
    });

    Ok(sse_response(rx, Framing::Plain))
}
