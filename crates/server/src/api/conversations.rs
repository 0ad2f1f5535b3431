use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use relay_core::RelayError;

use super::{api_error, ApiError};
use crate::state::AppState;
use crate::store::StoredMessage;

/// `GET /api/conversations/{id}/messages`: persisted messages, oldest first.
pub async fn conversation_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    match state.store.messages(&id).await {
        Ok(messages) => Ok(Json(messages)),
        Err(e @ RelayError::ConversationNotFound(_)) => Err(api_error(StatusCode::NOT_FOUND, e.to_string())),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
