//! HTTP endpoint handlers.
//!
//! Each sub-module owns one endpoint. Shared response plumbing lives here.

mod chat;
mod conversations;
mod generate;
mod health;
mod sse;
mod tools;

#[cfg(test)]
mod tests;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use relay_tool_runtime::frame;
use relay_tool_runtime::StreamEvent;

pub use chat::chat;
pub use conversations::conversation_messages;
pub use generate::generate;
pub use health::health;
pub use sse::sse;
pub use tools::tools;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ── SSE body ─────────────────────────────────────────────────────

/// How events are framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// `data: <json>` only.
    Plain,
    /// `event: <type>` line before the data.
    Named,
}

/// Stream events from `rx` as an SSE response.
///
/// Dropping the body (client disconnect) drops the receiver, which the
/// agentic loop observes and stops on.
pub(crate) fn sse_response(rx: mpsc::Receiver<StreamEvent>, framing: Framing) -> Response {
    let frames = ReceiverStream::new(rx).map(move |event| match framing {
        Framing::Plain => frame::encode(&event, None),
        Framing::Named => frame::encode_named(&event),
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}
