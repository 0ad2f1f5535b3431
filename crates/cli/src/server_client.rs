//! HTTP client for the relay server.
//!
//! Streaming responses go through the same incremental SSE parser and
//! frame codec the server uses, so both ends agree on framing.

use std::pin::Pin;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use relay_tool_runtime::frame;
use relay_tool_runtime::sse::SseError;
use relay_tool_runtime::stream::StreamEvent;
use relay_tool_runtime::SseParser;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

pub struct ServerClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthInfo {
    pub status: String,
    pub version: String,
    pub provider: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_turns: Option<usize>,
}

/// Options for one `/api/chat` request.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions<'a> {
    pub conversation_id: Option<&'a str>,
    pub system_prompt: Option<&'a str>,
    pub max_turns: Option<usize>,
}

impl ServerClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health_check(&self) -> Result<HealthInfo> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .with_context(|| format!("server not reachable at {}", self.base_url))?;
        let resp = ensure_success(resp).await?;
        resp.json().await.context("failed to parse health response")
    }

    /// Messages stored for a conversation, oldest first.
    pub async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let url = format!(
            "{}/api/conversations/{}/messages",
            self.base_url, conversation_id
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("failed to fetch conversation messages")?;
        let resp = ensure_success(resp).await?;
        resp.json().await.context("failed to parse conversation messages")
    }

    /// Start a chat turn and stream its events.
    ///
    /// Dropping the returned stream closes the connection, which cancels the
    /// run on the server.
    pub async fn chat(&self, message: &str, options: ChatOptions<'_>) -> Result<EventStream> {
        let url = format!("{}/api/chat", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&ChatBody {
                message,
                conversation_id: options.conversation_id,
                system_prompt: options.system_prompt,
                max_turns: options.max_turns,
            })
            .send()
            .await
            .context("failed to start chat stream")?;
        let resp = ensure_success(resp).await?;

        Ok(decode_stream(SseParser::new().frames(resp.bytes_stream())))
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    bail!("server returned {}: {}", status, body);
}

/// Decode complete frames into events. Frames that are not events (comments,
/// unknown types) are skipped.
fn decode_stream<S>(frames: S) -> EventStream
where
    S: Stream<Item = Result<String, SseError>> + Send + 'static,
{
    Box::pin(frames.filter_map(|frame| async move {
        match frame {
            Ok(frame) => frame::decode_event(&frame).map(Ok),
            Err(e) => Some(Err(anyhow::Error::new(e).context("reading event stream"))),
        }
    }))
}
