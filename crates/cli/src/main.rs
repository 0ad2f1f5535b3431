mod cli;
mod reassembler;
mod server_client;
mod terminal;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::StreamExt;
use tracing::{debug, info, warn};

use relay_tool_runtime::stream::{ErrorReason, StreamEvent};

use crate::cli::CliArgs;
use crate::reassembler::{BufferStatus, ConversationBuffer};
use crate::server_client::{ChatOptions, ServerClient};
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let terminal = Terminal::new();
    let client = ServerClient::new(&args.server);

    if args.history {
        let id = args.conversation.as_deref().context("--history needs --conversation")?;
        let messages = client.conversation_messages(id).await?;
        terminal.print_history(&messages)?;
        return Ok(());
    }

    if let Some(message) = args.message.as_deref() {
        let buffer = stream_turn(&client, &terminal, &args, args.conversation.as_deref(), message).await?;
        terminal.display_summary(&buffer)?;
        if let Some(id) = buffer.conversation_id() {
            terminal.print_info(&format!("conversation: {id}"))?;
        }
        if buffer.status() != BufferStatus::Done {
            bail!("response did not complete");
        }
        return Ok(());
    }

    let health = client.health_check().await?;
    info!(status = %health.status, "Connected to server");
    terminal.print_banner(client.base_url(), &health.provider, &health.version)?;

    let mut conversation = args.conversation.clone();
    if let Some(id) = conversation.as_deref() {
        terminal.print_info(&format!("Continuing conversation {id}"))?;
    }

    loop {
        let input = match terminal.read_input()? {
            Some(text) => text,
            None => {
                terminal.print_info("Goodbye.")?;
                break;
            }
        };
        if input.is_empty() {
            continue;
        }

        match stream_turn(&client, &terminal, &args, conversation.as_deref(), &input).await {
            Ok(buffer) => {
                terminal.display_summary(&buffer)?;
                if let Some(id) = buffer.conversation_id() {
                    conversation = Some(id.to_string());
                }
            }
            Err(e) => {
                warn!(error = %e, "Chat request failed");
                terminal.print_error(&format!("{:#}", e))?;
            }
        }
    }

    Ok(())
}

/// Stream one chat turn, rendering events as they arrive.
///
/// Ctrl+C drops the stream, which closes the connection and stops the run on
/// the server. A stream that ends without `done` or `error` is closed with a
/// transport error so the buffer always ends in a terminal state.
async fn stream_turn(
    client: &ServerClient,
    terminal: &Terminal,
    args: &CliArgs,
    conversation_id: Option<&str>,
    message: &str,
) -> Result<ConversationBuffer> {
    let options = ChatOptions {
        conversation_id,
        system_prompt: args.system_prompt.as_deref(),
        max_turns: args.max_turns,
    };
    let mut events = client.chat(message, options).await?;
    let mut buffer = ConversationBuffer::new();

    let cancel = tokio::signal::ctrl_c();
    tokio::pin!(cancel);

    loop {
        let event = tokio::select! {
            _ = &mut cancel => {
                terminal.print_info("\n[cancelled]")?;
                return Ok(buffer.apply(&StreamEvent::error(ErrorReason::Cancelled, "cancelled by user")));
            }
            next = events.next() => match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => StreamEvent::error(ErrorReason::Transport, format!("{e:#}")),
                None => StreamEvent::error(
                    ErrorReason::Transport,
                    "connection closed before the response finished",
                ),
            },
        };

        terminal.display_event(&event)?;
        buffer = buffer.apply(&event);
        if event.is_terminal() {
            break;
        }
    }

    if let Some(reply) = buffer.take_final() {
        debug!(chars = reply.chars().count(), steps = buffer.steps().len(), "Turn complete");
    }
    Ok(buffer)
}
