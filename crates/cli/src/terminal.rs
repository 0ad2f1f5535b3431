use std::io::{self, Write};

use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};

use relay_tool_runtime::stream::{StreamEvent, Usage};

use crate::reassembler::{truncate_for_display, ConversationBuffer};
use crate::server_client::StoredMessage;

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const USER_PROMPT: Color = Color::Green;
    const ASSISTANT_TEXT: Color = Color::Cyan;
    const TOOL_CALL: Color = Color::Yellow;
    const TOOL_RESULT: Color = Color::DarkGreen;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Terminal I/O for the interactive REPL.
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    pub fn print_banner(&self, server: &str, provider: &str, version: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("relay"),
            ResetColor,
            Print(" - streaming chat client\n"),
            SetForegroundColor(Colors::DIM),
            Print(format!("Server: {server} | Provider: {provider} | v{version}\n")),
            Print("Type 'exit' or 'quit' to end. Ctrl+C cancels the current response.\n"),
            Print("---\n"),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Read a line of user input. Returns `None` when the user wants to exit
    /// or stdin is closed.
    pub fn read_input(&self) -> Result<Option<String>> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            Print("\n"),
            SetForegroundColor(Colors::USER_PROMPT),
            Print("you> "),
            ResetColor,
        )?;
        stdout.flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(None);
        }
        Ok(parse_input(&input))
    }

    /// Render one event as it arrives. Text is printed incrementally; the
    /// remaining events are shown as one-line annotations.
    pub fn display_event(&self, event: &StreamEvent) -> Result<()> {
        let mut stdout = io::stdout();
        match event {
            StreamEvent::TextDelta { content } => {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::ASSISTANT_TEXT),
                    Print(content),
                    ResetColor,
                )?;
            }
            StreamEvent::ToolCall { name, input, .. } => {
                execute!(
                    stdout,
                    Print("\n"),
                    SetForegroundColor(Colors::TOOL_CALL),
                    Print(format!("[tool: {name}] {input}\n")),
                    ResetColor,
                )?;
            }
            StreamEvent::ToolResult {
                name,
                content,
                is_error,
                ..
            } => {
                let (color, label) = if *is_error {
                    (Colors::ERROR, "error")
                } else {
                    (Colors::TOOL_RESULT, "result")
                };
                execute!(
                    stdout,
                    SetForegroundColor(color),
                    Print(format!("  [{name} {label}]: {}\n", truncate_for_display(content))),
                    ResetColor,
                )?;
            }
            StreamEvent::Error { message, reason } => {
                execute!(
                    stdout,
                    Print("\n"),
                    SetForegroundColor(Colors::ERROR),
                    Print(format!("[error ({reason:?}): {message}]\n")),
                    ResetColor,
                )?;
            }
            StreamEvent::Done => execute!(stdout, Print("\n"))?,
            // Collected in the buffer and shown once the turn ends.
            StreamEvent::Citation(_)
            | StreamEvent::Citations { .. }
            | StreamEvent::Suggestions { .. }
            | StreamEvent::Usage { .. }
            | StreamEvent::ConversationId { .. } => {}
        }
        stdout.flush()?;
        Ok(())
    }

    /// Sources, follow-up suggestions and token totals for a finished turn.
    pub fn display_summary(&self, buffer: &ConversationBuffer) -> Result<()> {
        let mut stdout = io::stdout();
        if !buffer.citations().is_empty() {
            execute!(stdout, SetForegroundColor(Colors::HEADER), Print("Sources:\n"), ResetColor)?;
            for (i, citation) in buffer.citations().iter().enumerate() {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::DIM),
                    Print(format!("  [{}] {} <{}>\n", i + 1, citation.title, citation.url)),
                    ResetColor,
                )?;
            }
        }
        if !buffer.suggestions().is_empty() {
            execute!(stdout, SetForegroundColor(Colors::HEADER), Print("Try next:\n"), ResetColor)?;
            for suggestion in buffer.suggestions() {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::DIM),
                    Print(format!("  - {suggestion}\n")),
                    ResetColor,
                )?;
            }
        }
        let usage = buffer.usage();
        if usage != Usage::default() {
            execute!(
                stdout,
                SetForegroundColor(Colors::DIM),
                Print(format!(
                    "tokens: {} in / {} out\n",
                    usage.input_tokens, usage.output_tokens
                )),
                ResetColor,
            )?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_history(&self, messages: &[StoredMessage]) -> Result<()> {
        let mut stdout = io::stdout();
        if messages.is_empty() {
            return self.print_info("No messages yet.");
        }
        for message in messages {
            let color = if message.role == "user" {
                Colors::USER_PROMPT
            } else {
                Colors::ASSISTANT_TEXT
            };
            execute!(
                stdout,
                SetForegroundColor(Colors::DIM),
                Print(format!("[{}] ", message.created_at)),
                SetForegroundColor(color),
                Print(format!("{}: ", message.role)),
                ResetColor,
                Print(format!("{}\n", message.content)),
            )?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_error(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::ERROR),
            Print(format!("Error: {}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    pub fn print_info(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }
}

fn parse_input(line: &str) -> Option<String> {
    let trimmed = line.trim();
    match trimmed {
        "exit" | "quit" | "/exit" | "/quit" => None,
        _ => Some(trimmed.to_string()),
    }
}
