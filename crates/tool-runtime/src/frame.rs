//! Wire framing for one Server-Sent Event.
//!
//! ```text
//! event: <name>\n        (optional)
//! data: <json>\n
//! \n
//! ```
//!
//! `serde_json` never emits raw newlines, so a frame always has exactly one
//! `data:` line and text containing `\n` cannot break framing.

use bytes::Bytes;
use tracing::warn;

use crate::stream::StreamEvent;

/// A decoded frame: the optional `event:` name plus the event itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub name: Option<String>,
    pub event: StreamEvent,
}

/// The raw SSE fields of one frame, before any JSON parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    pub event: Option<String>,
    /// `data:` lines joined with `\n`; `None` when the frame had none.
    pub data: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed event payload: {source} (data: {data})")]
    Malformed {
        data: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Encode an event as one frame, optionally with an `event:` line.
pub fn encode(event: &StreamEvent, name: Option<&str>) -> Result<Bytes, FrameError> {
    let json = serde_json::to_string(event)?;
    let mut out = String::with_capacity(json.len() + 32);
    if let Some(name) = name {
        out.push_str("event: ");
        out.push_str(name);
        out.push('\n');
    }
    out.push_str("data: ");
    out.push_str(&json);
    out.push_str("\n\n");
    Ok(Bytes::from(out))
}

/// Encode an event with its own `type` as the `event:` name.
pub fn encode_named(event: &StreamEvent) -> Result<Bytes, FrameError> {
    encode(event, Some(event.kind()))
}

/// Split a frame (text between two blank-line delimiters) into its fields.
///
/// Comment lines (`:`) and `id:`/`retry:` fields are ignored. A single space
/// after the colon is stripped, per the SSE field grammar.
pub fn parse_fields(frame: &str) -> RawFrame {
    let mut raw = RawFrame::default();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in frame.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => raw.event = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if !data_lines.is_empty() {
        raw.data = Some(data_lines.join("\n"));
    }
    raw
}

/// Decode one complete frame.
///
/// Returns `Ok(None)` for frames without data (keep-alives, comments) and
/// `Err` when the payload is not a valid event.
pub fn decode_frame(frame: &str) -> Result<Option<Frame>, FrameError> {
    let raw = parse_fields(frame);
    let Some(data) = raw.data else {
        return Ok(None);
    };
    let event = serde_json::from_str::<StreamEvent>(&data)
        .map_err(|source| FrameError::Malformed { data, source })?;
    Ok(Some(Frame {
        name: raw.event,
        event,
    }))
}

/// Lenient decode for consumers: malformed frames are logged and skipped.
pub fn decode_event(frame: &str) -> Option<StreamEvent> {
    match decode_frame(frame) {
        Ok(decoded) => decoded.map(|f| f.event),
        Err(e) => {
            warn!(error = %e, "skipping malformed frame");
            None
        }
    }
}
