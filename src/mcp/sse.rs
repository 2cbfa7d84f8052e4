//! Server-sent-event plumbing for the streamable-HTTP transport.
//!
//! MCP servers may answer a POST either with a plain JSON body or with a
//! `text/event-stream` body carrying one or more JSON-RPC messages. The
//! helpers here split the byte stream into SSE lines and surface the first
//! response or error message.

use futures_util::StreamExt;
use rust_mcp_schema::schema_utils::ServerMessage;

use crate::mcp::error::TransportError;

/// Accumulates raw chunks and yields complete, trimmed SSE lines.
#[derive(Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        self.take_lines(false)
    }

    /// Drains whatever remains once the stream is exhausted.
    pub fn flush(&mut self) -> Vec<String> {
        self.take_lines(true)
    }

    fn take_lines(&mut self, include_tail: bool) -> Vec<String> {
        let data = std::mem::take(&mut self.pending);
        let mut segments: Vec<&[u8]> = data.split(|byte| *byte == b'\n').collect();

        // The segment after the last newline is an incomplete line; keep it
        // buffered unless the stream is over.
        if !include_tail {
            if let Some(tail) = segments.pop() {
                self.pending = tail.to_vec();
            }
        }

        segments
            .into_iter()
            .filter_map(|segment| std::str::from_utf8(segment).ok())
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Consumes an event-stream response until the server sends a JSON-RPC
/// response or error. Notifications and server-initiated requests are
/// skipped; this client does not support them.
pub async fn next_sse_server_message(
    response: reqwest::Response,
) -> Result<ServerMessage, TransportError> {
    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| TransportError::Stream(err.to_string()))?;
        for line in buffer.feed(&chunk) {
            if let Some(message) = decode_sse_line(&line)? {
                if is_terminal(&message) {
                    return Ok(message);
                }
            }
        }
    }

    for line in buffer.flush() {
        if let Some(message) = decode_sse_line(&line)? {
            if is_terminal(&message) {
                return Ok(message);
            }
        }
    }

    Err(TransportError::Stream(
        "no response message in event stream".to_string(),
    ))
}

fn is_terminal(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::Response(_) | ServerMessage::Error(_)
    )
}

fn decode_sse_line(line: &str) -> Result<Option<ServerMessage>, TransportError> {
    let Some(payload) = sse_data_payload(line) else {
        return Ok(None);
    };
    if payload.is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<ServerMessage>(payload)
        .map(Some)
        .map_err(|err| TransportError::Decode(err.to_string()))
}
