//! SSE Framing
//!
//! Server-side event frames (`id:`/`data:`/`retry:` lines) and the
//! incremental client-side decoder that reassembles events from arbitrary
//! byte chunks of a `text/event-stream` body.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use axum::response::sse::Event;
use bytes::Bytes;

/// One event as emitted by the server side of a stream
#[derive(Debug, Clone)]
pub struct SseFrame {
    /// Event id for resumability; absent on priming frames
    pub id: Option<String>,
    /// JSON-RPC message payload
    pub data: Bytes,
    /// Optional `retry:` hint in milliseconds
    pub retry: Option<Duration>,
}

impl SseFrame {
    /// Frame carrying a stored event
    pub fn event(id: String, data: Bytes) -> Self {
        Self {
            id: Some(id),
            data,
            retry: None,
        }
    }

    /// Priming frame carrying only a `retry:` hint
    pub fn retry_hint(retry: Duration) -> Self {
        Self {
            id: None,
            data: Bytes::new(),
            retry: Some(retry),
        }
    }

    /// Convert into an axum SSE event
    pub fn into_event(self) -> Event {
        let mut event = Event::default();
        if let Some(id) = self.id {
            event = event.id(id);
        }
        if let Some(retry) = self.retry {
            event = event.retry(retry);
        }
        if !self.data.is_empty() {
            event = event.data(String::from_utf8_lossy(&self.data).into_owned());
        }
        event
    }
}

/// One event as decoded by the client side of a stream
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// `id:` field, if the server emitted one
    pub id: Option<String>,
    /// `event:` field, if any
    pub event: Option<String>,
    /// Joined `data:` lines
    pub data: String,
}

/// Incremental decoder for `text/event-stream` bodies
///
/// Feed it chunks as they arrive; it yields every event completed by the
/// chunk. Comment lines and `retry:` fields are consumed and dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    current_id: Option<String>,
    current_event: Option<String>,
    current_data: Vec<String>,
}

impl SseDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return the events it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let mut line = self.buffer[..newline].to_string();
            self.buffer.drain(..=newline);
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                if let Some(event) = self.flush() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            match field {
                "id" => self.current_id = Some(value.to_string()),
                "event" => self.current_event = Some(value.to_string()),
                "data" => self.current_data.push(value.to_string()),
                // retry and unknown fields are ignored
                _ => {}
            }
        }

        events
    }

    fn flush(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() && self.current_id.is_none() && self.current_event.is_none()
        {
            return None;
        }
        let event = SseEvent {
            id: self.current_id.take(),
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
        };
        self.current_data.clear();
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_complete_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"id: ev-0001\ndata: {\"jsonrpc\":\"2.0\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("ev-0001"));
        assert_eq!(events[0].data, "{\"jsonrpc\":\"2.0\"}");
    }

    #[test]
    fn reassembles_across_chunk_boundaries() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"id: ev-").is_empty());
        assert!(decoder.feed(b"0002\nda").is_empty());
        let events = decoder.feed(b"ta: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("ev-0002"));
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn joins_multiple_data_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: a\ndata: b\n\n");
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn skips_comments_and_retry() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\nretry: 3000\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn handles_crlf_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }
}
