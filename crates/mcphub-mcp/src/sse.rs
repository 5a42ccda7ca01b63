//! Server-Sent Events parser.
//!
//! Event lines can span several network chunks, so bytes are buffered
//! until a complete line is available.

use std::fmt;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// The event type (from "event:" lines)
    pub event: Option<String>,
    /// The event data, multiple "data:" lines joined with `\n`
    pub data: String,
    /// The event ID (from "id:" lines)
    pub id: Option<String>,
}

impl SseEvent {
    /// Whether this event carries protocol messages.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }

    /// Whether this event announces the URL for outbound messages.
    pub fn is_endpoint(&self) -> bool {
        self.event.as_deref() == Some("endpoint")
    }
}

/// Incremental SSE parser.
#[derive(Default)]
pub struct SseParser {
    /// Bytes of an incomplete line
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    /// Create a new SSE parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return the events it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            // Decode whole lines only, a multi-byte character may straddle chunks
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&*line);

            if line.is_empty() {
                events.extend(self.dispatch());
            } else {
                self.apply_line(line);
            }
        }

        events
    }

    /// Feed a string into the parser.
    pub fn feed_str(&mut self, text: &str) -> Vec<SseEvent> {
        self.feed(text.as_bytes())
    }

    fn apply_line(&mut self, line: &str) {
        // Comment line
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();

        if self.data.is_empty() {
            return None;
        }

        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
            id,
        })
    }
}

impl fmt::Debug for SseParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseParser")
            .field("pending_bytes", &self.pending.len())
            .field("data_lines", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
        assert!(events[0].is_message());
    }

    #[test]
    fn test_endpoint_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: endpoint\ndata: /messages?session=abc\n\n");

        assert_eq!(events.len(), 1);
        assert!(events[0].is_endpoint());
        assert!(!events[0].is_message());
        assert_eq!(events[0].data, "/messages?session=abc");
    }

    #[test]
    fn test_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: line one\ndata: line two\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn test_split_across_chunks() {
        let mut parser = SseParser::new();

        assert!(parser.feed(b"data: {\"id\":").is_empty());
        assert!(parser.feed(b" 1}\n").is_empty());

        let events = parser.feed(b"\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, r#"{"id": 1}"#);
    }

    #[test]
    fn test_multibyte_split() {
        let mut parser = SseParser::new();
        let text = "data: héllo\n\n".as_bytes();
        // Split inside the two-byte 'é'
        assert!(parser.feed(&text[..8]).is_empty());
        let events = parser.feed(&text[8..]);
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn test_multiple_events() {
        let mut parser = SseParser::new();
        let events = parser.feed_str("data: first\n\nevent: message\ndata: second\n\n");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "first");
        assert_eq!(events[1].data, "second");
        assert!(events[1].is_message());
    }

    #[test]
    fn test_comment_and_unknown_fields_ignored() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keepalive\nretry: 100\ndata: hello\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"id: 7\r\ndata: hello\r\n\r\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
        assert_eq!(events[0].id, Some("7".to_string()));
    }

    #[test]
    fn test_event_without_data_is_dropped() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: ping\n\n\n").is_empty());

        // The dropped event type does not leak into the next event
        let events = parser.feed(b"data: x\n\n");
        assert_eq!(events[0].event, None);
    }
}
