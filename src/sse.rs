//! Server-sent events: an incremental parser for upstream streams and
//! helpers for the OpenAI-style events sent back to callers.

use axum::response::sse::Event;
use serde::Serialize;
use serde_json::json;

/// Terminal marker of an OpenAI chat completion stream.
pub const DONE: &str = "[DONE]";

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Line-oriented SSE parser. Feed it raw chunks as they arrive; it buffers
/// partial lines (including split UTF-8 sequences) until they complete.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: ByteBuffer,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk);
        let mut events = Vec::new();

        while let Some(line) = self.buffer.take_line() {
            self.process_line(&line, &mut events);
        }

        events
    }

    /// Flush whatever is left once the upstream stream ends.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if let Some(line) = self.buffer.take_rest() {
            self.process_line(&line, &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => {
                self.event = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "data" => self.data_lines.push(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        events.push(SseEvent {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        });
        self.data_lines.clear();
    }
}

/// `data: <json>` event. Falls back to an error event if encoding fails.
pub fn json_event<T: Serialize>(value: &T) -> Event {
    Event::default()
        .json_data(value)
        .unwrap_or_else(|e| error_event(&format!("failed to encode stream chunk: {}", e)))
}

/// Mid-stream error in the OpenAI error shape. The status line is already
/// sent at this point, so this is the only way to report it.
pub fn error_event(message: &str) -> Event {
    Event::default().data(
        json!({"error": {"message": message, "type": "upstream_error"}}).to_string(),
    )
}

pub fn done_event() -> Event {
    Event::default().data(DONE)
}

/// Byte buffer that yields complete `\n`-terminated lines.
#[derive(Debug, Default)]
struct ByteBuffer {
    bytes: Vec<u8>,
}

impl ByteBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.bytes.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=pos).take(pos).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn take_rest(&mut self) -> Option<String> {
        if self.bytes.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.bytes);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_named_events() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: response.created\ndata: {\"a\":1}\n\n");

        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("response.created".to_string()),
                data: "{\"a\":1}".to_string(),
            }]
        );
    }

    #[test]
    fn buffers_events_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: hel").is_empty());
        assert!(parser.push(b"lo\n").is_empty());
        let events = parser.push(b"\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn keeps_multibyte_characters_split_across_chunks() {
        let text = "data: héllo\n\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xc3).unwrap() + 1;

        let mut parser = SseParser::new();
        assert!(parser.push(&text[..split]).is_empty());
        let events = parser.push(&text[split..]);

        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn handles_crlf_and_comments() {
        let mut parser = SseParser::new();
        let events = parser.push(b": keep-alive\r\ndata: one\r\ndata: two\r\n\r\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, None);
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: [DONE]").is_empty());
        let events = parser.finish();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "[DONE]");
    }
}
