//! Incremental SSE parser for the client side.
//!
//! Tolerates keep-alive comments (lines starting with `:`) and multi-line
//! `data:` continuation — consecutive `data:` lines of one event join with
//! `\n` before the event is emitted.

/// Accumulates raw bytes and yields complete `data` payloads.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    /// `data:` lines of the event currently being assembled.
    pending_data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the response body; returns every event payload the
    /// chunk completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        // Process complete lines; a trailing partial line stays buffered.
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                // Blank line terminates the event.
                if !self.pending_data.is_empty() {
                    events.push(self.pending_data.join("\n"));
                    self.pending_data.clear();
                }
            } else if line.starts_with(':') {
                // Keep-alive comment.
            } else if let Some(data) = line.strip_prefix("data:") {
                self.pending_data.push(data.trim_start().to_owned());
            }
            // `event:`, `id:`, `retry:` fields are tolerated and ignored.
        }

        events
    }

    /// Flush a final unterminated event when the stream closes.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.trim().is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let rest = format!("{rest}\n\n");
            let mut tail = self.feed(&rest);
            if let Some(event) = tail.pop() {
                return Some(event);
            }
        }
        if self.pending_data.is_empty() {
            None
        } else {
            let event = self.pending_data.join("\n");
            self.pending_data.clear();
            Some(event)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: {\"x\":1}\n\n");
        assert_eq!(events, vec!["{\"x\":1}"]);
    }

    #[test]
    fn multi_line_data_joins_with_newline() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: first\ndata: second\n\n");
        assert_eq!(events, vec!["first\nsecond"]);
    }

    #[test]
    fn comments_are_ignored() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keep-alive\n\ndata: real\n\n");
        assert_eq!(events, vec!["real"]);
    }

    #[test]
    fn split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: par").is_empty());
        assert!(parser.feed("tial\n").is_empty());
        let events = parser.feed("\n");
        assert_eq!(events, vec!["partial"]);
    }

    #[test]
    fn event_and_id_fields_tolerated() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: update\nid: 3\nretry: 100\ndata: payload\n\n");
        assert_eq!(events, vec!["payload"]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: tail").is_empty());
        assert_eq!(parser.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn crlf_line_endings() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: x\r\n\r\n");
        assert_eq!(events, vec!["x"]);
    }
}
