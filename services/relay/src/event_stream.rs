//! Incremental parser for `text/event-stream` response bodies.

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    /// Event name; `message` when the server sent none
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
}

/// Accumulates body chunks and yields complete events.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere; only complete lines
/// are interpreted.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a body chunk, returning every event it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        events
    }

    fn process_line(&mut self, line: &str) -> Option<ServerEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id / retry are not used by the relay
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        let event = self.event.take();

        if event.is_none() && self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");

        Some(ServerEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_single_event() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(b"event: put\ndata: {\"path\":\"/\",\"data\":null}\n\n");

        assert_eq!(
            events,
            vec![ServerEvent {
                event: "put".to_string(),
                data: "{\"path\":\"/\",\"data\":null}".to_string(),
            }]
        );
    }

    #[test]
    fn test_handles_split_chunks_and_crlf() {
        let mut parser = EventStreamParser::new();

        assert!(parser.feed(b"event: keep-al").is_empty());
        assert!(parser.feed(b"ive\r\ndata: nu").is_empty());
        let events = parser.feed(b"ll\r\n\r\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "keep-alive");
        assert_eq!(events[0].data, "null");
    }

    #[test]
    fn test_multiple_events_and_comments() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(b": hello\n\nevent: a\ndata: 1\n\nevent: b\ndata: x\ndata: y\n\n");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "a");
        assert_eq!(events[1].data, "x\ny");
    }

    #[test]
    fn test_event_without_name_is_message() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(b"data: hi\n\n");
        assert_eq!(events[0].event, "message");
    }
}
