//! Incremental text-to-event decoding
//!
//! [`feed`] is a pure function over an explicit [`ParserState`]: the state
//! value is the only thing carried between calls. Text is processed one
//! complete line at a time, so the decoded events do not depend on where
//! the input was split into chunks.

use serde_json::Value;

use super::parser::classify;
use super::scanner::{Segment, scan};
use crate::types::events::{EventPayload, StreamingEvent};

/// Maximum size of a JSON object carried across lines (1MB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Decoder state threaded through [`feed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserState {
    /// Text after the last newline seen
    pub buffer: String,
    /// An object opened on an earlier line and not yet closed
    pub pending: String,
    /// Marker stripped from the start of each line
    pub line_prefix: Option<String>,
    /// Upper bound for `pending` before it is flushed as raw output
    pub max_buffer_size: usize,
}

impl Default for ParserState {
    fn default() -> Self {
        Self {
            buffer: String::new(),
            pending: String::new(),
            line_prefix: None,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

impl ParserState {
    /// State that strips `prefix` from every line
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            line_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    /// True when no text is held back
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.pending.is_empty()
    }

    fn consume_line(&mut self, line: &str, out: &mut Vec<EventPayload>) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let body = self.strip_prefix(line).trim();

        if !self.pending.is_empty() && self.continue_pending(body, out) {
            return;
        }
        if body.is_empty() {
            return;
        }
        if let Some(value) = parse_object(body) {
            out.extend(classify(value, line));
            return;
        }

        if scan(body).open_at == Some(0) && is_json_prefix(body) {
            self.carry_or_flush(body.to_string(), out);
            return;
        }
        decode_segments(body, line, out);
    }

    /// Extend the pending object with `body`
    ///
    /// Returns false when the pending text was flushed and `body` still has
    /// to be decoded on its own.
    fn continue_pending(&mut self, body: &str, out: &mut Vec<EventPayload>) -> bool {
        if body.is_empty() {
            return true;
        }
        let mut combined = self.pending.clone();
        combined.push('\n');
        combined.push_str(body);

        if let Some(value) = parse_object(&combined) {
            self.pending.clear();
            out.extend(classify(value, &combined));
            return true;
        }
        if is_json_prefix(&combined) {
            self.pending.clear();
            self.carry_or_flush(combined, out);
            return true;
        }
        flush_lines(&std::mem::take(&mut self.pending), out);
        false
    }

    fn carry_or_flush(&mut self, text: String, out: &mut Vec<EventPayload>) {
        if text.len() > self.max_buffer_size {
            log::warn!(
                "Discarding JSON accumulation after {} bytes (limit {})",
                text.len(),
                self.max_buffer_size
            );
            flush_lines(&text, out);
        } else {
            self.pending = text;
        }
    }

    fn strip_prefix<'a>(&self, line: &'a str) -> &'a str {
        match &self.line_prefix {
            Some(prefix) if !prefix.is_empty() => {
                let trimmed = line.trim_start();
                trimmed.strip_prefix(prefix.as_str()).unwrap_or(line)
            }
            _ => line,
        }
    }
}

/// Parse `text` as exactly one JSON object
fn parse_object(text: &str) -> Option<Value> {
    if !text.starts_with('{') {
        return None;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Whether `text` is the start of a JSON value that more input could complete
fn is_json_prefix(text: &str) -> bool {
    matches!(serde_json::from_str::<Value>(text), Err(e) if e.is_eof())
}

/// One raw-output event per carried line
fn flush_lines(text: &str, out: &mut Vec<EventPayload>) {
    out.extend(
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(EventPayload::raw),
    );
}

/// Decode a line holding zero or more embedded objects
///
/// The line is split only when every balanced span parses; otherwise the
/// whole line is forwarded as one raw-output event.
fn decode_segments(body: &str, original: &str, out: &mut Vec<EventPayload>) {
    let scanned = scan(body);
    let mut decoded = Vec::new();
    let mut all_parsed = scanned.object_count() > 0;

    for segment in &scanned.segments {
        match segment {
            Segment::Object(text) => match parse_object(text) {
                Some(value) => decoded.extend(classify(value, text)),
                None => {
                    all_parsed = false;
                    break;
                }
            },
            Segment::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    decoded.push(EventPayload::raw(text));
                }
            }
        }
    }

    if !all_parsed {
        out.push(EventPayload::raw(original));
        return;
    }
    if let Some(open) = scanned.open_at {
        decoded.push(EventPayload::raw(body[open..].trim()));
    }
    out.extend(decoded);
}

/// Feed a chunk of output, returning the new state and every complete event
///
/// # Arguments
/// * `state` - State returned by the previous call
/// * `chunk` - Newly arrived text, split anywhere
#[must_use]
pub fn feed(mut state: ParserState, chunk: &str) -> (ParserState, Vec<StreamingEvent>) {
    state.buffer.push_str(chunk);
    let mut payloads = Vec::new();

    if let Some(last_newline) = state.buffer.rfind('\n') {
        let rest = state.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut state.buffer, rest);
        for line in complete.split_terminator('\n') {
            state.consume_line(line, &mut payloads);
        }
    }

    (state, payloads.into_iter().map(StreamingEvent::now).collect())
}

/// Flush everything held back, treating the buffer as a final line
#[must_use]
pub fn finish(mut state: ParserState) -> (ParserState, Vec<StreamingEvent>) {
    let mut payloads = Vec::new();
    let tail = std::mem::take(&mut state.buffer);
    if !tail.is_empty() {
        state.consume_line(&tail, &mut payloads);
    }
    if !state.pending.is_empty() {
        flush_lines(&std::mem::take(&mut state.pending), &mut payloads);
    }
    (state, payloads.into_iter().map(StreamingEvent::now).collect())
}

/// Owning wrapper around [`feed`] for callers that prefer a stateful object
#[derive(Debug, Clone, Default)]
pub struct StreamEventExtractor {
    state: ParserState,
}

impl StreamEventExtractor {
    /// Create an extractor with the given line prefix
    #[must_use]
    pub fn new(line_prefix: Option<String>) -> Self {
        Self {
            state: ParserState {
                line_prefix,
                ..ParserState::default()
            },
        }
    }

    /// Decode a chunk of output
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamingEvent> {
        let (state, events) = feed(std::mem::take(&mut self.state), chunk);
        self.state = state;
        events
    }

    /// Flush held-back text at end of stream
    pub fn finish(&mut self) -> Vec<StreamingEvent> {
        let (state, events) = finish(std::mem::take(&mut self.state));
        self.state = state;
        events
    }

    /// Current decoder state
    #[must_use]
    pub fn state(&self) -> &ParserState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(events: Vec<StreamingEvent>) -> Vec<EventPayload> {
        events.into_iter().map(|e| e.payload).collect()
    }

    #[test]
    fn retains_incomplete_trailing_line() {
        let (state, events) = feed(ParserState::default(), r#"{"type":"assis"#);
        assert!(events.is_empty());
        assert_eq!(state.buffer, r#"{"type":"assis"#);

        let (state, events) = feed(
            state,
            "tant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"hi\"}]}}\n",
        );
        assert!(state.is_empty());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "assistant-message-delta");
    }

    #[test]
    fn invalid_json_line_is_one_raw_event() {
        let (_, events) = feed(ParserState::default(), "{\"a\": }\nplain text\n");
        assert_eq!(
            payloads(events),
            vec![EventPayload::raw("{\"a\": }"), EventPayload::raw("plain text")]
        );
    }

    #[test]
    fn strips_line_prefix() {
        let state = ParserState::with_prefix("@@EVENT ");
        let (_, events) = feed(state, "@@EVENT {\"type\":\"result\",\"session_id\":\"T-1\"}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "session-result");
    }

    #[test]
    fn splits_multiple_objects_on_one_line() {
        let line = "{\"type\":\"error\",\"message\":\"boom\"}{\"type\":\"result\"}\n";
        let (_, events) = feed(ParserState::default(), line);
        let kinds: Vec<_> = events.iter().map(StreamingEvent::kind).collect();
        assert_eq!(kinds, vec!["error-output", "session-result"]);
    }

    #[test]
    fn carries_object_across_lines() {
        let input = "{\"type\":\"result\",\n\"result\":\"done\"}\n";
        let (state, events) = feed(ParserState::default(), input);
        assert!(state.pending.is_empty());
        assert!(matches!(
            payloads(events).as_slice(),
            [EventPayload::SessionResult { result: Some(r), .. }] if r == "done"
        ));
    }

    #[test]
    fn stale_opening_is_flushed_by_a_complete_object() {
        let input = "{ not json\n{\"type\":\"result\"}\n";
        let (state, events) = feed(ParserState::default(), input);
        assert!(state.pending.is_empty());
        let kinds: Vec<_> = events.iter().map(StreamingEvent::kind).collect();
        assert_eq!(kinds, vec!["raw-output", "session-result"]);
    }

    #[test]
    fn brace_line_that_cannot_be_json_is_not_carried() {
        let (state, events) = feed(ParserState::default(), "{ broken\nhello\nworld\n");
        assert!(state.is_empty());
        assert_eq!(
            payloads(events),
            vec![
                EventPayload::raw("{ broken"),
                EventPayload::raw("hello"),
                EventPayload::raw("world"),
            ]
        );
    }

    #[test]
    fn carried_object_is_released_when_a_plain_line_follows() {
        let (state, events) = feed(ParserState::default(), "{\"type\":\"result\",\n");
        assert!(events.is_empty());
        assert_eq!(state.pending, "{\"type\":\"result\",");

        let (state, events) = feed(state, "hello\n");
        assert!(state.is_empty());
        assert_eq!(
            payloads(events),
            vec![
                EventPayload::raw("{\"type\":\"result\","),
                EventPayload::raw("hello"),
            ]
        );
    }

    #[test]
    fn oversized_accumulation_is_flushed_as_raw() {
        let state = ParserState {
            max_buffer_size: 16,
            ..ParserState::default()
        };
        let (state, events) = feed(state, "{\"text\":\"aaaaaaaaaaaaaaaaaaaa\n");
        assert!(state.pending.is_empty());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "raw-output");
    }

    #[test]
    fn finish_flushes_tail_without_newline() {
        let (state, events) = feed(ParserState::default(), "partial");
        assert!(events.is_empty());
        let (state, events) = finish(state);
        assert!(state.is_empty());
        assert_eq!(payloads(events), vec![EventPayload::raw("partial")]);
    }

    #[test]
    fn blank_lines_produce_nothing() {
        let (_, events) = feed(ParserState::default(), "\n\r\n   \n");
        assert!(events.is_empty());
    }
}
