//! `tokio_util` codec adapter over the extractor
//!
//! Pipes deliver bytes, not strings, and a read may end inside a multi-byte
//! character. The codec hands the extractor only whole lines, so any split
//! in the byte stream decodes to the same events.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use super::extractor::{ParserState, feed, finish};
use crate::error::OrchestraError;
use crate::types::events::StreamingEvent;

/// Decodes agent stdout into batches of events
#[derive(Debug, Default)]
pub struct StreamEventCodec {
    state: ParserState,
}

impl StreamEventCodec {
    /// Create a codec with the given decoder state
    #[must_use]
    pub fn new(state: ParserState) -> Self {
        Self { state }
    }

    fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<StreamingEvent> {
        let text = String::from_utf8_lossy(bytes);
        let (state, events) = feed(std::mem::take(&mut self.state), &text);
        self.state = state;
        events
    }
}

impl Decoder for StreamEventCodec {
    type Item = Vec<StreamingEvent>;
    type Error = OrchestraError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(last_newline) = src.iter().rposition(|b| *b == b'\n') else {
            return Ok(None);
        };
        let lines = src.split_to(last_newline + 1);
        let events = self.feed_bytes(&lines);
        Ok((!events.is_empty()).then_some(events))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut events = self.decode(src)?.unwrap_or_default();
        if !src.is_empty() {
            let tail = src.split();
            events.extend(self.feed_bytes(&tail));
        }
        let (state, tail_events) = finish(std::mem::take(&mut self.state));
        self.state = state;
        events.extend(tail_events);
        Ok((!events.is_empty()).then_some(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_for_newline_across_utf8_split() {
        let line = "{\"type\":\"assistant\",\"message\":{\"content\":\"héllo\"}}\n";
        let bytes = line.as_bytes();
        let split = line.find('é').unwrap() + 1;

        let mut codec = StreamEventCodec::default();
        let mut buf = BytesMut::from(&bytes[..split]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[split..]);
        let events = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(
            &events[0].payload,
            crate::types::EventPayload::AssistantMessageDelta { text, .. } if text == "héllo"
        ));
    }

    #[test]
    fn eof_flushes_unterminated_line() {
        let mut codec = StreamEventCodec::default();
        let mut buf = BytesMut::from("trailing output");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        let events = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "raw-output");
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }
}
