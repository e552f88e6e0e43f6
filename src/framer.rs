//! Incremental decoding of the pipeline stream
//!
//! Chunks arrive with arbitrary boundaries. `Utf8Decoder` turns bytes into text
//! without splitting multi-byte characters, and `FrameDecoder` turns that text
//! into typed events, keeping any trailing partial frame for the next chunk.

use crate::protocol::{
    is_clear_message, Event, DATA_PREFIX, DATA_URI_PREFIX, FINISHED, FRAME_SEPARATOR,
    IMAGE_MARKER,
};

/// Streaming UTF-8 decoder.
///
/// An incomplete sequence at the end of a chunk is held back until the next
/// chunk completes it. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Truncated sequence, wait for more bytes
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush at end of stream. A dangling partial sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Splits a text stream on blank lines and parses each complete frame.
///
/// Frames that cannot be parsed are dropped and counted, never surfaced as errors.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    utf8: Utf8Decoder,
    buffer: String,
    dropped: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one complete message (e.g. a WebSocket text message).
    ///
    /// A message that is itself a clear control object yields `Clear` straight
    /// away and leaves any buffered partial frame untouched.
    pub fn push_str(&mut self, message: &str) -> Vec<Event> {
        if is_clear_message(message) {
            return vec![Event::Clear];
        }
        self.feed(message)
    }

    /// Feed raw bytes whose boundaries may fall inside a UTF-8 character.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<Event> {
        let text = self.utf8.decode(chunk);
        self.feed(&text)
    }

    /// Text held back because no separator has followed it yet
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Number of complete frames that failed to parse
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    fn feed(&mut self, text: &str) -> Vec<Event> {
        self.buffer.push_str(text);
        if !self.buffer.contains(FRAME_SEPARATOR) {
            return Vec::new();
        }

        let buffer = std::mem::take(&mut self.buffer);
        let mut frames: Vec<&str> = buffer.split(FRAME_SEPARATOR).collect();
        // Last segment has no separator after it yet
        self.buffer = frames.pop().unwrap_or_default().to_string();

        let mut events = Vec::new();
        for frame in frames {
            if frame.is_empty() {
                continue;
            }
            match parse_frame(frame) {
                Some(event) => events.push(event),
                None => {
                    self.dropped += 1;
                    tracing::debug!(
                        dropped = self.dropped,
                        len = frame.len(),
                        "Dropping unparseable frame"
                    );
                }
            }
        }
        events
    }
}

/// Parse one complete frame (without its trailing separator).
pub fn parse_frame(frame: &str) -> Option<Event> {
    // Control frames bypass the data: convention entirely
    if is_clear_message(frame) {
        return Some(Event::Clear);
    }

    let data = frame.strip_prefix(DATA_PREFIX)?;
    if data == FINISHED {
        return Some(Event::Finished);
    }

    let (kind, rest) = data.split_once(':').unwrap_or((data, ""));
    match kind {
        "text" => Some(Event::Text {
            content: rest.to_string(),
        }),
        "image" => {
            let (title, body) = rest.split_once(IMAGE_MARKER)?;
            Some(Event::Image {
                title: title.to_string(),
                content: format!("{}{}", DATA_URI_PREFIX, body),
            })
        }
        _ => None,
    }
}
