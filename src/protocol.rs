//! Wire protocol shared by the inference stream, the relay and its subscribers.
//!
//! Grammar of one frame on the stream:
//!
//! ```text
//! frame    = "data: " payload "\n\n" | control
//! payload  = "FINISHED" | "text:" content | "image:" title ":data:image/jpeg;base64," base64
//! control  = {"type":"clear"}            (JSON object, no "data: " prefix)
//! ```
//!
//! `content` and `title` are free text and may contain `:`. Only the first `:`
//! after the payload type is a delimiter; an image title ends at the first
//! occurrence of the data URI marker.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix in front of every non-control frame
pub const DATA_PREFIX: &str = "data: ";
/// Record separator between frames
pub const FRAME_SEPARATOR: &str = "\n\n";
/// Payload marking the end of one run
pub const FINISHED: &str = "FINISHED";
/// Prefix of every image data URI
pub const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";
/// Literal separating an image title from its base64 body
pub const IMAGE_MARKER: &str = ":data:image/jpeg;base64,";

/// One decoded unit of the pipeline stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Text { content: String },
    /// `content` is always a `data:image/jpeg;base64,` URI
    Image { title: String, content: String },
    Clear,
    Finished,
}

/// Errors raised when an event cannot be written as a frame that decodes back to itself
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("{field} contains the frame separator")]
    ContainsSeparator { field: &'static str },

    #[error("image title contains the data URI marker")]
    TitleContainsMarker,

    #[error("image content is not a JPEG data URI")]
    NotADataUri,
}

impl Event {
    pub fn text(content: impl Into<String>) -> Self {
        Event::Text {
            content: content.into(),
        }
    }

    /// Build an image event from an already base64-encoded JPEG body
    pub fn image(title: impl Into<String>, base64_body: &str) -> Self {
        Event::Image {
            title: title.into(),
            content: format!("{}{}", DATA_URI_PREFIX, base64_body),
        }
    }

    /// Build an image event from raw JPEG bytes
    pub fn image_from_jpeg(title: impl Into<String>, jpeg: &[u8]) -> Self {
        Self::image(title, &STANDARD.encode(jpeg))
    }

    /// Decode the JPEG bytes of an image event.
    ///
    /// Returns `None` for other events or when the body is not valid base64.
    pub fn image_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Event::Image { content, .. } => {
                let body = content.strip_prefix(DATA_URI_PREFIX)?;
                STANDARD.decode(body).ok()
            }
            _ => None,
        }
    }

    /// Serialize this event as it appears on the wire.
    ///
    /// Data events are terminated by the frame separator. `Clear` is a bare
    /// JSON control object and is always delivered as a message of its own.
    pub fn to_frame(&self) -> Result<String, EncodeError> {
        match self {
            Event::Text { content } => {
                if content.contains(FRAME_SEPARATOR) {
                    return Err(EncodeError::ContainsSeparator { field: "text" });
                }
                Ok(format!("{DATA_PREFIX}text:{content}{FRAME_SEPARATOR}"))
            }
            Event::Image { title, content } => {
                if title.contains(FRAME_SEPARATOR) {
                    return Err(EncodeError::ContainsSeparator { field: "title" });
                }
                if title.contains(IMAGE_MARKER) {
                    return Err(EncodeError::TitleContainsMarker);
                }
                if !content.starts_with(DATA_URI_PREFIX) {
                    return Err(EncodeError::NotADataUri);
                }
                Ok(format!(
                    "{DATA_PREFIX}image:{title}:{content}{FRAME_SEPARATOR}"
                ))
            }
            Event::Finished => Ok(format!("{DATA_PREFIX}{FINISHED}{FRAME_SEPARATOR}")),
            Event::Clear => Ok(ControlMessage::Clear.to_json()),
        }
    }
}

/// Out-of-band control frames, sent as standalone JSON objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Clear,
}

impl ControlMessage {
    pub fn to_json(self) -> String {
        match self {
            ControlMessage::Clear => r#"{"type":"clear"}"#.to_string(),
        }
    }
}

/// True when `text` is a JSON value whose `type` field is `"clear"`.
///
/// Extra fields are tolerated; anything that is not JSON is not a clear frame.
pub fn is_clear_message(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| {
            value
                .get("type")
                .and_then(|t| t.as_str())
                .map(|t| t == "clear")
        })
        .unwrap_or(false)
}

/// Which image corner square a1 sits in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum A1Position {
    #[default]
    #[serde(rename = "BL")]
    BottomLeft,
    #[serde(rename = "BR")]
    BottomRight,
    #[serde(rename = "TL")]
    TopLeft,
    #[serde(rename = "TR")]
    TopRight,
}

impl A1Position {
    pub fn as_str(self) -> &'static str {
        match self {
            A1Position::BottomLeft => "BL",
            A1Position::BottomRight => "BR",
            A1Position::TopLeft => "TL",
            A1Position::TopRight => "TR",
        }
    }
}

impl fmt::Display for A1Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid a1 position '{0}', expected one of BL, BR, TL, TR")]
pub struct InvalidA1Position(pub String);

impl FromStr for A1Position {
    type Err = InvalidA1Position;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "BL" => Ok(A1Position::BottomLeft),
            "BR" => Ok(A1Position::BottomRight),
            "TL" => Ok(A1Position::TopLeft),
            "TR" => Ok(A1Position::TopRight),
            other => Err(InvalidA1Position(other.to_string())),
        }
    }
}
