use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
pub const REGISTER_TYPE: &str = "register";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Handshake {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl Handshake {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platform: None,
        }
    }

    /// Trimmed display name, `None` when blank.
    pub fn display_name(&self) -> Option<&str> {
        let name = self.name.trim();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Register(Handshake),
    /// Parsed JSON that is not a handshake. Displays never send content.
    Other { kind: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("frame is not a JSON object")]
    NotAnObject,
}

pub fn encode_text<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded = serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_text<T: DeserializeOwned>(text: &str, max_frame_bytes: usize) -> Result<T, FrameError> {
    let raw = text.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

/// Classifies a frame received from a display.
pub fn parse_inbound(text: &str, max_frame_bytes: usize) -> Result<InboundFrame, FrameError> {
    let value: Value = decode_text(text, max_frame_bytes)?;
    let Value::Object(map) = &value else {
        return Err(FrameError::NotAnObject);
    };
    let kind = map.get("type").and_then(Value::as_str).map(str::to_string);
    if kind.as_deref() != Some(REGISTER_TYPE) {
        return Ok(InboundFrame::Other { kind });
    }
    let handshake: Handshake =
        serde_json::from_value(value).map_err(|err| FrameError::Decode(err.to_string()))?;
    Ok(InboundFrame::Register(handshake))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Command, CommandTarget};

    #[test]
    fn register_frame_is_recognised_and_platform_is_optional() {
        let frame = parse_inbound(
            r#"{"type":"register","name":"Lobby","platform":"tizen"}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("parse");
        let InboundFrame::Register(handshake) = frame else {
            panic!("expected handshake")
        };
        assert_eq!(handshake.display_name(), Some("Lobby"));
        assert_eq!(handshake.platform.as_deref(), Some("tizen"));

        let bare = parse_inbound(r#"{"type":"register","name":" Cafe "}"#, DEFAULT_MAX_FRAME_BYTES)
            .expect("parse");
        assert_eq!(bare, InboundFrame::Register(Handshake::new(" Cafe ")));
    }

    #[test]
    fn register_without_name_has_no_display_name() {
        let frame =
            parse_inbound(r#"{"type":"register"}"#, DEFAULT_MAX_FRAME_BYTES).expect("parse");
        let InboundFrame::Register(handshake) = frame else {
            panic!("expected handshake")
        };
        assert_eq!(handshake.display_name(), None);
        assert_eq!(Handshake::new("   ").display_name(), None);
    }

    #[test]
    fn non_handshake_json_is_classified_as_other() {
        let frame = parse_inbound(r#"{"type":"status","ok":true}"#, DEFAULT_MAX_FRAME_BYTES)
            .expect("parse");
        assert_eq!(
            frame,
            InboundFrame::Other {
                kind: Some("status".to_string())
            }
        );
        let untyped = parse_inbound(r#"{"target":"ticker"}"#, DEFAULT_MAX_FRAME_BYTES)
            .expect("parse");
        assert_eq!(untyped, InboundFrame::Other { kind: None });
    }

    #[test]
    fn legacy_plain_text_greeting_is_a_decode_error() {
        let result = parse_inbound("Tizen TV reporting for duty!", DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(result, Err(FrameError::Decode(_))));
        assert_eq!(
            parse_inbound("[1,2,3]", DEFAULT_MAX_FRAME_BYTES),
            Err(FrameError::NotAnObject)
        );
    }

    #[test]
    fn oversized_frames_are_rejected_both_ways() {
        let command = Command::new(
            CommandTarget::Ticker,
            serde_json::json!({"messages": ["x".repeat(128)]}),
        );
        assert!(matches!(
            encode_text(&command, 64),
            Err(FrameError::OversizedFrame { .. })
        ));

        let big = format!(r#"{{"type":"register","name":"{}"}}"#, "n".repeat(2_000));
        assert!(matches!(
            parse_inbound(&big, 1_024),
            Err(FrameError::OversizedFrame { .. })
        ));
    }

    #[test]
    fn trailing_newline_is_tolerated() {
        let frame = parse_inbound("{\"type\":\"register\",\"name\":\"Lobby\"}\r\n", 64)
            .expect("parse");
        assert!(matches!(frame, InboundFrame::Register(_)));
    }
}
