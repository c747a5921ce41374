//! SockJS text-frame codec.
//!
//! Inbound frames are a single tag character optionally followed by a JSON
//! array: `o` (open), `h` (heartbeat), `a` (data array) and `c` (close). Every
//! element of a data array is itself a JSON document encoded as a string, so
//! logical messages are double-encoded on the wire in both directions.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::stream::proto::ServerMessage;

/// Raw frame split into its tag and still-encoded payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Open,
    Heartbeat,
    /// JSON texts of each logical message, in wire order.
    Array(Vec<String>),
    /// Close payload, usually `[code, "reason"]`; `Null` when absent.
    Close(Value),
}

/// A fully decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    Open,
    Heartbeat,
    Messages(Vec<ServerMessage>),
    Close(Value),
}

/// Errors produced while splitting or decoding a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("unknown frame tag {0:?}")]
    UnknownTag(char),

    #[error("frame {tag:?} has a malformed payload")]
    MalformedPayload { tag: char },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Frame {
    /// Splits a raw transport frame into its tag and payload.
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let mut chars = raw.chars();
        let tag = chars.next().ok_or(FrameError::Empty)?;
        let payload = chars.as_str();

        if !payload.is_empty() && !(payload.starts_with('[') && payload.ends_with(']')) {
            return Err(FrameError::MalformedPayload { tag });
        }

        match tag {
            'o' => Ok(Self::Open),
            'h' => Ok(Self::Heartbeat),
            'a' => {
                if payload.is_empty() {
                    return Err(FrameError::MalformedPayload { tag });
                }
                Ok(Self::Array(serde_json::from_str(payload)?))
            }
            'c' => {
                if payload.is_empty() {
                    return Ok(Self::Close(Value::Null));
                }
                Ok(Self::Close(serde_json::from_str(payload)?))
            }
            other => Err(FrameError::UnknownTag(other)),
        }
    }
}

/// Decodes a raw frame into logical server messages.
///
/// Elements of a data array are decoded independently: an element that
/// fails to decode is logged and skipped, the rest keep their wire order.
pub fn decode(raw: &str) -> Result<Envelope, FrameError> {
    match Frame::parse(raw)? {
        Frame::Open => Ok(Envelope::Open),
        Frame::Heartbeat => Ok(Envelope::Heartbeat),
        Frame::Close(payload) => Ok(Envelope::Close(payload)),
        Frame::Array(texts) => {
            let messages = texts
                .iter()
                .filter_map(|text| match ServerMessage::from_text(text) {
                    Ok(message) => Some(message),
                    Err(err) => {
                        warn!(event = "message_dropped", error = %err, message = %text);
                        None
                    }
                })
                .collect();
            Ok(Envelope::Messages(messages))
        }
    }
}

/// Decodes one element of a data array.
pub fn decode_message<T: DeserializeOwned>(text: &str) -> Result<T, FrameError> {
    Ok(serde_json::from_str(text)?)
}

/// Encodes a logical message as the single-element, double-encoded array the
/// transport expects.
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<String, FrameError> {
    let inner = serde_json::to_string(message)?;
    Ok(serde_json::to_string(&[inner])?)
}
