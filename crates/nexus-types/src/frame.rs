//! Message kinds and frames exchanged over endpoint connections.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{ConnId, EndpointPath};

/// Kind of a frame, tagged with the WebSocket opcode it travels as.
///
/// Serializes as the bare opcode. Deserializes from the opcode or from the
/// names `"text"` / `"binary"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(into = "u8")]
pub enum MessageKind {
    #[default]
    Text,
    Binary,
}

/// Opcode 0 (or any unknown value) where a kind was required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid message kind: {0}")]
pub struct InvalidKind(pub u64);

impl MessageKind {
    pub const TEXT_OPCODE: u8 = 1;
    pub const BINARY_OPCODE: u8 = 2;

    /// Map a transport opcode to a kind. `0` means "unset" and yields `None`.
    pub fn from_opcode(opcode: u8) -> Result<Option<Self>, InvalidKind> {
        match opcode {
            0 => Ok(None),
            Self::TEXT_OPCODE => Ok(Some(MessageKind::Text)),
            Self::BINARY_OPCODE => Ok(Some(MessageKind::Binary)),
            other => Err(InvalidKind(other as u64)),
        }
    }

    pub fn opcode(self) -> u8 {
        match self {
            MessageKind::Text => Self::TEXT_OPCODE,
            MessageKind::Binary => Self::BINARY_OPCODE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Binary => "binary",
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind.opcode()
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = InvalidKind;

    fn try_from(opcode: u8) -> Result<Self, Self::Error> {
        MessageKind::from_opcode(opcode)?.ok_or(InvalidKind(0))
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "1" => Ok(MessageKind::Text),
            "binary" | "2" => Ok(MessageKind::Binary),
            _ => Err(format!("Invalid message kind: '{}'. Use 'text' or 'binary'.", s)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts an opcode or a kind name; opcode 0 decodes as `None`.
struct KindVisitor;

impl<'de> Visitor<'de> for KindVisitor {
    type Value = Option<MessageKind>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a message kind opcode (0, 1, 2) or \"text\" / \"binary\"")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        let opcode = u8::try_from(v).map_err(|_| E::custom(InvalidKind(v)))?;
        MessageKind::from_opcode(opcode).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        let v = u64::try_from(v).map_err(|_| E::custom(format!("invalid message kind: {}", v)))?;
        self.visit_u64(v)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse::<MessageKind>().map(Some).map_err(E::custom)
    }
}

struct RawKind(Option<MessageKind>);

impl<'de> Deserialize<'de> for RawKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(KindVisitor).map(RawKind)
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawKind::deserialize(deserializer)?
            .0
            .ok_or_else(|| de::Error::custom(InvalidKind(0)))
    }
}

/// Deserialize an optional kind where both `null` and opcode `0` mean unset.
///
/// Use with `#[serde(default, deserialize_with = "nexus_types::optional_kind")]`.
pub fn optional_kind<'de, D>(deserializer: D) -> Result<Option<MessageKind>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawKind>::deserialize(deserializer)?.and_then(|raw| raw.0))
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Text, Bytes::from(text.into()))
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Binary, data)
    }

    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// A decoded frame received on an endpoint, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundMessage {
    pub endpoint_path: EndpointPath,
    pub conn_id: ConnId,
    pub kind: MessageKind,
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(endpoint_path: EndpointPath, conn_id: ConnId, frame: Frame) -> Self {
        Self {
            endpoint_path,
            conn_id,
            kind: frame.kind,
            payload: frame.payload,
            received_at: Utc::now(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn to_frame(&self) -> Frame {
        Frame::new(self.kind, self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Body {
        #[serde(default, deserialize_with = "optional_kind")]
        kind: Option<MessageKind>,
    }

    #[test]
    fn test_opcodes_match_websocket() {
        assert_eq!(MessageKind::Text.opcode(), 1);
        assert_eq!(MessageKind::Binary.opcode(), 2);
        assert_eq!(MessageKind::from_opcode(0), Ok(None));
        assert_eq!(MessageKind::from_opcode(2), Ok(Some(MessageKind::Binary)));
        assert_eq!(MessageKind::from_opcode(9), Err(InvalidKind(9)));
    }

    #[test]
    fn test_kind_serializes_as_opcode() {
        assert_eq!(serde_json::to_string(&MessageKind::Binary).unwrap(), "2");
        let kind: MessageKind = serde_json::from_str("1").unwrap();
        assert_eq!(kind, MessageKind::Text);
        let kind: MessageKind = serde_json::from_str("\"binary\"").unwrap();
        assert_eq!(kind, MessageKind::Binary);
        assert!(serde_json::from_str::<MessageKind>("0").is_err());
        assert!(serde_json::from_str::<MessageKind>("7").is_err());
    }

    #[test]
    fn test_optional_kind_treats_zero_as_unset() {
        let body: Body = serde_json::from_str(r#"{"kind": 0}"#).unwrap();
        assert_eq!(body.kind, None);
        let body: Body = serde_json::from_str(r#"{"kind": null}"#).unwrap();
        assert_eq!(body.kind, None);
        let body: Body = serde_json::from_str("{}").unwrap();
        assert_eq!(body.kind, None);
        let body: Body = serde_json::from_str(r#"{"kind": 2}"#).unwrap();
        assert_eq!(body.kind, Some(MessageKind::Binary));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("TEXT".parse::<MessageKind>().unwrap(), MessageKind::Text);
        assert_eq!("binary".parse::<MessageKind>().unwrap(), MessageKind::Binary);
        assert!("ping".parse::<MessageKind>().is_err());
    }

    #[test]
    fn test_inbound_message_keeps_frame() {
        let msg = InboundMessage::new("/chat".into(), "u1".into(), Frame::text("hi"));
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.as_text(), Some("hi"));
        assert_eq!(msg.to_frame(), Frame::text("hi"));
    }
}
