//! JSON message envelope carried in text frames.
//!
//! Every message is `{"type": "<tag>", "payload": <anything>}`. The envelope is
//! decoded once generically; the payload is decoded a second time by whoever
//! knows the schema for that tag, via [`Envelope::payload_as`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// The `type` tag of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Keepalive request from a client
    Ping,
    /// Keepalive reply
    Pong,
    /// Current UI state pushed to display clients
    UiUpdate,
    /// Interaction feedback sent by a display client
    Interaction,
    /// Any other tag, kept verbatim
    Other(String),
}

impl MessageType {
    /// The tag as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::UiUpdate => "ui_update",
            MessageType::Interaction => "interaction",
            MessageType::Other(tag) => tag,
        }
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        match tag {
            "ping" => MessageType::Ping,
            "pong" => MessageType::Pong,
            "ui_update" => MessageType::UiUpdate,
            "interaction" => MessageType::Interaction,
            other => MessageType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(MessageType::from(tag.as_str()))
    }
}

/// A typed message: tag plus opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message tag
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Tag-specific payload; omitted from the JSON when null
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    /// An envelope with no payload.
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            payload: Value::Null,
        }
    }

    /// An envelope around a serializable payload.
    pub fn with_payload<T: Serialize + ?Sized>(
        kind: MessageType,
        payload: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            kind,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Keepalive request.
    pub fn ping() -> Self {
        Self::new(MessageType::Ping)
    }

    /// Keepalive reply: `{"type":"pong"}`.
    pub fn pong() -> Self {
        Self::new(MessageType::Pong)
    }

    /// Decode an envelope from a text frame payload.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Encode as compact JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode the payload against the schema the caller expects for this tag.
    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_keepalive() {
        let envelope = Envelope::from_slice(br#"{"type":"ping"}"#).unwrap();
        assert_eq!(envelope.kind, MessageType::Ping);
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn test_pong_is_exact() {
        assert_eq!(Envelope::pong().to_json().unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_unknown_tag_is_kept() {
        let raw = br#"{"type":"layout_vote","payload":{"choice":"b"}}"#;
        let envelope = Envelope::from_slice(raw).unwrap();
        assert_eq!(envelope.kind, MessageType::Other("layout_vote".into()));
        assert_eq!(envelope.payload, json!({"choice": "b"}));

        let back: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(back, json!({"type": "layout_vote", "payload": {"choice": "b"}}));
    }

    #[test]
    fn test_payload_decoded_by_tag() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Tap {
            element: String,
            dwell_ms: u64,
        }

        let envelope = Envelope::from_slice(
            br#"{"type":"interaction","payload":{"element":"weather","dwell_ms":1200}}"#,
        )
        .unwrap();
        assert_eq!(envelope.kind, MessageType::Interaction);
        assert_eq!(
            envelope.payload_as::<Tap>().unwrap(),
            Tap {
                element: "weather".into(),
                dwell_ms: 1200
            }
        );
        assert!(envelope.payload_as::<Vec<u8>>().is_err());
    }

    #[test]
    fn test_with_payload() {
        let envelope =
            Envelope::with_payload(MessageType::UiUpdate, &json!({"html": "<p>hi</p>"})).unwrap();
        assert_eq!(
            envelope.to_json().unwrap(),
            r#"{"type":"ui_update","payload":{"html":"<p>hi</p>"}}"#
        );
    }

    #[test]
    fn test_malformed_envelopes() {
        assert!(Envelope::from_slice(b"not json").is_err());
        assert!(Envelope::from_slice(br#"{"payload":1}"#).is_err());
        assert!(Envelope::from_slice(br#"{"type":7}"#).is_err());
    }
}
