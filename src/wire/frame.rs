//! Peer-to-peer frame grammar.
//!
//! Frames on the peer channel, one JSON object per line:
//!
//! | `type`          | Direction             | Purpose                        |
//! |-----------------|-----------------------|--------------------------------|
//! | `handshake`     | initiator → responder | public key + initiator's id    |
//! | `handshake_ack` | responder → initiator | completes the key agreement    |
//! | `message`       | either (post-handshake) | sealed application payload   |
//! | `ack`           | receiver → sender     | delivery acknowledgement       |
//! | `ping` / `pong` | either                | liveness                       |
//!
//! A bare `{"error": ...}` object is a fault notice; it carries no `type`
//! field and is matched before the tagged grammar.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fault code for an unparseable or state-inappropriate peer line
pub const FAULT_INVALID_MESSAGE: &str = "invalid_message";

/// Fault code for a sealed payload that failed to open
pub const FAULT_DECRYPTION_FAILED: &str = "decryption_failed";

/// Typed peer frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerFrame {
    /// Session opener: the initiator's public key and agent id
    Handshake { key: String, from: String },
    /// Responder's public key; the session is keyed once both sides have
    /// seen the other's key
    HandshakeAck { key: String },
    /// Sealed application message
    Message {
        #[serde(rename = "messageType")]
        message_type: String,
        data: String,
        #[serde(rename = "correlationId")]
        correlation_id: String,
    },
    /// Delivery acknowledgement for a `message`
    Ack {
        #[serde(rename = "correlationId")]
        correlation_id: String,
    },
    Ping,
    Pong,
}

impl PeerFrame {
    /// Decode a raw frame value; `None` if the value is a fault notice
    /// (handled separately via [`FaultFrame`]).
    pub fn decode(value: &Value) -> Option<Result<PeerFrame, serde_json::Error>> {
        if value.get("error").is_some() {
            return None;
        }
        Some(serde_json::from_value(value.clone()))
    }
}

/// Fault notice frame: `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultFrame {
    pub error: String,
}

impl FaultFrame {
    /// Build a fault notice with the given code
    pub fn new(code: impl Into<String>) -> Self {
        Self { error: code.into() }
    }

    /// `{"error":"invalid_message"}`
    pub fn invalid_message() -> Self {
        Self::new(FAULT_INVALID_MESSAGE)
    }

    /// `{"error":"decryption_failed"}`
    pub fn decryption_failed() -> Self {
        Self::new(FAULT_DECRYPTION_FAILED)
    }

    /// Extract the fault code from a raw frame value
    pub fn from_value(value: &Value) -> Option<String> {
        value
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handshake_wire_form() {
        let frame = PeerFrame::Handshake {
            key: "AAAA".to_string(),
            from: "abc123".to_string(),
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"type": "handshake", "key": "AAAA", "from": "abc123"})
        );
    }

    #[test]
    fn test_message_wire_form_camel_case() {
        let frame = PeerFrame::Message {
            message_type: "hello".to_string(),
            data: "c2VhbGVk".to_string(),
            correlation_id: "00ff00ff00ff00ff".to_string(),
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message",
                "messageType": "hello",
                "data": "c2VhbGVk",
                "correlationId": "00ff00ff00ff00ff"
            })
        );
    }

    #[test]
    fn test_ping_pong_wire_form() {
        assert_eq!(
            serde_json::to_value(&PeerFrame::Ping).unwrap(),
            json!({"type": "ping"})
        );
        assert_eq!(
            serde_json::to_value(&PeerFrame::Pong).unwrap(),
            json!({"type": "pong"})
        );
    }

    #[test]
    fn test_frame_roundtrip() {
        let frames = vec![
            PeerFrame::HandshakeAck {
                key: "BBBB".to_string(),
            },
            PeerFrame::Ack {
                correlation_id: "1234567890abcdef".to_string(),
            },
            PeerFrame::Ping,
        ];

        for frame in frames {
            let value = serde_json::to_value(&frame).unwrap();
            let back = PeerFrame::decode(&value).unwrap().unwrap();
            assert_eq!(back, frame);
        }
    }

    #[test]
    fn test_fault_frame_is_not_typed() {
        let value = json!({"error": "decryption_failed"});

        assert!(PeerFrame::decode(&value).is_none());
        assert_eq!(
            FaultFrame::from_value(&value).as_deref(),
            Some(FAULT_DECRYPTION_FAILED)
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let value = json!({"type": "teleport"});
        assert!(PeerFrame::decode(&value).unwrap().is_err());
    }
}
