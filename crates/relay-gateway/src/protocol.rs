//! WebSocket protocol definitions
//!
//! Defines the frames exchanged between peers and the gateway.

use serde::{Deserialize, Serialize};

/// Directed message sent by a client.
///
/// Decoding is strict: all three fields must be present as strings, and a
/// frame missing any of them is dropped instead of being relayed with
/// empty values. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Message payload
    pub data: String,
    /// Claimed sender identity
    pub from: String,
    /// Target identity
    pub to: String,
}

/// Frames sent from the gateway to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A directed message relayed from another peer
    Message {
        /// Message payload
        data: String,
        /// Sender identity
        from: String,
        /// Target identity
        to: String,
    },
    /// Human-readable system notification
    Notify {
        /// Notification text
        data: String,
    },
    /// Event relayed from the external pub/sub channel
    Event {
        /// Channel the event was published on
        channel: String,
        /// Decoded event content
        data: serde_json::Value,
    },
}

impl ServerFrame {
    /// Stamp an inbound envelope as a relayed message
    pub fn message(envelope: InboundEnvelope) -> Self {
        ServerFrame::Message {
            data: envelope.data,
            from: envelope.from,
            to: envelope.to,
        }
    }

    /// Build a system notification
    pub fn notify(data: impl Into<String>) -> Self {
        ServerFrame::Notify { data: data.into() }
    }

    /// Encode as a JSON text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decode a raw inbound frame
pub fn decode_envelope(raw: &[u8]) -> Result<InboundEnvelope, serde_json::Error> {
    serde_json::from_slice(raw)
}

/// Text of the announcement fanned out when a user joins
pub fn join_notice(identity: &str, token: &str) -> String {
    format!("New user connected: {} and UUID: {}", identity, token)
}

/// Text of the private welcome sent to the new connection
pub fn welcome_notice(identity: &str, token: &str) -> String {
    format!("Hello user: {} with UUID: {}", identity, token)
}
