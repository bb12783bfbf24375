//! Wire message types for the peer protocol.
//!
//! Every frame carries one JSON object tagged by `type`:
//!
//! ```json
//! {"type": "key_exchange", "username": "alice", "public_key": "-----BEGIN PUBLIC KEY-----..."}
//! {"type": "encrypted_message", "content": "{\"key_id\": ...}", "recipient": "bob"}
//! ```
//!
//! `content` carries the envelope JSON as a string. An envelope given as a
//! nested object is accepted too.

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::error::MessengerError;

/// A message exchanged between two connected peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Announces a username and its long-term public key.
    KeyExchange { username: String, public_key: String },

    /// Carries one envelope.
    EncryptedMessage {
        #[serde(with = "envelope_json")]
        content: Envelope,
        /// Routing hint; the authenticated recipient is whoever can unwrap.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
    },
}

impl PeerMessage {
    /// Serialize to bytes for transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessengerError> {
        serde_json::to_vec(self).map_err(|e| MessengerError::Protocol(e.to_string()))
    }

    /// Deserialize from bytes. Anything that isn't a known message is a
    /// `Protocol` error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessengerError> {
        serde_json::from_slice(bytes).map_err(|e| MessengerError::Protocol(e.to_string()))
    }

    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::KeyExchange { .. } => "key_exchange",
            Self::EncryptedMessage { .. } => "encrypted_message",
        }
    }
}

mod envelope_json {
    use serde::{self, Deserialize, Deserializer, Serializer};

    use crate::envelope::Envelope;

    pub fn serialize<S>(envelope: &Envelope, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let json = envelope.to_json().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&json)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Envelope, D::Error>
    where
        D: Deserializer<'de>,
    {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(json) => {
                Envelope::from_json(&json).map_err(serde::de::Error::custom)
            }
            value @ serde_json::Value::Object(_) => {
                serde_json::from_value(value).map_err(serde::de::Error::custom)
            }
            _ => Err(serde::de::Error::custom("envelope must be a JSON string or object")),
        }
    }
}
