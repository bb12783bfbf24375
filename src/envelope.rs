//! Hybrid-encryption envelopes.
//!
//! ## Format
//!
//! ```json
//! {
//!   "key_id": "<32 hex chars>",
//!   "encrypted_key": "<base64 RSA-OAEP(session key)>",
//!   "nonce": "<base64 96-bit nonce>",
//!   "ciphertext": "<base64 AES-256-GCM ciphertext || tag>",
//!   "metadata": "<base64 JSON {sender, timestamp, message_id}>"
//! }
//! ```
//!
//! The metadata bytes are the AEAD associated data, so they are authenticated
//! exactly as transmitted. Nothing in the metadata is trusted until the
//! ciphertext has been opened.

use serde::{Deserialize, Serialize};

use crate::contacts::ContactRegistry;
use crate::crypto::{generate_nonce, open, seal, wrap_session_key, Identity, KeyId, SessionKeyLedger};
use crate::error::MessengerError;

/// Sender metadata bound to the ciphertext as associated data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub sender: String,
    /// Unix seconds at encryption time.
    pub timestamp: f64,
    pub message_id: String,
}

/// A sealed message addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub key_id: KeyId,
    #[serde(with = "base64_serde")]
    pub encrypted_key: Vec<u8>,
    #[serde(with = "base64_serde")]
    pub nonce: Vec<u8>,
    #[serde(with = "base64_serde")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_serde")]
    pub metadata: Vec<u8>,
}

impl Envelope {
    /// Serializes to the JSON wire form.
    pub fn to_json(&self) -> Result<String, MessengerError> {
        serde_json::to_string(self).map_err(|e| MessengerError::MalformedEnvelope(e.to_string()))
    }

    /// Parses the JSON wire form. Bad JSON, missing fields or bad base64
    /// are all `MalformedEnvelope`.
    pub fn from_json(json: &str) -> Result<Self, MessengerError> {
        serde_json::from_str(json).map_err(|e| MessengerError::MalformedEnvelope(e.to_string()))
    }

    /// The sender metadata as claimed by the envelope.
    ///
    /// Unauthenticated: only use it for display before decryption.
    pub fn claimed_metadata(&self) -> Result<EnvelopeMetadata, MessengerError> {
        serde_json::from_slice(&self.metadata)
            .map_err(|e| MessengerError::MalformedEnvelope(format!("metadata: {e}")))
    }
}

/// Result of a successful decryption.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedMessage {
    pub plaintext: String,
    pub sender: String,
    pub timestamp: f64,
    pub message_id: String,
}

/// Encrypts and decrypts envelopes for one local identity.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec<'a> {
    identity: &'a Identity,
    contacts: &'a ContactRegistry,
    ledger: &'a SessionKeyLedger,
}

impl<'a> EnvelopeCodec<'a> {
    pub fn new(
        identity: &'a Identity,
        contacts: &'a ContactRegistry,
        ledger: &'a SessionKeyLedger,
    ) -> Self {
        Self {
            identity,
            contacts,
            ledger,
        }
    }

    /// Seals `plaintext` for `recipient` under a freshly minted session key.
    ///
    /// The key is minted before the recipient is looked up, so an
    /// `UnknownRecipient` failure still leaves a ledger entry behind.
    pub fn encrypt(&self, recipient: &str, plaintext: &str) -> Result<Envelope, MessengerError> {
        let (key_id, session_key) = self.ledger.mint(recipient)?;

        let recipient_key = self
            .contacts
            .lookup_public_key(recipient)?
            .ok_or_else(|| MessengerError::UnknownRecipient(recipient.to_string()))?;

        let metadata = EnvelopeMetadata {
            sender: self.identity.username().to_string(),
            timestamp: crate::unix_now(),
            message_id: crate::random_id(),
        };
        let metadata = serde_json::to_vec(&metadata)
            .map_err(|e| MessengerError::MalformedEnvelope(e.to_string()))?;

        let nonce = generate_nonce();
        let ciphertext = seal(&session_key, &nonce, plaintext.as_bytes(), &metadata)
            .map_err(|e| MessengerError::MalformedEnvelope(e.to_string()))?;
        let encrypted_key = wrap_session_key(&recipient_key, &session_key)?;

        Ok(Envelope {
            key_id,
            encrypted_key,
            nonce: nonce.to_vec(),
            ciphertext,
            metadata,
        })
    }

    /// Opens an envelope addressed to the local identity.
    ///
    /// Either the whole message is returned or an error; never partial
    /// plaintext.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<DecryptedMessage, MessengerError> {
        let session_key = self
            .identity
            .unwrap_session_key(&envelope.encrypted_key)
            .map_err(|_| MessengerError::UnwrapFailed)?;

        let plaintext = open(
            &session_key,
            &envelope.nonce,
            &envelope.ciphertext,
            &envelope.metadata,
        )
        .map_err(|_| MessengerError::TamperedOrWrongKey)?;

        let plaintext = String::from_utf8(plaintext)
            .map_err(|_| MessengerError::MalformedEnvelope("plaintext is not UTF-8".to_string()))?;
        let metadata: EnvelopeMetadata = serde_json::from_slice(&envelope.metadata)
            .map_err(|e| MessengerError::MalformedEnvelope(format!("metadata: {e}")))?;

        Ok(DecryptedMessage {
            plaintext,
            sender: metadata.sender,
            timestamp: metadata.timestamp,
            message_id: metadata.message_id,
        })
    }
}

mod base64_serde {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyMaterial;
    use crate::store::Database;

    struct Party {
        identity: Identity,
        contacts: ContactRegistry,
        ledger: SessionKeyLedger,
    }

    impl Party {
        fn new(name: &str) -> Self {
            let db = Database::open_in_memory().unwrap();
            Self {
                identity: Identity::new(name, KeyMaterial::generate().unwrap()),
                contacts: ContactRegistry::new(db.clone()),
                ledger: SessionKeyLedger::new(db),
            }
        }

        fn codec(&self) -> EnvelopeCodec<'_> {
            EnvelopeCodec::new(&self.identity, &self.contacts, &self.ledger)
        }

        fn knows(&self, other: &Party) {
            self.contacts
                .upsert(other.identity.username(), other.identity.export_public_key(), 0)
                .unwrap();
        }
    }

    fn alice_and_bob() -> (Party, Party) {
        let alice = Party::new("alice");
        let bob = Party::new("bob");
        alice.knows(&bob);
        bob.knows(&alice);
        (alice, bob)
    }

    #[test]
    fn test_roundtrip() {
        let (alice, bob) = alice_and_bob();

        let before = crate::unix_now();
        let envelope = alice.codec().encrypt("bob", "Hello Bob! 👋").unwrap();
        let after = crate::unix_now();
        let message = bob.codec().decrypt(&envelope).unwrap();

        assert_eq!(message.plaintext, "Hello Bob! 👋");
        assert_eq!(message.sender, "alice");
        assert_eq!(message.message_id.len(), 32);
        // JSON float parsing may be off by an ulp
        assert!(message.timestamp >= before - 1e-3, "{} < {}", message.timestamp, before);
        assert!(message.timestamp <= after + 1e-3, "{} > {}", message.timestamp, after);
        assert_eq!(envelope.nonce.len(), 12);
        assert_eq!(alice.ledger.count("bob").unwrap(), 1);
    }

    #[test]
    fn test_empty_plaintext() {
        let (alice, bob) = alice_and_bob();
        let envelope = alice.codec().encrypt("bob", "").unwrap();
        assert_eq!(bob.codec().decrypt(&envelope).unwrap().plaintext, "");
    }

    #[test]
    fn test_json_roundtrip() {
        let (alice, bob) = alice_and_bob();
        let envelope = alice.codec().encrypt("bob", "over the wire").unwrap();

        let json = envelope.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        for field in ["key_id", "encrypted_key", "nonce", "ciphertext", "metadata"] {
            assert!(value[field].is_string(), "missing {field}");
        }

        let parsed = Envelope::from_json(&json).unwrap();
        assert_eq!(parsed, envelope);
        assert_eq!(parsed.claimed_metadata().unwrap().sender, "alice");
        assert_eq!(bob.codec().decrypt(&parsed).unwrap().plaintext, "over the wire");
    }

    #[test]
    fn test_each_envelope_is_unique() {
        let (alice, _bob) = alice_and_bob();
        let first = alice.codec().encrypt("bob", "same").unwrap();
        let second = alice.codec().encrypt("bob", "same").unwrap();

        assert_ne!(first.key_id, second.key_id);
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_unknown_recipient() {
        let alice = Party::new("alice");

        let result = alice.codec().encrypt("carol", "hi");
        assert!(matches!(result, Err(MessengerError::UnknownRecipient(ref r)) if r == "carol"));
        // Key is minted before the lookup
        assert_eq!(alice.ledger.count("carol").unwrap(), 1);
    }

    #[test]
    fn test_wrong_recipient_cannot_unwrap() {
        let (alice, _bob) = alice_and_bob();
        let eve = Party::new("eve");

        let envelope = alice.codec().encrypt("bob", "secret").unwrap();
        assert!(matches!(
            eve.codec().decrypt(&envelope),
            Err(MessengerError::UnwrapFailed)
        ));
    }

    #[test]
    fn test_tampered_encrypted_key() {
        let (alice, bob) = alice_and_bob();
        let mut envelope = alice.codec().encrypt("bob", "secret").unwrap();
        envelope.encrypted_key[10] ^= 0x01;

        assert!(matches!(
            bob.codec().decrypt(&envelope),
            Err(MessengerError::UnwrapFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let (alice, bob) = alice_and_bob();
        let mut envelope = alice.codec().encrypt("bob", "secret").unwrap();
        envelope.ciphertext[0] ^= 0x80;

        assert!(matches!(
            bob.codec().decrypt(&envelope),
            Err(MessengerError::TamperedOrWrongKey)
        ));
    }

    #[test]
    fn test_tampered_nonce() {
        let (alice, bob) = alice_and_bob();
        let mut envelope = alice.codec().encrypt("bob", "secret").unwrap();
        envelope.nonce[3] ^= 0x01;
        assert!(matches!(
            bob.codec().decrypt(&envelope),
            Err(MessengerError::TamperedOrWrongKey)
        ));

        envelope.nonce.truncate(8);
        assert!(matches!(
            bob.codec().decrypt(&envelope),
            Err(MessengerError::TamperedOrWrongKey)
        ));
    }

    #[test]
    fn test_tampered_metadata() {
        let (alice, bob) = alice_and_bob();
        let mut envelope = alice.codec().encrypt("bob", "secret").unwrap();

        // Claim a different sender
        let mut claimed = envelope.claimed_metadata().unwrap();
        claimed.sender = "mallory".to_string();
        envelope.metadata = serde_json::to_vec(&claimed).unwrap();

        assert!(matches!(
            bob.codec().decrypt(&envelope),
            Err(MessengerError::TamperedOrWrongKey)
        ));
    }

    #[test]
    fn test_key_id_is_not_authenticated() {
        let (alice, bob) = alice_and_bob();
        let mut envelope = alice.codec().encrypt("bob", "secret").unwrap();
        envelope.key_id = KeyId::from("00000000000000000000000000000000");

        assert_eq!(bob.codec().decrypt(&envelope).unwrap().plaintext, "secret");
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            Envelope::from_json("{\"key_id\": 1}"),
            Err(MessengerError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            Envelope::from_json(
                r#"{"key_id":"a","encrypted_key":"!!","nonce":"","ciphertext":"","metadata":""}"#
            ),
            Err(MessengerError::MalformedEnvelope(_))
        ));
    }
}
