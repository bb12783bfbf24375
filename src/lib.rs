//! # Enclave - peer-to-peer encrypted messaging
//!
//! Enclave lets independent processes exchange end-to-end encrypted messages
//! without a trusted server. Peers find each other on the LAN, swap long-term
//! public keys, and then send self-describing hybrid-encryption envelopes.
//!
//! ## Overview
//!
//! - Every identity owns an RSA-2048 key pair persisted on first use
//! - Each outbound message gets a **fresh 256-bit session key**
//! - The message is sealed with **AES-256-GCM**; sender metadata is bound as AAD
//! - The session key is wrapped with the recipient's public key (**RSA-OAEP/SHA-256**)
//! - Contacts, session keys and the conversation log live in a per-identity SQLite file
//!
//! ## Security Model
//!
//! - **Tamper evident**: any bit flip in an envelope fails decryption, never yields garbage
//! - **Opaque failures**: unwrap and authentication errors do not reveal which step failed
//! - **Trust on first use**: a key exchange is accepted from whoever claims a username
//! - **No forward secrecy**: session keys are wrapped with the static long-term key,
//!   so a compromised private key exposes every session key ever sent to it
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use enclave::crypto::{Identity, KeyMaterial};
//! use enclave::Messenger;
//!
//! let alice = Messenger::in_memory(Arc::new(Identity::new("alice", KeyMaterial::generate()?)))?;
//! let bob = Messenger::in_memory(Arc::new(Identity::new("bob", KeyMaterial::generate()?)))?;
//!
//! alice.add_contact("bob", bob.public_key_pem())?;
//!
//! let envelope = alice.encrypt_for("bob", "hello")?;
//! let received = bob.decrypt(&envelope)?;
//! assert_eq!(received.plaintext, "hello");
//! assert_eq!(received.sender, "alice");
//! # Ok::<(), enclave::MessengerError>(())
//! ```
//!
//! ## Modules
//!
//! - [`crypto`]: identity keys, AEAD primitives, session key ledger
//! - [`contacts`]: contact registry
//! - [`conversation`]: conversation log
//! - [`envelope`]: hybrid-encryption envelope codec
//! - [`protocol`]: peer wire messages, dispatch and LAN discovery
//! - [`transport`]: length-prefixed framing and TCP connections
//! - [`node`]: connection management on top of the transport

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

pub mod config;
pub mod contacts;
pub mod conversation;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod messenger;
pub mod node;
pub mod protocol;
pub mod store;
pub mod transport;

// Re-export commonly used types at the crate root
pub use config::MessengerConfig;
pub use contacts::{Contact, ContactRegistry, ContactsError};
pub use conversation::{ConversationLog, ConversationStats, Message};
pub use crypto::{Identity, KeyError, KeyMaterial, KeyStore, SessionKey, SessionKeyLedger};
pub use envelope::{DecryptedMessage, Envelope, EnvelopeCodec, EnvelopeMetadata};
pub use error::MessengerError;
pub use messenger::Messenger;
pub use node::{Node, NodeEvent};
pub use protocol::{DiscoveredPeer, DiscoveryDatagram, PeerMessage};
pub use store::{Database, StoreError};

/// Length in bytes of randomly generated identifiers (key ids, message ids).
pub const RANDOM_ID_LEN: usize = 16;

/// Current time as fractional Unix seconds.
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Generates a random 128-bit identifier rendered as 32 hex characters.
pub(crate) fn random_id() -> String {
    let mut bytes = [0u8; RANDOM_ID_LEN];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
