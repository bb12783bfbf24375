//! Messenger error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::contacts::ContactsError;
use crate::crypto::KeyError;
use crate::store::StoreError;

/// Errors that can occur during messenger operations.
#[derive(Error, Debug)]
pub enum MessengerError {
    /// Identity key material could not be created, loaded or used.
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Contact registry failure.
    #[error("Contacts error: {0}")]
    Contacts(#[from] ContactsError),

    /// Persistence layer failure. In-memory state is left untouched.
    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),

    /// No public key on file for the recipient.
    #[error("Unknown recipient: {0} (exchange keys first)")]
    UnknownRecipient(String),

    /// The wrapped session key was not produced for this identity.
    #[error("Failed to unwrap session key")]
    UnwrapFailed,

    /// AEAD authentication failed.
    #[error("Message was tampered with or sealed under a different key")]
    TamperedOrWrongKey,

    /// Envelope could not be parsed.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A frame arrived that is not a valid peer message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport failure (framing violation, connect/bind error, closed peer).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration could not be loaded or saved.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MessengerError {
    /// Returns true for cryptographic verification failures.
    pub fn is_crypto_failure(&self) -> bool {
        matches!(
            self,
            Self::UnwrapFailed | Self::TamperedOrWrongKey | Self::MalformedEnvelope(_)
        )
    }

    /// Returns true if the persistence layer failed, whichever component
    /// surfaced it. The operation can be retried.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::Contacts(ContactsError::Store(_))
        )
    }

    /// Returns true if a connection must be torn down after this error.
    ///
    /// Only stream-level failures qualify; a bad message inside a well-formed
    /// frame leaves the stream in sync.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_failures_are_not_fatal() {
        for err in [
            MessengerError::UnwrapFailed,
            MessengerError::TamperedOrWrongKey,
            MessengerError::MalformedEnvelope("bad base64".to_string()),
        ] {
            assert!(err.is_crypto_failure());
            assert!(!err.is_connection_fatal());
        }
    }

    #[test]
    fn test_transport_errors_are_fatal() {
        assert!(MessengerError::Transport("frame too large".to_string()).is_connection_fatal());
        assert!(!MessengerError::Protocol("unknown type".to_string()).is_connection_fatal());
        assert!(!MessengerError::UnknownRecipient("carol".to_string()).is_crypto_failure());
    }

    #[test]
    fn test_store_failures_from_any_component() {
        let from_log = MessengerError::from(StoreError::LockPoisoned);
        let from_registry = MessengerError::from(ContactsError::Store(StoreError::LockPoisoned));

        assert!(from_log.is_store_unavailable());
        assert!(from_registry.is_store_unavailable());
        assert!(!MessengerError::from(ContactsError::NotFound("carol".to_string()))
            .is_store_unavailable());
        assert!(!MessengerError::TamperedOrWrongKey.is_store_unavailable());
    }
}
