//! The per-identity messenger.
//!
//! A [`Messenger`] owns everything one running identity needs: its keys, the
//! contact registry, the session key ledger and the conversation log. It is
//! constructed once and shared (usually as `Arc<Messenger>`) by the network
//! layer.

use std::fs;
use std::sync::Arc;

use tracing::info;

use crate::config::MessengerConfig;
use crate::contacts::{Contact, ContactRegistry};
use crate::conversation::{ConversationLog, ConversationStats, Message, DEFAULT_MESSAGE_TYPE};
use crate::crypto::{validate_username, Identity, KeyStore, SessionKeyLedger};
use crate::envelope::{DecryptedMessage, Envelope, EnvelopeCodec};
use crate::error::MessengerError;
use crate::protocol::PeerMessage;
use crate::store::Database;

/// One local identity and its state.
#[derive(Debug)]
pub struct Messenger {
    identity: Arc<Identity>,
    contacts: ContactRegistry,
    ledger: SessionKeyLedger,
    log: ConversationLog,
}

impl Messenger {
    /// Opens the messenger for `username` under `config.data_dir`.
    ///
    /// Loads the identity keys (creating them on first use) and the
    /// identity's database.
    pub fn open(config: &MessengerConfig, username: &str) -> Result<Self, MessengerError> {
        validate_username(username)?;
        fs::create_dir_all(&config.data_dir)?;

        let identity = KeyStore::new(&config.data_dir).initialize(username)?;
        let db = Database::open(&config.database_path(username))?;

        info!(
            username,
            fingerprint = %identity.fingerprint(),
            data_dir = %config.data_dir.display(),
            "messenger opened"
        );
        Ok(Self::with_identity(Arc::new(identity), db))
    }

    /// Creates a messenger backed by a private in-memory database.
    pub fn in_memory(identity: Arc<Identity>) -> Result<Self, MessengerError> {
        Ok(Self::with_identity(identity, Database::open_in_memory()?))
    }

    /// Creates a messenger for an existing identity and database.
    pub fn with_identity(identity: Arc<Identity>, db: Database) -> Self {
        let log = ConversationLog::new(db.clone(), identity.username());
        Self {
            contacts: ContactRegistry::new(db.clone()),
            ledger: SessionKeyLedger::new(db),
            log,
            identity,
        }
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    pub fn username(&self) -> &str {
        self.identity.username()
    }

    pub fn contacts(&self) -> &ContactRegistry {
        &self.contacts
    }

    pub fn ledger(&self) -> &SessionKeyLedger {
        &self.ledger
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// Envelope codec bound to this identity.
    pub fn codec(&self) -> EnvelopeCodec<'_> {
        EnvelopeCodec::new(&self.identity, &self.contacts, &self.ledger)
    }

    /// The local public key as SPKI PEM.
    pub fn public_key_pem(&self) -> &str {
        self.identity.export_public_key()
    }

    /// The key exchange message announcing this identity.
    pub fn key_exchange_message(&self) -> PeerMessage {
        PeerMessage::KeyExchange {
            username: self.username().to_string(),
            public_key: self.public_key_pem().to_string(),
        }
    }

    /// Records a peer's public key, resetting its trust level.
    pub fn add_contact(&self, username: &str, public_key_pem: &str) -> Result<Contact, MessengerError> {
        validate_username(username)?;
        Ok(self.contacts.upsert(username, public_key_pem, 0)?)
    }

    /// Seals `plaintext` for `recipient` without touching the log.
    pub fn encrypt_for(&self, recipient: &str, plaintext: &str) -> Result<Envelope, MessengerError> {
        self.codec().encrypt(recipient, plaintext)
    }

    /// Opens an envelope without touching the log.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<DecryptedMessage, MessengerError> {
        self.codec().decrypt(envelope)
    }

    /// Outbound flow: encrypts, logs the plaintext as sent, and returns the
    /// wire message to transmit.
    pub fn prepare_outbound(
        &self,
        recipient: &str,
        plaintext: &str,
    ) -> Result<PeerMessage, MessengerError> {
        let envelope = self.encrypt_for(recipient, plaintext)?;
        self.log
            .append(self.username(), recipient, plaintext, DEFAULT_MESSAGE_TYPE)?;

        Ok(PeerMessage::EncryptedMessage {
            content: envelope,
            recipient: Some(recipient.to_string()),
        })
    }

    /// Inbound flow: decrypts and logs the message as received.
    ///
    /// Nothing is logged if decryption fails.
    pub fn receive_envelope(&self, envelope: &Envelope) -> Result<DecryptedMessage, MessengerError> {
        let message = self.decrypt(envelope)?;
        self.log.append(
            &message.sender,
            self.username(),
            &message.plaintext,
            DEFAULT_MESSAGE_TYPE,
        )?;
        Ok(message)
    }

    /// Most recent messages exchanged with `contact`, oldest first.
    pub fn history(&self, contact: &str, limit: usize) -> Result<Vec<Message>, MessengerError> {
        Ok(self.log.history(contact, limit)?)
    }

    pub fn stats(&self) -> Result<ConversationStats, MessengerError> {
        Ok(self.log.stats()?)
    }
}
