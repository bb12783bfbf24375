//! Inbound peer message handling.

use tracing::{debug, info};

use crate::contacts::Contact;
use crate::envelope::DecryptedMessage;
use crate::error::MessengerError;
use crate::messenger::Messenger;
use crate::protocol::PeerMessage;

/// What happened as a result of handling one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A key exchange was accepted and the contact stored.
    ContactUpdated(Contact),
    /// An envelope was opened and logged.
    MessageReceived(DecryptedMessage),
}

/// Outcome of [`dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct HandleOutcome {
    /// Message to send back on the same connection, if any.
    pub reply: Option<PeerMessage>,
    pub event: PeerEvent,
}

/// Applies one inbound message to the messenger.
///
/// A key exchange upserts the contact and always yields our own key exchange
/// as the reply; the connection layer decides whether to send it. An
/// encrypted message is decrypted and logged, with no reply.
pub fn dispatch(messenger: &Messenger, message: PeerMessage) -> Result<HandleOutcome, MessengerError> {
    match message {
        PeerMessage::KeyExchange {
            username,
            public_key,
        } => {
            let contact = messenger.add_contact(&username, &public_key)?;
            info!(username = %contact.username, "accepted key exchange");
            Ok(HandleOutcome {
                reply: Some(messenger.key_exchange_message()),
                event: PeerEvent::ContactUpdated(contact),
            })
        }
        PeerMessage::EncryptedMessage { content, recipient } => {
            if let Some(recipient) = recipient.as_deref() {
                if recipient != messenger.username() {
                    debug!(recipient, "envelope routed to another username, trying anyway");
                }
            }
            let received = messenger.receive_envelope(&content)?;
            debug!(sender = %received.sender, message_id = %received.message_id, "message received");
            Ok(HandleOutcome {
                reply: None,
                event: PeerEvent::MessageReceived(received),
            })
        }
    }
}
