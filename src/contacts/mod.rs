//! Contact management for Enclave.
//!
//! Contacts are peers whose public keys arrived through a key exchange (or
//! were added by hand). They live in the `contacts` table of the identity's
//! database. A contact is never deleted by the core; a later key exchange for
//! the same username replaces the stored key.

use rsa::RsaPublicKey;
use rusqlite::{params, OptionalExtension, Row};
use thiserror::Error;
use tracing::info;

use crate::crypto::{decode_public_key_pem, public_key_fingerprint};
use crate::store::{Database, StoreError};

/// Errors that can occur when managing contacts.
#[derive(Error, Debug)]
pub enum ContactsError {
    #[error("Contact not found: {0}")]
    NotFound(String),

    #[error("Invalid public key for {0}")]
    InvalidPublicKey(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// A known peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub username: String,

    /// SPKI PEM as received.
    pub public_key: String,

    /// Unix seconds of the last key exchange.
    pub last_seen: f64,

    /// Advisory annotation. Nothing in the core acts on it.
    pub trust_level: i64,
}

impl Contact {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            username: row.get(0)?,
            public_key: row.get(1)?,
            last_seen: row.get(2)?,
            trust_level: row.get(3)?,
        })
    }

    /// Hex fingerprint of the stored key, or `None` if it no longer parses.
    pub fn fingerprint(&self) -> Option<String> {
        decode_public_key_pem(&self.public_key)
            .ok()
            .map(|key| public_key_fingerprint(&key))
    }
}

/// Registry of contacts backed by the identity database.
#[derive(Debug, Clone)]
pub struct ContactRegistry {
    db: Database,
}

impl ContactRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts or replaces a contact, stamping `last_seen` with now.
    ///
    /// The key is parsed first; an unparsable key leaves the registry untouched.
    /// Replacing an existing contact also replaces its trust level.
    pub fn upsert(
        &self,
        username: &str,
        public_key_pem: &str,
        trust_level: i64,
    ) -> Result<Contact, ContactsError> {
        let key = decode_public_key_pem(public_key_pem)
            .map_err(|_| ContactsError::InvalidPublicKey(username.to_string()))?;

        let contact = Contact {
            username: username.to_string(),
            public_key: public_key_pem.to_string(),
            last_seen: crate::unix_now(),
            trust_level,
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO contacts (username, public_key, last_seen, trust_level)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    contact.username,
                    contact.public_key,
                    contact.last_seen,
                    contact.trust_level
                ],
            )
        })?;

        info!(
            username,
            fingerprint = %public_key_fingerprint(&key),
            "contact updated"
        );
        Ok(contact)
    }

    /// Returns the parsed public key of `username`, if known.
    pub fn lookup_public_key(&self, username: &str) -> Result<Option<RsaPublicKey>, ContactsError> {
        let Some(contact) = self.get(username)? else {
            return Ok(None);
        };
        let key = decode_public_key_pem(&contact.public_key).map_err(|_| {
            StoreError::CorruptRow(format!("public key of contact {username}"))
        })?;
        Ok(Some(key))
    }

    /// Sets the advisory trust level of an existing contact.
    pub fn set_trust(&self, username: &str, level: i64) -> Result<(), ContactsError> {
        let updated = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE contacts SET trust_level = ?1 WHERE username = ?2",
                params![level, username],
            )
        })?;

        if updated == 0 {
            return Err(ContactsError::NotFound(username.to_string()));
        }
        Ok(())
    }

    /// Get a contact by username.
    pub fn get(&self, username: &str) -> Result<Option<Contact>, ContactsError> {
        Ok(self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT username, public_key, last_seen, trust_level
                 FROM contacts WHERE username = ?1",
                params![username],
                Contact::from_row,
            )
            .optional()
        })?)
    }

    /// List all contacts sorted by username.
    pub fn list(&self) -> Result<Vec<Contact>, ContactsError> {
        Ok(self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username, public_key, last_seen, trust_level
                 FROM contacts ORDER BY username",
            )?;
            let rows = stmt.query_map([], Contact::from_row)?;
            rows.collect()
        })?)
    }

    /// Get the number of contacts.
    pub fn len(&self) -> Result<usize, ContactsError> {
        let count: i64 = self
            .db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM contacts", [], |r| r.get(0)))?;
        Ok(count as usize)
    }

    /// Check if there are no contacts.
    pub fn is_empty(&self) -> Result<bool, ContactsError> {
        Ok(self.len()? == 0)
    }
}
