//! Conversation log.
//!
//! Append-only record of every message this identity sent or received, kept
//! in the `messages` table. Records are never updated or deleted.

use rusqlite::{params, Row};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::store::{Database, StoreError};

/// Message type recorded when none is given.
pub const DEFAULT_MESSAGE_TYPE: &str = "text";

/// Encryption method label for envelope-protected messages.
pub const ENCRYPTION_METHOD_HYBRID: &str = "hybrid";

/// A stored message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub sender: String,
    pub recipient: String,
    pub content: String,
    /// Unix seconds when the record was appended.
    pub timestamp: f64,
    pub message_type: String,
    pub encryption_method: String,
}

impl Message {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender: row.get(1)?,
            recipient: row.get(2)?,
            content: row.get(3)?,
            timestamp: row.get(4)?,
            message_type: row
                .get::<_, Option<String>>(5)?
                .unwrap_or_else(|| DEFAULT_MESSAGE_TYPE.to_string()),
            encryption_method: row.get(6)?,
        })
    }
}

/// Aggregate counts over the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConversationStats {
    pub total: u64,
    pub sent: u64,
    pub received: u64,
    /// Distinct senders other than the local identity.
    pub unique_contacts: u64,
}

/// The conversation log of one local identity.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    db: Database,
    local: String,
}

impl ConversationLog {
    pub fn new(db: Database, local: impl Into<String>) -> Self {
        Self {
            db,
            local: local.into(),
        }
    }

    /// Appends a message stamped with the current time.
    pub fn append(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
        message_type: &str,
    ) -> Result<Message, StoreError> {
        let timestamp = crate::unix_now();

        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender, recipient, content, timestamp, message_type, encryption_method)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    sender,
                    recipient,
                    content,
                    timestamp,
                    message_type,
                    ENCRYPTION_METHOD_HYBRID
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!(id, sender, recipient, "message appended");
        Ok(Message {
            id,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            content: content.to_string(),
            timestamp,
            message_type: message_type.to_string(),
            encryption_method: ENCRYPTION_METHOD_HYBRID.to_string(),
        })
    }

    /// Returns up to `limit` of the most recent messages exchanged with
    /// `contact`, oldest first.
    pub fn history(&self, contact: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut messages = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender, recipient, content, timestamp, message_type, encryption_method
                 FROM messages
                 WHERE (sender = ?1 AND recipient = ?2) OR (sender = ?2 AND recipient = ?1)
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![self.local, contact, limit], Message::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        messages.reverse();
        Ok(messages)
    }

    /// Counts messages sent, received and distinct correspondents.
    pub fn stats(&self) -> Result<ConversationStats, StoreError> {
        let (total, sent, received, unique_contacts) = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(sender = ?1), 0),
                    COALESCE(SUM(recipient = ?1), 0),
                    COUNT(DISTINCT CASE WHEN sender != ?1 THEN sender END)
                 FROM messages",
                params![self.local],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
        })?;

        Ok(ConversationStats {
            total: total as u64,
            sent: sent as u64,
            received: received as u64,
            unique_contacts: unique_contacts as u64,
        })
    }
}

/// SHA-256 of `content` as lowercase hex.
pub fn message_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Checks `content` against a digest produced by [`message_digest`].
pub fn verify_digest(content: &str, expected: &str) -> bool {
    message_digest(content).eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> ConversationLog {
        ConversationLog::new(Database::open_in_memory().unwrap(), "alice")
    }

    #[test]
    fn test_append_returns_record() {
        let log = log();
        let message = log.append("alice", "bob", "hi", DEFAULT_MESSAGE_TYPE).unwrap();

        assert!(message.id > 0);
        assert_eq!(message.encryption_method, "hybrid");
        assert_eq!(message.message_type, "text");
        assert_eq!(log.history("bob", 10).unwrap(), vec![message]);
    }

    #[test]
    fn test_history_both_directions_ascending() {
        let log = log();
        log.append("alice", "bob", "one", DEFAULT_MESSAGE_TYPE).unwrap();
        log.append("bob", "alice", "two", DEFAULT_MESSAGE_TYPE).unwrap();
        log.append("alice", "carol", "other", DEFAULT_MESSAGE_TYPE).unwrap();
        log.append("alice", "bob", "three", DEFAULT_MESSAGE_TYPE).unwrap();

        let contents: Vec<_> = log
            .history("bob", 10)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_history_limit_keeps_most_recent() {
        let log = log();
        for i in 0..5 {
            log.append("alice", "bob", &format!("msg {i}"), DEFAULT_MESSAGE_TYPE)
                .unwrap();
        }

        let contents: Vec<_> = log
            .history("bob", 2)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["msg 3", "msg 4"]);
        assert!(log.history("bob", 0).unwrap().is_empty());
        assert!(log.history("nobody", 10).unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let log = log();
        assert_eq!(log.stats().unwrap(), ConversationStats::default());

        log.append("alice", "bob", "a", DEFAULT_MESSAGE_TYPE).unwrap();
        log.append("bob", "alice", "b", DEFAULT_MESSAGE_TYPE).unwrap();
        log.append("carol", "alice", "c", DEFAULT_MESSAGE_TYPE).unwrap();
        log.append("bob", "alice", "d", DEFAULT_MESSAGE_TYPE).unwrap();

        let stats = log.stats().unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.received, 3);
        assert_eq!(stats.unique_contacts, 2);
    }

    #[test]
    fn test_message_digest() {
        let digest = message_digest("hello");
        assert_eq!(
            digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(verify_digest("hello", &digest));
        assert!(verify_digest("hello", &digest.to_uppercase()));
        assert!(!verify_digest("hello!", &digest));
    }
}
