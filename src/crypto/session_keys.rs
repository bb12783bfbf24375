//! Per-message session keys and their ledger.
//!
//! Every outbound message is sealed under a fresh 256-bit key. The ledger
//! records each key under `(contact, key_id)` in the `session_keys` table
//! before it is handed out, and keeps the most recent keys in a bounded
//! in-memory cache for fast lookup.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::store::{Database, StoreError};

/// Session key size in bytes (AES-256).
pub const SESSION_KEY_SIZE: usize = 32;

/// A 256-bit symmetric key used for exactly one message.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Generates a new random session key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Builds a key from raw bytes; `None` unless exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; SESSION_KEY_SIZE] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

/// Identifier of a session key: 128 random bits as 32 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Generates a fresh random key id.
    pub fn generate() -> Self {
        Self(crate::random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for KeyId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for KeyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Number of recently minted or looked-up keys kept in memory.
pub const LEDGER_CACHE_CAPACITY: usize = 256;

type CacheKey = (String, KeyId);

/// Fixed-capacity key cache; the oldest entry is evicted first.
struct KeyCache {
    keys: HashMap<CacheKey, SessionKey>,
    order: VecDeque<CacheKey>,
    capacity: usize,
}

impl KeyCache {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            keys: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn get(&self, entry: &CacheKey) -> Option<&SessionKey> {
        self.keys.get(entry)
    }

    fn insert(&mut self, entry: CacheKey, key: SessionKey) {
        if self.keys.insert(entry.clone(), key).is_some() {
            return;
        }
        self.order.push_back(entry);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Tracks every session key this identity has minted.
pub struct SessionKeyLedger {
    db: Database,
    cache: Mutex<KeyCache>,
}

impl fmt::Debug for SessionKeyLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyLedger")
            .field("cache", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl SessionKeyLedger {
    pub fn new(db: Database) -> Self {
        Self::with_cache_capacity(db, LEDGER_CACHE_CAPACITY)
    }

    /// Creates a ledger whose cache holds at most `capacity` keys.
    pub fn with_cache_capacity(db: Database, capacity: usize) -> Self {
        Self {
            db,
            cache: Mutex::new(KeyCache::new(capacity)),
        }
    }

    /// Mints a fresh key for `contact`, persisting it before returning.
    ///
    /// If the insert fails the in-memory cache is left unchanged.
    pub fn mint(&self, contact: &str) -> Result<(KeyId, SessionKey), StoreError> {
        let key = SessionKey::generate();
        let key_id = KeyId::generate();
        let encoded = Zeroizing::new(BASE64.encode(key.as_bytes()));
        let now = crate::unix_now();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO session_keys (contact, key_id, key_data, created_at, used)
                 VALUES (?1, ?2, ?3, ?4, FALSE)",
                params![contact, key_id.as_str(), encoded.as_str(), now],
            )
        })?;

        self.cache
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert((contact.to_string(), key_id.clone()), key.clone());

        debug!(contact, key_id = %key_id, "minted session key");
        Ok((key_id, key))
    }

    /// Flags a key as used. Returns whether a row was updated.
    pub fn mark_used(&self, contact: &str, key_id: &KeyId) -> Result<bool, StoreError> {
        let updated = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE session_keys SET used = TRUE WHERE contact = ?1 AND key_id = ?2",
                params![contact, key_id.as_str()],
            )
        })?;
        Ok(updated > 0)
    }

    /// Returns whether a key has been flagged as used, or `None` if unknown.
    pub fn is_used(&self, contact: &str, key_id: &KeyId) -> Result<Option<bool>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT used FROM session_keys WHERE contact = ?1 AND key_id = ?2",
                params![contact, key_id.as_str()],
                |row| row.get::<_, bool>(0),
            )
            .optional()
        })
    }

    /// Finds a minted key, checking the cache before the store.
    pub fn lookup(&self, contact: &str, key_id: &KeyId) -> Result<Option<SessionKey>, StoreError> {
        {
            let cache = self.cache.lock().map_err(|_| StoreError::LockPoisoned)?;
            if let Some(key) = cache.get(&(contact.to_string(), key_id.clone())) {
                return Ok(Some(key.clone()));
            }
        }

        let stored: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT key_data FROM session_keys WHERE contact = ?1 AND key_id = ?2",
                params![contact, key_id.as_str()],
                |row| row.get(0),
            )
            .optional()
        })?;

        let Some(encoded) = stored.map(Zeroizing::new) else {
            return Ok(None);
        };
        let bytes = Zeroizing::new(
            BASE64
                .decode(encoded.as_str())
                .map_err(|e| StoreError::CorruptRow(format!("session key {key_id}: {e}")))?,
        );
        let key = SessionKey::from_slice(&bytes)
            .ok_or_else(|| StoreError::CorruptRow(format!("session key {key_id}: bad length")))?;

        self.cache
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert((contact.to_string(), key_id.clone()), key.clone());
        Ok(Some(key))
    }

    /// Number of keys minted for `contact`.
    pub fn count(&self, contact: &str) -> Result<usize, StoreError> {
        let count: i64 = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM session_keys WHERE contact = ?1",
                params![contact],
                |row| row.get(0),
            )
        })?;
        Ok(count as usize)
    }
}
