//! Per-identity relational store.
//!
//! One SQLite database holds the `messages`, `contacts` and `session_keys`
//! tables of a single identity. The connection sits behind a mutex so every
//! logical operation is atomic with respect to concurrent callers.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;

/// How long a writer waits for a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sender TEXT NOT NULL,
        recipient TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp REAL NOT NULL,
        message_type TEXT DEFAULT 'text',
        encryption_method TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_messages_pair
        ON messages (sender, recipient, timestamp);

    CREATE TABLE IF NOT EXISTS contacts (
        username TEXT PRIMARY KEY,
        public_key TEXT NOT NULL,
        last_seen REAL NOT NULL,
        trust_level INTEGER DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS session_keys (
        contact TEXT NOT NULL,
        key_id TEXT NOT NULL,
        key_data TEXT NOT NULL,
        created_at REAL NOT NULL,
        used BOOLEAN DEFAULT FALSE,
        PRIMARY KEY (contact, key_id)
    );
";

/// Errors raised by the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Unavailable(#[from] rusqlite::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Shared handle to an identity's database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Opens (or creates) the database file and ensures the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs one logical operation with exclusive access to the connection.
    pub fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(op(&conn)?)
    }
}
