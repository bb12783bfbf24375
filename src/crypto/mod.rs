//! Cryptographic operations for Enclave.
//!
//! This module provides:
//! - Identity key generation and persistence (RSA-2048)
//! - Session key wrapping (RSA-OAEP with SHA-256)
//! - Authenticated message encryption (AES-256-GCM)
//! - The session key ledger

pub mod keys;
pub mod session_keys;
pub mod symmetric;

pub use keys::{
    decode_public_key_pem, public_key_fingerprint, validate_username, wrap_session_key, Identity,
    KeyError, KeyMaterial, KeyStore, RSA_KEY_BITS,
};
pub use session_keys::{
    KeyId, SessionKey, SessionKeyLedger, LEDGER_CACHE_CAPACITY, SESSION_KEY_SIZE,
};
pub use symmetric::{generate_nonce, open, seal, SymmetricError, NONCE_SIZE, TAG_SIZE};
