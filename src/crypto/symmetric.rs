//! Authenticated symmetric encryption for message bodies.
//!
//! AES-256-GCM with a 96-bit random nonce and a 128-bit tag. The tag is
//! appended to the ciphertext, and associated data is authenticated but not
//! encrypted.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use super::session_keys::SessionKey;

/// Nonce size for AES-GCM.
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size appended to every ciphertext.
pub const TAG_SIZE: usize = 16;

/// Errors that can occur during symmetric encryption.
#[derive(Error, Debug)]
pub enum SymmetricError {
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Authentication failed. Covers wrong key, wrong AAD and any modification.
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid nonce length: expected {NONCE_SIZE}, got {0}")]
    InvalidNonce(usize),

    #[error("Invalid ciphertext: too short")]
    CiphertextTooShort,
}

/// Generates a fresh random nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts `plaintext` under `key`, binding `aad`.
///
/// Returns ciphertext with the tag appended.
pub fn seal(
    key: &SessionKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, SymmetricError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| SymmetricError::EncryptionFailed)?;

    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| SymmetricError::EncryptionFailed)
}

/// Decrypts and authenticates `ciphertext` (tag appended) under `key`.
pub fn open(
    key: &SessionKey,
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, SymmetricError> {
    if nonce.len() != NONCE_SIZE {
        return Err(SymmetricError::InvalidNonce(nonce.len()));
    }
    if ciphertext.len() < TAG_SIZE {
        return Err(SymmetricError::CiphertextTooShort);
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| SymmetricError::DecryptionFailed)?;

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| SymmetricError::DecryptionFailed)
}
