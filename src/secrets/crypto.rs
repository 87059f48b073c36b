//! AES-256-GCM encryption for the file secret store (§3 SecretStore, §4.3).
//!
//! The key is derived by SHA-256 over either the `PTX_ENCRYPTION_KEY`
//! environment variable or a key file's bytes — not a password-based KDF,
//! since the key material here is a pre-shared secret, not a user password.

use crate::error::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;

const NONCE_LEN: usize = 12;

/// Derives the 32-byte AES-256 key from the `PTX_ENCRYPTION_KEY` env var,
/// falling back to `key_file` when the env var is unset.
pub fn derive_key(key_file: Option<&Path>) -> Result<[u8; 32]> {
    let material = match std::env::var("PTX_ENCRYPTION_KEY") {
        Ok(v) => v.into_bytes(),
        Err(_) => {
            let path = key_file.ok_or_else(|| {
                Error::SecretError(
                    "no PTX_ENCRYPTION_KEY set and no key file configured".to_string(),
                )
            })?;
            std::fs::read(path)
                .map_err(|e| Error::SecretError(format!("reading key file: {e}")))?
        }
    };

    let mut hasher = Sha256::new();
    hasher.update(&material);
    Ok(hasher.finalize().into())
}

/// Encrypts `plaintext`, returning `base64(nonce ‖ ciphertext)` (§3).
pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<String> {
    let cipher = Aes256Gcm::new(key.into());
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::SecretError(format!("encryption failed: {e}")))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(combined))
}

/// Decrypts a `base64(nonce ‖ ciphertext)` blob produced by [`encrypt`].
pub fn decrypt(encoded: &str, key: &[u8; 32]) -> Result<Vec<u8>> {
    let combined = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::SecretError(format!("invalid base64: {e}")))?;
    if combined.len() < NONCE_LEN {
        return Err(Error::SecretError("ciphertext too short".to_string()));
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| Error::SecretError(format!("decryption failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"test-material");
        hasher.finalize().into()
    }

    #[test]
    fn round_trip_encrypt_decrypt() {
        let key = test_key();
        let plaintext = b"hunter2";
        let encrypted = encrypt(plaintext, &key).unwrap();
        let decrypted = decrypt(&encrypted, &key).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let key = test_key();
        let mut other_hasher = Sha256::new();
        other_hasher.update(b"different-material");
        let other_key: [u8; 32] = other_hasher.finalize().into();

        let encrypted = encrypt(b"hunter2", &key).unwrap();
        assert!(decrypt(&encrypted, &other_key).is_err());
    }

    #[test]
    fn derive_key_from_env_var() {
        std::env::set_var("PTX_ENCRYPTION_KEY", "env-secret");
        let key = derive_key(None).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(b"env-secret");
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(key, expected);
        std::env::remove_var("PTX_ENCRYPTION_KEY");
    }

    #[test]
    fn derive_key_missing_source_errors() {
        std::env::remove_var("PTX_ENCRYPTION_KEY");
        assert!(derive_key(None).is_err());
    }
}
