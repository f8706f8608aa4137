//! Field-level encryption for citizen identity documents
//!
//! Aadhar and PAN numbers are encrypted at rest with ChaCha20-Poly1305.
//! The 256-bit key is derived from the configured secret with SHA-256;
//! every value gets a fresh random nonce, stored alongside the
//! ciphertext as base64(nonce || ciphertext).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::types::AppError;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Encrypts and decrypts profile fields with a key derived from one
/// configured secret
#[derive(Clone)]
pub struct FieldCipher {
    key: [u8; 32],
}

impl FieldCipher {
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Encrypt a field value for storage
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| AppError::Internal(format!("Encryption failed: {e}")))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(blob))
    }

    /// Decrypt a stored field value
    ///
    /// Fails when the blob is malformed, tampered, or was encrypted
    /// under a different secret.
    pub fn decrypt(&self, stored: &str) -> Result<String, AppError> {
        let blob = BASE64
            .decode(stored)
            .map_err(|e| AppError::Internal(format!("Invalid encrypted field: {e}")))?;

        if blob.len() <= NONCE_LEN {
            return Err(AppError::Internal("Encrypted field too short".to_string()));
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Internal("Failed to decrypt profile field".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| AppError::Internal(format!("Decrypted field not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let cipher = FieldCipher::new("test-secret");
        let stored = cipher.encrypt("1234-5678-9012").unwrap();

        assert_ne!(stored, "1234-5678-9012");
        assert_eq!(cipher.decrypt(&stored).unwrap(), "1234-5678-9012");
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let cipher = FieldCipher::new("test-secret");
        let a = cipher.encrypt("ABCDE1234F").unwrap();
        let b = cipher.encrypt("ABCDE1234F").unwrap();

        // Same plaintext, different blobs
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), cipher.decrypt(&b).unwrap());
    }

    #[test]
    fn wrong_secret_fails() {
        let cipher = FieldCipher::new("secret-a");
        let other = FieldCipher::new("secret-b");

        let stored = cipher.encrypt("1234-5678-9012").unwrap();
        assert!(other.decrypt(&stored).is_err());
    }

    #[test]
    fn tampered_blob_fails() {
        let cipher = FieldCipher::new("test-secret");
        let stored = cipher.encrypt("1234-5678-9012").unwrap();

        let mut blob = BASE64.decode(&stored).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        let tampered = BASE64.encode(blob);

        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn garbage_input_fails() {
        let cipher = FieldCipher::new("test-secret");
        assert!(cipher.decrypt("not base64 at all!").is_err());
        assert!(cipher.decrypt("AAAA").is_err());
    }
}
