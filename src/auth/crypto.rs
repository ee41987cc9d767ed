//! Token encryption at rest
//!
//! Access and refresh tokens are stored AES-256-GCM encrypted. The envelope
//! is `base64(nonce || ciphertext)` with a random 96-bit nonce per
//! encryption. Decryption happens only at the point of use; plaintext
//! tokens are never logged.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::AuthError;

/// AES-GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// Cipher for token storage
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Create a cipher from a raw 32-byte key
    pub fn new(key: &[u8; 32]) -> Self {
        let cipher = Aes256Gcm::new_from_slice(key).expect("32-byte key is always valid");
        Self { cipher }
    }

    /// Create a cipher from a base64-encoded 32-byte key
    pub fn from_base64(key_b64: &str) -> Result<Self, AuthError> {
        let bytes = STANDARD
            .decode(key_b64)
            .map_err(|e| AuthError::Cipher(format!("Invalid key encoding: {}", e)))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AuthError::Cipher("Key must be exactly 32 bytes".to_string()))?;
        Ok(Self::new(&key))
    }

    /// Encrypt a token into a base64 envelope
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AuthError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| AuthError::Cipher(format!("Encryption failed: {}", e)))?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(envelope))
    }

    /// Decrypt a base64 envelope back into the token
    pub fn decrypt(&self, envelope: &str) -> Result<String, AuthError> {
        let bytes = STANDARD
            .decode(envelope)
            .map_err(|e| AuthError::Cipher(format!("Invalid envelope encoding: {}", e)))?;

        if bytes.len() <= NONCE_LEN {
            return Err(AuthError::Cipher("Envelope too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AuthError::Cipher("Decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| AuthError::Cipher("Decrypted token is not UTF-8".to_string()))
    }
}
