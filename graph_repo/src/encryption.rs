// SPDX-License-Identifier: MIT OR Apache-2.0
//! AES-256-GCM field encryption.
//!
//! Every call draws a fresh random nonce, so encrypting the same plaintext
//! twice yields different ciphertexts; change detection upstream compares
//! decrypted values, never ciphertexts. Stored values are framed as
//! base64(nonce ‖ ciphertext).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

use crate::{key::KeyChain, RepoError, Result};

/// 12-byte nonce for AES-GCM (96 bits is the standard).
pub const NONCE_SIZE: usize = 12;

/// Field cipher over the two-generation key chain.
pub struct FieldCipher {
    chain: KeyChain,
}

impl FieldCipher {
    pub fn new(chain: KeyChain) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &KeyChain {
        &self.chain
    }

    /// Encrypt a field value under the key at `key_ix`.
    pub fn encrypt(&self, plaintext: &str, key_ix: i16) -> Result<String> {
        let key = self.chain.key(key_ix)?;
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| RepoError::Config(format!("invalid key material: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| RepoError::Config(format!("encryption failed: {e}")))?;

        let mut framed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(framed))
    }

    /// Decrypt a stored field value with the key index recorded on the
    /// record. Any failure is a data-integrity error; ciphertext is never
    /// returned as plaintext.
    pub fn decrypt(&self, encoded: &str, key_ix: i16) -> Result<String> {
        let framed = STANDARD.decode(encoded).map_err(|e| {
            RepoError::Integrity(format!("stored ciphertext is not valid base64: {e}"))
        })?;
        if framed.len() < NONCE_SIZE {
            return Err(RepoError::Integrity(format!(
                "stored ciphertext too short: {} bytes",
                framed.len()
            )));
        }
        let (nonce_bytes, ciphertext) = framed.split_at(NONCE_SIZE);
        let key = self.chain.key(key_ix)?;
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| RepoError::Config(format!("invalid key material: {e}")))?;
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                RepoError::Integrity(format!(
                    "decryption failed under key index {key_ix}; ciphertext corrupt or wrong key recorded"
                ))
            })?;
        String::from_utf8(plain)
            .map_err(|e| RepoError::Integrity(format!("decrypted bytes are not UTF-8: {e}")))
    }
}
