//! Key chain for field encryption.
//!
//! Exactly two key generations exist, at indices 1 and 2. Which one is
//! active is recomputed from the default key's expiry on every call, so a
//! long-lived process picks up the flip without restarting. Index 0 is
//! reserved for "stored plaintext" and never maps to key material.

use graph_store::now_ms;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{RepoConfig, RepoError, Result};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

#[derive(Zeroize, ZeroizeOnDrop)]
struct KeyMaterial {
    bytes: [u8; KEY_SIZE],
}

/// Two-generation symmetric key chain (zeroized on drop).
pub struct KeyChain {
    key1: KeyMaterial,
    key2: KeyMaterial,
    default_ix: i16,
    default_expiry_ms: i64,
}

/// The other index of the two-generation pair.
fn other_ix(ix: i16) -> i16 {
    if ix == 1 {
        2
    } else {
        1
    }
}

impl KeyChain {
    pub fn new(config: &RepoConfig) -> Result<Self> {
        if config.default_key_ix != 1 && config.default_key_ix != 2 {
            return Err(RepoError::Config(format!(
                "default key index must be 1 or 2, got {}",
                config.default_key_ix
            )));
        }
        Ok(Self {
            key1: KeyMaterial { bytes: config.key1 },
            key2: KeyMaterial { bytes: config.key2 },
            default_ix: config.default_key_ix,
            default_expiry_ms: config.default_key_expiry_ms,
        })
    }

    /// The configured default key index.
    pub fn default_key_ix(&self) -> i16 {
        self.default_ix
    }

    /// When the default key expires.
    pub fn default_key_expiry_ms(&self) -> i64 {
        self.default_expiry_ms
    }

    /// The index new ciphertexts must be stamped with, right now. The
    /// default key while unexpired, the alternate generation afterwards.
    pub fn active_key_ix(&self) -> i16 {
        self.active_key_ix_at(now_ms())
    }

    pub(crate) fn active_key_ix_at(&self, now_ms: i64) -> i16 {
        if now_ms < self.default_expiry_ms {
            self.default_ix
        } else {
            other_ix(self.default_ix)
        }
    }

    /// The non-active index; records stamped with it are due for rotation.
    pub fn alternate_key_ix(&self) -> i16 {
        other_ix(self.active_key_ix())
    }

    pub(crate) fn key(&self, ix: i16) -> Result<&[u8; KEY_SIZE]> {
        match ix {
            1 => Ok(&self.key1.bytes),
            2 => Ok(&self.key2.bytes),
            0 => Err(RepoError::Integrity(
                "key index 0 marks unencrypted data; no key material exists for it".into(),
            )),
            other => Err(RepoError::Integrity(format!(
                "unknown key index {other} recorded"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(default_ix: i16, expiry_ms: i64) -> RepoConfig {
        RepoConfig {
            key1: [1u8; KEY_SIZE],
            key2: [2u8; KEY_SIZE],
            default_key_ix: default_ix,
            default_key_expiry_ms: expiry_ms,
        }
    }

    #[test]
    fn active_is_default_until_expiry() {
        let chain = KeyChain::new(&config(1, 1_000)).unwrap();
        assert_eq!(chain.active_key_ix_at(999), 1);
        assert_eq!(chain.active_key_ix_at(1_000), 2);
        assert_eq!(chain.active_key_ix_at(5_000), 2);
    }

    #[test]
    fn alternate_is_the_other_generation() {
        let chain = KeyChain::new(&config(2, i64::MAX)).unwrap();
        assert_eq!(chain.active_key_ix(), 2);
        assert_eq!(chain.alternate_key_ix(), 1);
    }

    #[test]
    fn expired_default_flips_active() {
        let chain = KeyChain::new(&config(1, 0)).unwrap();
        assert_eq!(chain.active_key_ix(), 2);
        assert_eq!(chain.alternate_key_ix(), 1);
    }

    #[test]
    fn invalid_default_ix_rejected() {
        assert!(KeyChain::new(&config(0, 0)).is_err());
        assert!(KeyChain::new(&config(3, 0)).is_err());
    }

    #[test]
    fn key_zero_has_no_material() {
        let chain = KeyChain::new(&config(1, i64::MAX)).unwrap();
        assert!(matches!(chain.key(0), Err(RepoError::Integrity(_))));
        assert!(matches!(chain.key(7), Err(RepoError::Integrity(_))));
        assert_eq!(chain.key(1).unwrap(), &[1u8; KEY_SIZE]);
        assert_eq!(chain.key(2).unwrap(), &[2u8; KEY_SIZE]);
    }
}
