// SPDX-License-Identifier: MIT OR Apache-2.0
//! Repository configuration.
//!
//! Key material and rotation parameters are explicit configuration values
//! injected at construction, recomputed from the stored expiry timestamp
//! rather than cached process-wide.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{key::KEY_SIZE, RepoError, Result};

/// Base64 key for index 1.
pub const ENV_KEY_1: &str = "GRAPH_REPO_KEY_1";
/// Base64 key for index 2.
pub const ENV_KEY_2: &str = "GRAPH_REPO_KEY_2";
/// Default key index (1 or 2).
pub const ENV_DEFAULT_KEY_IX: &str = "GRAPH_REPO_DEFAULT_KEY_IX";
/// Unix-millisecond expiry of the default key.
pub const ENV_DEFAULT_KEY_EXPIRY_MS: &str = "GRAPH_REPO_DEFAULT_KEY_EXPIRY_MS";

/// Configuration for the repository's encryption key chain.
#[derive(Clone)]
pub struct RepoConfig {
    pub key1: [u8; KEY_SIZE],
    pub key2: [u8; KEY_SIZE],
    /// Which of the two keys is the default generation (1 or 2).
    pub default_key_ix: i16,
    /// When the default key expires and the active index flips to the
    /// alternate generation.
    pub default_key_expiry_ms: i64,
}

impl RepoConfig {
    /// Load from environment variables. Both keys are required; the default
    /// index falls back to 1 and the expiry to "never".
    pub fn from_env() -> Result<Self> {
        let key1 = decode_key(ENV_KEY_1, &require_env(ENV_KEY_1)?)?;
        let key2 = decode_key(ENV_KEY_2, &require_env(ENV_KEY_2)?)?;
        let default_key_ix = match std::env::var(ENV_DEFAULT_KEY_IX) {
            Ok(val) => val.parse::<i16>().map_err(|e| {
                RepoError::Config(format!("invalid {ENV_DEFAULT_KEY_IX}: {e}"))
            })?,
            Err(_) => 1,
        };
        let default_key_expiry_ms = match std::env::var(ENV_DEFAULT_KEY_EXPIRY_MS) {
            Ok(val) => val.parse::<i64>().map_err(|e| {
                RepoError::Config(format!("invalid {ENV_DEFAULT_KEY_EXPIRY_MS}: {e}"))
            })?,
            Err(_) => i64::MAX,
        };
        Ok(Self {
            key1,
            key2,
            default_key_ix,
            default_key_expiry_ms,
        })
    }

    /// Build a config with explicit keys, default index 1 and no expiry.
    pub fn with_keys(key1: [u8; KEY_SIZE], key2: [u8; KEY_SIZE]) -> Self {
        Self {
            key1,
            key2,
            default_key_ix: 1,
            default_key_expiry_ms: i64::MAX,
        }
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| RepoError::Config(format!("{name} not set")))
}

fn decode_key(name: &str, value: &str) -> Result<[u8; KEY_SIZE]> {
    let decoded = STANDARD
        .decode(value)
        .map_err(|e| RepoError::Config(format!("invalid base64 in {name}: {e}")))?;
    if decoded.len() != KEY_SIZE {
        return Err(RepoError::Config(format!(
            "{name} must decode to {KEY_SIZE} bytes, got {}",
            decoded.len()
        )));
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&decoded);
    Ok(key)
}
