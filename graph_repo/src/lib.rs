// SPDX-License-Identifier: MIT OR Apache-2.0
//! Secure graph repository: a mediating layer between API callers and a
//! transactional graph store.
//!
//! The store owns atomicity and partition scoping; this crate adds the
//! guarantees the store does not provide:
//! - field-level encryption with change detection and non-disruptive key
//!   rotation (two key generations, expiry-driven activation)
//! - uniform role scoping threaded through every operation, with admin
//!   guards on access-control resources
//! - label-based immutable snapshots of subgraphs rooted at an item
//! - a safety-checked ad-hoc read query path
//!
//! Read misses are `None`/empty, never errors. Optimistic-lock outcomes
//! travel through operation codes in [`TxResult`], so the error taxonomy
//! below covers genuine failures only.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

mod admin;
mod config;
mod encryption;
mod key;
mod notify;
mod policy;
mod rbac;
mod registry;
mod repo;
mod result;
mod sanitizer;
mod tags;

use thiserror::Error;

pub use config::{
    RepoConfig, ENV_DEFAULT_KEY_EXPIRY_MS, ENV_DEFAULT_KEY_IX, ENV_KEY_1, ENV_KEY_2,
};
pub use encryption::{FieldCipher, NONCE_SIZE};
pub use key::{KeyChain, KEY_SIZE};
pub use notify::{ChangeEvent, ChangeNotifier, LogNotifier};
pub use policy::{EncryptionPolicy, FieldPlan, StoredFields};
pub use rbac::{Identity, RoleScope, ADMIN_ROLE};
pub use repo::{
    GraphPayload, ItemPayload, LinkPayload, Repository, RotationOutcome,
};
pub use result::{Outcome, TxResult};
pub use sanitizer::{sanitize, READ_TARGET};
pub use tags::{TagPayload, TagUpdatePayload};

pub use admin::{ItemTypePayload, LinkTypePayload, PartitionPayload, PrivilegePayload, RolePayload};

/// Repository error taxonomy.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RepoError {
    /// Malformed payload, failed schema validation or missing required
    /// reference (including "type not found" on writes).
    #[error("validation error: {0}")]
    Validation(String),

    /// The caller's role set lacks the required privilege.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// A mutation addressed a record that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate tag label or equivalent uniqueness violation detected
    /// before the store call.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Decryption failure or inconsistent encryption bookkeeping. Fatal
    /// for the current operation; never silently degraded.
    #[error("data integrity error: {0}")]
    Integrity(String),

    /// Invalid configuration or key material.
    #[error("configuration error: {0}")]
    Config(String),

    /// The store or crypto collaborator cannot serve the operation.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<graph_store::StoreError> for RepoError {
    fn from(err: graph_store::StoreError) -> Self {
        match err {
            graph_store::StoreError::Validation(msg) => Self::Validation(msg),
            graph_store::StoreError::Authorization(msg) => Self::Authorization(msg),
            graph_store::StoreError::Query(msg) => Self::Validation(msg),
            graph_store::StoreError::Unavailable(msg) => Self::Unavailable(msg),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Result type alias for repository operations.
pub type Result<T> = std::result::Result<T, RepoError>;
