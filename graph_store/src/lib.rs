// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transactional graph store: typed items connected by typed, directed links.
//!
//! The store owns atomicity, optimistic locking and partition-scoped
//! visibility. Every operation takes the caller's role list as its trailing
//! parameter and enforces privileges at this boundary, so no caller-side
//! check can be bypassed. Mutations return a single-character operation code.
//!
//! Field-level encryption is handled by the layer above; the store only
//! carries the record-level encryption flags and key index, and honours the
//! [`FieldWrite::Keep`] sentinel that tells it to leave stored bytes alone.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

mod admin;
mod model;
mod store;
mod tabular;
mod tags;
mod value;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use model::{
    FieldWrite, HistoryEntry, ItemFilter, ItemRecord, ItemTypeRecord, ItemTypeWrite, ItemWrite,
    LinkFilter, LinkRecord, LinkTypeRecord, LinkTypeWrite, LinkWrite, NotifyChange,
    PartitionRecord, PartitionWrite, PrivilegeRecord, PrivilegeWrite, RoleRecord, RoleWrite,
    TagRecord, TagUpdate, TagWrite, TreeData,
};
pub use store::{
    now_ms, Access, MemStore, ADMIN_LEVEL, DEFAULT_MAX_ROWS, INS_PARTITION, REF_PARTITION,
};
pub use tabular::{
    Cell, Column, DataType, SanitizedQuery, TabularData, READ_RELATION, ROLES_PARAM,
};
pub use value::{check_schema, validate_meta, MetaValue};

/// Single-character result of a store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpCode {
    /// A new record was created.
    Insert,
    /// An existing record was modified.
    Update,
    /// A record was removed.
    Delete,
    /// The submitted state matched the stored state.
    NoChange,
    /// Optimistic lock failure: the supplied version is stale, or a
    /// unique constraint (such as a tag label) was violated.
    LockConflict,
}

impl OpCode {
    /// The wire representation used by the store protocol.
    pub fn as_char(self) -> char {
        match self {
            Self::Insert => 'I',
            Self::Update => 'U',
            Self::Delete => 'D',
            Self::NoChange => 'N',
            Self::LockConflict => 'L',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'I' => Some(Self::Insert),
            'U' => Some(Self::Update),
            'D' => Some(Self::Delete),
            'N' => Some(Self::NoChange),
            'L' => Some(Self::LockConflict),
            _ => None,
        }
    }

    /// Insert, Update and Delete mutate stored state; NoChange and
    /// LockConflict do not.
    pub fn is_change(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Error types for store operations.
///
/// Read misses are not errors: gets return `Option` and finds return empty
/// pages. Optimistic-lock failures are reported through [`OpCode`], not here.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// Malformed payload or missing required reference.
    #[error("validation error: {0}")]
    Validation(String),

    /// The role scope has no privilege for the touched partition.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Malformed or unsupported read query.
    #[error("query error: {0}")]
    Query(String),

    /// The store cannot serve the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_code_chars_round_trip() {
        for op in [
            OpCode::Insert,
            OpCode::Update,
            OpCode::Delete,
            OpCode::NoChange,
            OpCode::LockConflict,
        ] {
            assert_eq!(OpCode::from_char(op.as_char()), Some(op));
        }
        assert_eq!(OpCode::from_char('X'), None);
    }

    #[test]
    fn change_classification() {
        assert!(OpCode::Insert.is_change());
        assert!(OpCode::Update.is_change());
        assert!(OpCode::Delete.is_change());
        assert!(!OpCode::NoChange.is_change());
        assert!(!OpCode::LockConflict.is_change());
    }

    #[test]
    fn error_display() {
        let err = StoreError::Authorization("no read privilege on INS".to_string());
        assert_eq!(err.to_string(), "authorization error: no read privilege on INS");
    }
}
