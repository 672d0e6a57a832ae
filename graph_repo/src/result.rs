// SPDX-License-Identifier: MIT OR Apache-2.0
//! Result protocol for mutating operations.

use graph_store::OpCode;
use serde::{Deserialize, Serialize};

/// Outcome classification for status-code mapping at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Changed with an Insert.
    Created,
    /// Changed with an Update/Delete, or an honest no-op.
    Succeeded,
    /// Optimistic-lock conflict; nothing was overwritten.
    Conflict,
    /// The operation failed; see the message.
    Failed,
}

/// What one mutating operation did: `{ref, operation, changed, error,
/// message}`. `changed` is derived strictly from the operation code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    #[serde(rename = "ref")]
    pub reference: String,
    pub operation: Option<OpCode>,
    pub changed: bool,
    pub error: bool,
    pub message: String,
}

impl TxResult {
    /// Build from a store operation code.
    pub fn from_op(reference: impl Into<String>, op: OpCode) -> Self {
        Self {
            reference: reference.into(),
            operation: Some(op),
            changed: op.is_change(),
            error: false,
            message: String::new(),
        }
    }

    /// Build a failure result carrying a descriptive message.
    pub fn failed(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            operation: None,
            changed: false,
            error: true,
            message: message.into(),
        }
    }

    /// Attach a message (conflict explanations and the like).
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn outcome(&self) -> Outcome {
        if self.error {
            return Outcome::Failed;
        }
        match self.operation {
            Some(OpCode::Insert) => Outcome::Created,
            Some(OpCode::Update | OpCode::Delete | OpCode::NoChange) => Outcome::Succeeded,
            Some(OpCode::LockConflict) => Outcome::Conflict,
            None => Outcome::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_follows_operation() {
        assert!(TxResult::from_op("Item:i1", OpCode::Insert).changed);
        assert!(TxResult::from_op("Item:i1", OpCode::Update).changed);
        assert!(TxResult::from_op("Item:i1", OpCode::Delete).changed);
        assert!(!TxResult::from_op("Item:i1", OpCode::NoChange).changed);
        assert!(!TxResult::from_op("Item:i1", OpCode::LockConflict).changed);
    }

    #[test]
    fn outcome_mapping() {
        assert_eq!(
            TxResult::from_op("r", OpCode::Insert).outcome(),
            Outcome::Created
        );
        assert_eq!(
            TxResult::from_op("r", OpCode::Update).outcome(),
            Outcome::Succeeded
        );
        assert_eq!(
            TxResult::from_op("r", OpCode::NoChange).outcome(),
            Outcome::Succeeded
        );
        assert_eq!(
            TxResult::from_op("r", OpCode::LockConflict).outcome(),
            Outcome::Conflict
        );
        assert_eq!(TxResult::failed("r", "boom").outcome(), Outcome::Failed);
    }

    #[test]
    fn serializes_with_ref_field() {
        let json = serde_json::to_string(&TxResult::from_op("Item:i1", OpCode::Insert)).unwrap();
        assert!(json.contains("\"ref\":\"Item:i1\""), "{json}");
    }
}
