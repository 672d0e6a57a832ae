// SPDX-License-Identifier: MIT OR Apache-2.0
//! Change notification seam.
//!
//! Notification delivery is best-effort: the store mutation is the
//! transaction boundary, so a failing notifier is logged and never rolls
//! back or fails the write.

use graph_store::{MetaValue, NotifyChange, OpCode};
use tracing::debug;

/// A committed item change worth telling the outside world about.
/// `txt` is present for [`NotifyChange::Full`] scope only.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub scope: NotifyChange,
    pub operation: OpCode,
    pub item_key: String,
    pub meta: MetaValue,
    pub txt: Option<String>,
}

/// Outbound notification collaborator.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, event: &ChangeEvent) -> std::result::Result<(), String>;
}

/// Default notifier: records the change in the log and nothing else.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl ChangeNotifier for LogNotifier {
    fn notify(&self, event: &ChangeEvent) -> std::result::Result<(), String> {
        debug!(
            key = %event.item_key,
            op = %event.operation,
            scope = ?event.scope,
            "item change notification"
        );
        Ok(())
    }
}
