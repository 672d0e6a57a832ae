// SPDX-License-Identifier: MIT OR Apache-2.0
//! Record types for the graph store: items, links, their type definitions,
//! access-control records and tags.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::MetaValue;

/// A field submitted with an upsert.
///
/// `Keep` is the sentinel telling the store to leave the stored bytes of that
/// field untouched. The encryption layer emits it when it has established
/// that re-encrypting would write a new ciphertext for an unchanged value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite<T> {
    Value(T),
    Keep,
}

impl<T> FieldWrite<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }
}

/// An item: a node in the configuration graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Natural key; immutable identity.
    pub key: String,
    pub item_type: String,
    pub name: String,
    pub description: String,
    pub status: i16,
    /// Metadata document. Holds a base64 ciphertext string when `enc_meta`
    /// is set.
    pub meta: MetaValue,
    /// Free text. Holds a base64 ciphertext when `enc_txt` is set.
    pub txt: String,
    pub enc_meta: bool,
    pub enc_txt: bool,
    /// Key index that encrypted the stored values; 0 means unencrypted.
    pub key_ix: i16,
    pub tags: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    /// Tenancy scope used for RBAC filtering.
    pub partition: String,
    pub version: i64,
    pub created_ms: i64,
    pub updated_ms: i64,
    pub changed_by: String,
}

/// A link: a typed, directed edge between two items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub key: String,
    pub link_type: String,
    pub start_item: String,
    pub end_item: String,
    pub description: String,
    pub meta: MetaValue,
    pub txt: String,
    pub enc_meta: bool,
    pub enc_txt: bool,
    pub key_ix: i16,
    pub tags: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub version: i64,
    pub created_ms: i64,
    pub updated_ms: i64,
    pub changed_by: String,
}

/// Change notification scope declared on a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NotifyChange {
    /// No notification on change.
    #[default]
    None,
    /// Notify with metadata only.
    MetaChanged,
    /// Notify with the full payload.
    Full,
}

/// Schema and policy definition for items of a given kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTypeRecord {
    pub key: String,
    pub name: String,
    pub description: String,
    /// Encrypt the metadata document of items of this type.
    pub encrypt_meta: bool,
    /// Encrypt the free text of items of this type.
    pub encrypt_txt: bool,
    pub notify_change: NotifyChange,
    /// Optional declared metadata schema, validated on item writes.
    pub meta_schema: Option<MetaValue>,
    /// Optional named projections over item metadata.
    pub filter: Option<MetaValue>,
    /// Groups related types into a model.
    pub model_key: String,
    pub version: i64,
    pub created_ms: i64,
    pub updated_ms: i64,
    pub changed_by: String,
}

/// Schema and policy definition for links of a given kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkTypeRecord {
    pub key: String,
    pub name: String,
    pub description: String,
    pub encrypt_meta: bool,
    pub encrypt_txt: bool,
    pub meta_schema: Option<MetaValue>,
    pub model_key: String,
    pub version: i64,
    pub created_ms: i64,
    pub updated_ms: i64,
    pub changed_by: String,
}

/// An identity group. Level 2 is administrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub key: String,
    pub name: String,
    pub description: String,
    pub level: i16,
    pub version: i64,
    pub created_ms: i64,
    pub updated_ms: i64,
    pub changed_by: String,
}

/// A tenancy/ownership scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub key: String,
    pub name: String,
    pub description: String,
    pub owner: String,
    pub version: i64,
    pub created_ms: i64,
    pub updated_ms: i64,
    pub changed_by: String,
}

/// Rights granted to a role over a partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivilegeRecord {
    pub role_key: String,
    pub partition_key: String,
    pub can_create: bool,
    pub can_read: bool,
    pub can_delete: bool,
    pub created_ms: i64,
    pub changed_by: String,
}

/// A named, versioned snapshot label over a subgraph rooted at an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub label: String,
    pub root_item_key: String,
    pub name: String,
    pub description: String,
    pub version: i64,
    pub created_ms: i64,
    pub updated_ms: i64,
    pub changed_by: String,
}

/// One step in a record's mutation history, used by temporal tree queries.
/// `record` is `None` for a deletion tombstone.
#[derive(Debug, Clone)]
pub struct HistoryEntry<T> {
    pub record: Option<T>,
    pub ts_ms: i64,
}

/// Candidate item state carried by one atomic upsert.
#[derive(Debug, Clone)]
pub struct ItemWrite {
    pub item_type: String,
    pub name: String,
    pub description: String,
    pub status: i16,
    pub meta: FieldWrite<MetaValue>,
    pub txt: FieldWrite<String>,
    pub enc_meta: bool,
    pub enc_txt: bool,
    pub key_ix: i16,
    pub tags: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    /// Defaults to the instance partition when absent.
    pub partition: Option<String>,
    /// Optimistic lock: when present, must match the stored version.
    pub version: Option<i64>,
    pub changed_by: String,
}

/// Candidate link state carried by one atomic upsert.
#[derive(Debug, Clone)]
pub struct LinkWrite {
    pub link_type: String,
    pub start_item: String,
    pub end_item: String,
    pub description: String,
    pub meta: FieldWrite<MetaValue>,
    pub txt: FieldWrite<String>,
    pub enc_meta: bool,
    pub enc_txt: bool,
    pub key_ix: i16,
    pub tags: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub version: Option<i64>,
    pub changed_by: String,
}

#[derive(Debug, Clone, Default)]
pub struct ItemTypeWrite {
    pub name: String,
    pub description: String,
    pub encrypt_meta: bool,
    pub encrypt_txt: bool,
    pub notify_change: NotifyChange,
    pub meta_schema: Option<MetaValue>,
    pub filter: Option<MetaValue>,
    pub model_key: String,
    pub version: Option<i64>,
    pub changed_by: String,
}

#[derive(Debug, Clone, Default)]
pub struct LinkTypeWrite {
    pub name: String,
    pub description: String,
    pub encrypt_meta: bool,
    pub encrypt_txt: bool,
    pub meta_schema: Option<MetaValue>,
    pub model_key: String,
    pub version: Option<i64>,
    pub changed_by: String,
}

/// Search predicate for item finds. Empty filter matches everything the
/// caller is allowed to see, capped at the page limit.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub item_type: Option<String>,
    /// All listed tags must be present on a match.
    pub tags: Vec<String>,
    pub status: Option<i16>,
    pub partition: Option<String>,
    /// All listed attributes must be present with equal values.
    pub attributes: BTreeMap<String, String>,
    /// Matches records encrypted under a key other than this index
    /// (index 0, unencrypted, never matches). Used by key rotation.
    pub stale_key_ix: Option<i16>,
    pub updated_from_ms: Option<i64>,
    pub updated_to_ms: Option<i64>,
    /// Page cap; the store default applies when absent.
    pub max_rows: Option<usize>,
}

/// Search predicate for link finds.
#[derive(Debug, Clone, Default)]
pub struct LinkFilter {
    pub link_type: Option<String>,
    pub start_item: Option<String>,
    pub end_item: Option<String>,
    pub tags: Vec<String>,
    pub stale_key_ix: Option<i16>,
    pub max_rows: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct RoleWrite {
    pub name: String,
    pub description: String,
    pub level: i16,
    pub version: Option<i64>,
    pub changed_by: String,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionWrite {
    pub name: String,
    pub description: String,
    pub owner: String,
    pub version: Option<i64>,
    pub changed_by: String,
}

#[derive(Debug, Clone, Default)]
pub struct PrivilegeWrite {
    pub can_create: bool,
    pub can_read: bool,
    pub can_delete: bool,
    pub changed_by: String,
}

/// A point-in-time slice of the graph reachable from a tagged root item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeData {
    pub items: Vec<ItemRecord>,
    pub links: Vec<LinkRecord>,
}

/// Payload for tag creation.
#[derive(Debug, Clone)]
pub struct TagWrite {
    pub root_item_key: String,
    pub label: String,
    pub name: String,
    pub description: String,
    pub changed_by: String,
}

/// Payload for an optimistic-locked tag rename/update.
#[derive(Debug, Clone)]
pub struct TagUpdate {
    pub new_label: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<i64>,
    pub changed_by: String,
}

impl NotifyChange {
    /// Wire code used by the notification protocol.
    pub fn as_char(self) -> char {
        match self {
            Self::None => 'N',
            Self::MetaChanged => 'M',
            Self::Full => 'F',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_write_keep() {
        let w: FieldWrite<String> = FieldWrite::Keep;
        assert!(w.is_keep());
        assert!(!FieldWrite::Value("x".to_string()).is_keep());
    }

    #[test]
    fn notify_change_codes() {
        assert_eq!(NotifyChange::None.as_char(), 'N');
        assert_eq!(NotifyChange::MetaChanged.as_char(), 'M');
        assert_eq!(NotifyChange::Full.as_char(), 'F');
    }

    #[test]
    fn default_filter_is_open() {
        let f = ItemFilter::default();
        assert!(f.item_type.is_none());
        assert!(f.tags.is_empty());
        assert!(f.max_rows.is_none());
    }
}
