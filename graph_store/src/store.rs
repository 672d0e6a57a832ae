// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory reference engine for the store contract.
//!
//! Interior mutability throughout: every public operation takes `&self` and
//! the caller's role list, locks only the maps it touches, and leaves the
//! store consistent on every exit path.

use std::{
    collections::{BTreeMap, HashMap},
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    model::{
        FieldWrite, HistoryEntry, ItemFilter, ItemRecord, ItemTypeRecord, ItemWrite, LinkFilter,
        LinkRecord, LinkTypeRecord, LinkWrite, PartitionRecord, PrivilegeRecord, RoleRecord,
        TagRecord,
    },
    value::MetaValue,
    OpCode, Result, StoreError,
};

/// Default page cap for find operations.
pub const DEFAULT_MAX_ROWS: usize = 20;

/// Role level that bypasses partition privileges.
pub const ADMIN_LEVEL: i16 = 2;

/// Seeded administrator role key.
pub(crate) const ADMIN_ROLE: &str = "ADMIN";

/// Seeded partition for reference data (type definitions).
pub const REF_PARTITION: &str = "REF";

/// Seeded partition for instance data (items); the default for new items.
pub const INS_PARTITION: &str = "INS";

/// The access right required by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Create,
    Read,
    Delete,
}

/// Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Thread-safe in-memory store implementing the graph store contract.
pub struct MemStore {
    pub(crate) items: RwLock<HashMap<String, ItemRecord>>,
    pub(crate) links: RwLock<HashMap<String, LinkRecord>>,
    pub(crate) item_types: RwLock<HashMap<String, ItemTypeRecord>>,
    pub(crate) link_types: RwLock<HashMap<String, LinkTypeRecord>>,
    pub(crate) roles: RwLock<HashMap<String, RoleRecord>>,
    pub(crate) partitions: RwLock<HashMap<String, PartitionRecord>>,
    pub(crate) privileges: RwLock<Vec<PrivilegeRecord>>,
    /// Keyed by (root item key, label).
    pub(crate) tags: RwLock<HashMap<(String, String), TagRecord>>,
    pub(crate) item_history: RwLock<HashMap<String, Vec<HistoryEntry<ItemRecord>>>>,
    pub(crate) link_history: RwLock<HashMap<String, Vec<HistoryEntry<LinkRecord>>>>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// Create a store with the bootstrap access-control rows: the ADMIN
    /// role (level 2), the REF and INS partitions and full ADMIN
    /// privileges on both, so an operator scope works on a fresh store.
    pub fn new() -> Self {
        let store = Self {
            items: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
            item_types: RwLock::new(HashMap::new()),
            link_types: RwLock::new(HashMap::new()),
            roles: RwLock::new(HashMap::new()),
            partitions: RwLock::new(HashMap::new()),
            privileges: RwLock::new(Vec::new()),
            tags: RwLock::new(HashMap::new()),
            item_history: RwLock::new(HashMap::new()),
            link_history: RwLock::new(HashMap::new()),
        };
        store.seed();
        store
    }

    fn seed(&self) {
        let ts = now_ms();
        self.roles.write().insert(
            ADMIN_ROLE.to_string(),
            RoleRecord {
                key: ADMIN_ROLE.to_string(),
                name: "Administrator".to_string(),
                description: "Built-in administrator role".to_string(),
                level: ADMIN_LEVEL,
                version: 1,
                created_ms: ts,
                updated_ms: ts,
                changed_by: "seed".to_string(),
            },
        );
        let mut partitions = self.partitions.write();
        for (key, name) in [
            (REF_PARTITION, "Reference data"),
            (INS_PARTITION, "Instance data"),
        ] {
            partitions.insert(
                key.to_string(),
                PartitionRecord {
                    key: key.to_string(),
                    name: name.to_string(),
                    description: String::new(),
                    owner: ADMIN_ROLE.to_string(),
                    version: 1,
                    created_ms: ts,
                    updated_ms: ts,
                    changed_by: "seed".to_string(),
                },
            );
        }
        drop(partitions);
        let mut privileges = self.privileges.write();
        for partition in [REF_PARTITION, INS_PARTITION] {
            privileges.push(PrivilegeRecord {
                role_key: ADMIN_ROLE.to_string(),
                partition_key: partition.to_string(),
                can_create: true,
                can_read: true,
                can_delete: true,
                created_ms: ts,
                changed_by: "seed".to_string(),
            });
        }
    }

    // ========== Role-scoped visibility ==========

    /// Highest role level present in the caller's scope. Unknown role keys
    /// contribute nothing.
    pub fn scope_level(&self, roles: &[String]) -> i16 {
        let known = self.roles.read();
        roles
            .iter()
            .filter_map(|key| known.get(key).map(|r| r.level))
            .max()
            .unwrap_or(0)
    }

    /// Whether the scope holds the given right over a partition.
    pub fn allowed(&self, roles: &[String], partition: &str, access: Access) -> bool {
        if self.scope_level(roles) >= ADMIN_LEVEL {
            return true;
        }
        let privileges = self.privileges.read();
        privileges.iter().any(|p| {
            p.partition_key == partition
                && roles.iter().any(|r| r == &p.role_key)
                && match access {
                    Access::Create => p.can_create,
                    Access::Read => p.can_read,
                    Access::Delete => p.can_delete,
                }
        })
    }

    fn require(&self, roles: &[String], partition: &str, access: Access) -> Result<()> {
        if self.allowed(roles, partition, access) {
            Ok(())
        } else {
            Err(StoreError::Authorization(format!(
                "scope [{}] lacks {access:?} privilege on partition '{partition}'",
                roles.join(",")
            )))
        }
    }

    // ========== Items ==========

    /// Atomic item upsert. Returns the operation code; version mismatches
    /// report [`OpCode::LockConflict`] without touching the record.
    pub fn set_item(&self, key: &str, write: ItemWrite, roles: &[String]) -> Result<OpCode> {
        if key.is_empty() {
            return Err(StoreError::Validation("item key must not be empty".into()));
        }
        if !self.item_types.read().contains_key(&write.item_type) {
            return Err(StoreError::Validation(format!(
                "item type not found: '{}'",
                write.item_type
            )));
        }

        let mut items = self.items.write();
        let existing = items.get(key).cloned();
        let partition = write
            .partition
            .clone()
            .or_else(|| existing.as_ref().map(|e| e.partition.clone()))
            .unwrap_or_else(|| INS_PARTITION.to_string());
        if !self.partitions.read().contains_key(&partition) {
            return Err(StoreError::Validation(format!(
                "partition not found: '{partition}'"
            )));
        }
        self.require(roles, &partition, Access::Create)?;
        if let Some(current) = &existing {
            if current.partition != partition {
                self.require(roles, &current.partition, Access::Create)?;
            }
            if let Some(v) = write.version {
                if v != current.version {
                    debug!(key, supplied = v, stored = current.version, "item lock conflict");
                    return Ok(OpCode::LockConflict);
                }
            }
        }

        let ts = now_ms();
        let (record, op) = match existing {
            None => {
                let record = ItemRecord {
                    key: key.to_string(),
                    item_type: write.item_type,
                    name: write.name,
                    description: write.description,
                    status: write.status,
                    meta: match write.meta {
                        FieldWrite::Value(v) => v,
                        FieldWrite::Keep => MetaValue::Null,
                    },
                    txt: match write.txt {
                        FieldWrite::Value(v) => v,
                        FieldWrite::Keep => String::new(),
                    },
                    enc_meta: write.enc_meta,
                    enc_txt: write.enc_txt,
                    key_ix: write.key_ix,
                    tags: write.tags,
                    attributes: write.attributes,
                    partition,
                    version: 1,
                    created_ms: ts,
                    updated_ms: ts,
                    changed_by: write.changed_by,
                };
                (record, OpCode::Insert)
            },
            Some(current) => {
                let meta_keep = write.meta.is_keep();
                let txt_keep = write.txt.is_keep();
                let candidate = ItemRecord {
                    key: current.key.clone(),
                    item_type: write.item_type,
                    name: write.name,
                    description: write.description,
                    status: write.status,
                    meta: match write.meta {
                        FieldWrite::Value(v) => v,
                        FieldWrite::Keep => current.meta.clone(),
                    },
                    txt: match write.txt {
                        FieldWrite::Value(v) => v,
                        FieldWrite::Keep => current.txt.clone(),
                    },
                    enc_meta: if meta_keep { current.enc_meta } else { write.enc_meta },
                    enc_txt: if txt_keep { current.enc_txt } else { write.enc_txt },
                    key_ix: if meta_keep && txt_keep { current.key_ix } else { write.key_ix },
                    tags: write.tags,
                    attributes: write.attributes,
                    partition,
                    version: current.version,
                    created_ms: current.created_ms,
                    updated_ms: current.updated_ms,
                    changed_by: current.changed_by.clone(),
                };
                if candidate == current {
                    return Ok(OpCode::NoChange);
                }
                let record = ItemRecord {
                    version: current.version + 1,
                    updated_ms: ts,
                    changed_by: write.changed_by,
                    ..candidate
                };
                (record, OpCode::Update)
            },
        };

        items.insert(key.to_string(), record.clone());
        drop(items);
        self.item_history
            .write()
            .entry(key.to_string())
            .or_default()
            .push(HistoryEntry {
                record: Some(record),
                ts_ms: ts,
            });
        Ok(op)
    }

    /// Read an item by key. Invisible and absent records both read as `None`.
    pub fn get_item(&self, key: &str, roles: &[String]) -> Option<ItemRecord> {
        let items = self.items.read();
        let record = items.get(key)?;
        if self.allowed(roles, &record.partition, Access::Read) {
            Some(record.clone())
        } else {
            None
        }
    }

    /// Find items matching the filter, visible to the scope, ordered by key
    /// and capped at the page limit.
    pub fn find_items(&self, filter: &ItemFilter, roles: &[String]) -> Vec<ItemRecord> {
        let cap = filter.max_rows.unwrap_or(DEFAULT_MAX_ROWS);
        let items = self.items.read();
        let mut matches: Vec<ItemRecord> = items
            .values()
            .filter(|r| item_matches(r, filter))
            .filter(|r| self.allowed(roles, &r.partition, Access::Read))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.key.cmp(&b.key));
        matches.truncate(cap);
        matches
    }

    /// Delete an item and every link attached to it, in either direction.
    /// Absent records report [`OpCode::NoChange`].
    pub fn delete_item(&self, key: &str, roles: &[String]) -> Result<OpCode> {
        let mut items = self.items.write();
        let Some(record) = items.get(key).cloned() else {
            return Ok(OpCode::NoChange);
        };
        self.require(roles, &record.partition, Access::Delete)?;
        items.remove(key);
        drop(items);

        let ts = now_ms();
        let mut links = self.links.write();
        let attached: Vec<String> = links
            .values()
            .filter(|l| l.start_item == key || l.end_item == key)
            .map(|l| l.key.clone())
            .collect();
        for link_key in &attached {
            links.remove(link_key);
        }
        drop(links);

        let mut link_history = self.link_history.write();
        for link_key in &attached {
            link_history
                .entry(link_key.clone())
                .or_default()
                .push(HistoryEntry {
                    record: None,
                    ts_ms: ts,
                });
        }
        drop(link_history);
        self.item_history
            .write()
            .entry(key.to_string())
            .or_default()
            .push(HistoryEntry {
                record: None,
                ts_ms: ts,
            });
        debug!(key, cascaded = attached.len(), "item deleted");
        Ok(OpCode::Delete)
    }

    /// Bulk delete of every item (and attached links) the scope may delete.
    pub fn delete_all_items(&self, roles: &[String]) -> Result<OpCode> {
        let keys: Vec<String> = {
            let items = self.items.read();
            items
                .values()
                .filter(|r| self.allowed(roles, &r.partition, Access::Delete))
                .map(|r| r.key.clone())
                .collect()
        };
        if keys.is_empty() {
            return Ok(OpCode::NoChange);
        }
        for key in &keys {
            self.delete_item(key, roles)?;
        }
        Ok(OpCode::Delete)
    }

    // ========== Links ==========

    /// Atomic link upsert. Both endpoints must exist; privileges are taken
    /// from the start item's partition.
    pub fn set_link(&self, key: &str, write: LinkWrite, roles: &[String]) -> Result<OpCode> {
        if key.is_empty() {
            return Err(StoreError::Validation("link key must not be empty".into()));
        }
        if !self.link_types.read().contains_key(&write.link_type) {
            return Err(StoreError::Validation(format!(
                "link type not found: '{}'",
                write.link_type
            )));
        }
        let start_partition = {
            let items = self.items.read();
            let start = items.get(&write.start_item).ok_or_else(|| {
                StoreError::Validation(format!(
                    "start item not found: '{}'",
                    write.start_item
                ))
            })?;
            if !items.contains_key(&write.end_item) {
                return Err(StoreError::Validation(format!(
                    "end item not found: '{}'",
                    write.end_item
                )));
            }
            start.partition.clone()
        };
        self.require(roles, &start_partition, Access::Create)?;

        let mut links = self.links.write();
        let existing = links.get(key).cloned();
        if let Some(current) = &existing {
            if let Some(v) = write.version {
                if v != current.version {
                    debug!(key, supplied = v, stored = current.version, "link lock conflict");
                    return Ok(OpCode::LockConflict);
                }
            }
        }

        let ts = now_ms();
        let (record, op) = match existing {
            None => {
                let record = LinkRecord {
                    key: key.to_string(),
                    link_type: write.link_type,
                    start_item: write.start_item,
                    end_item: write.end_item,
                    description: write.description,
                    meta: match write.meta {
                        FieldWrite::Value(v) => v,
                        FieldWrite::Keep => MetaValue::Null,
                    },
                    txt: match write.txt {
                        FieldWrite::Value(v) => v,
                        FieldWrite::Keep => String::new(),
                    },
                    enc_meta: write.enc_meta,
                    enc_txt: write.enc_txt,
                    key_ix: write.key_ix,
                    tags: write.tags,
                    attributes: write.attributes,
                    version: 1,
                    created_ms: ts,
                    updated_ms: ts,
                    changed_by: write.changed_by,
                };
                (record, OpCode::Insert)
            },
            Some(current) => {
                let meta_keep = write.meta.is_keep();
                let txt_keep = write.txt.is_keep();
                let candidate = LinkRecord {
                    key: current.key.clone(),
                    link_type: write.link_type,
                    start_item: write.start_item,
                    end_item: write.end_item,
                    description: write.description,
                    meta: match write.meta {
                        FieldWrite::Value(v) => v,
                        FieldWrite::Keep => current.meta.clone(),
                    },
                    txt: match write.txt {
                        FieldWrite::Value(v) => v,
                        FieldWrite::Keep => current.txt.clone(),
                    },
                    enc_meta: if meta_keep { current.enc_meta } else { write.enc_meta },
                    enc_txt: if txt_keep { current.enc_txt } else { write.enc_txt },
                    key_ix: if meta_keep && txt_keep { current.key_ix } else { write.key_ix },
                    tags: write.tags,
                    attributes: write.attributes,
                    version: current.version,
                    created_ms: current.created_ms,
                    updated_ms: current.updated_ms,
                    changed_by: current.changed_by.clone(),
                };
                if candidate == current {
                    return Ok(OpCode::NoChange);
                }
                let record = LinkRecord {
                    version: current.version + 1,
                    updated_ms: ts,
                    changed_by: write.changed_by,
                    ..candidate
                };
                (record, OpCode::Update)
            },
        };

        links.insert(key.to_string(), record.clone());
        drop(links);
        self.link_history
            .write()
            .entry(key.to_string())
            .or_default()
            .push(HistoryEntry {
                record: Some(record),
                ts_ms: ts,
            });
        Ok(op)
    }

    pub fn get_link(&self, key: &str, roles: &[String]) -> Option<LinkRecord> {
        let record = self.links.read().get(key)?.clone();
        let partition = self
            .items
            .read()
            .get(&record.start_item)
            .map(|i| i.partition.clone())?;
        if self.allowed(roles, &partition, Access::Read) {
            Some(record)
        } else {
            None
        }
    }

    pub fn find_links(&self, filter: &LinkFilter, roles: &[String]) -> Vec<LinkRecord> {
        let cap = filter.max_rows.unwrap_or(DEFAULT_MAX_ROWS);
        // Lock order: items before links, matching the item write paths.
        let items = self.items.read();
        let links = self.links.read();
        let mut matches: Vec<LinkRecord> = links
            .values()
            .filter(|l| link_matches(l, filter))
            .filter(|l| {
                items
                    .get(&l.start_item)
                    .is_some_and(|i| self.allowed(roles, &i.partition, Access::Read))
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.key.cmp(&b.key));
        matches.truncate(cap);
        matches
    }

    pub fn delete_link(&self, key: &str, roles: &[String]) -> Result<OpCode> {
        let Some(record) = self.links.read().get(key).cloned() else {
            return Ok(OpCode::NoChange);
        };
        let partition = self
            .items
            .read()
            .get(&record.start_item)
            .map(|i| i.partition.clone())
            .unwrap_or_else(|| INS_PARTITION.to_string());
        self.require(roles, &partition, Access::Delete)?;
        if self.links.write().remove(key).is_none() {
            return Ok(OpCode::NoChange);
        }
        self.link_history
            .write()
            .entry(key.to_string())
            .or_default()
            .push(HistoryEntry {
                record: None,
                ts_ms: now_ms(),
            });
        Ok(OpCode::Delete)
    }

    /// Wipe all instance data: items, links, tags and their history.
    /// Type definitions and access-control records survive.
    pub fn clear(&self, roles: &[String]) -> Result<OpCode> {
        if self.scope_level(roles) < ADMIN_LEVEL {
            return Err(StoreError::Authorization(
                "clear requires an admin-level role".into(),
            ));
        }
        self.items.write().clear();
        self.links.write().clear();
        self.tags.write().clear();
        self.item_history.write().clear();
        self.link_history.write().clear();
        Ok(OpCode::Delete)
    }

    /// Number of items encrypted under a key other than the given index.
    pub fn count_stale_items(&self, active_ix: i16) -> usize {
        self.items
            .read()
            .values()
            .filter(|r| r.key_ix != 0 && r.key_ix != active_ix)
            .count()
    }

    /// Number of links encrypted under a key other than the given index.
    pub fn count_stale_links(&self, active_ix: i16) -> usize {
        self.links
            .read()
            .values()
            .filter(|r| r.key_ix != 0 && r.key_ix != active_ix)
            .count()
    }
}

fn item_matches(record: &ItemRecord, filter: &ItemFilter) -> bool {
    if let Some(ty) = &filter.item_type {
        if &record.item_type != ty {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if record.status != status {
            return false;
        }
    }
    if let Some(partition) = &filter.partition {
        if &record.partition != partition {
            return false;
        }
    }
    if !filter.tags.iter().all(|t| record.tags.contains(t)) {
        return false;
    }
    if !subset_of(&filter.attributes, &record.attributes) {
        return false;
    }
    if let Some(active) = filter.stale_key_ix {
        if record.key_ix == 0 || record.key_ix == active {
            return false;
        }
    }
    if let Some(from) = filter.updated_from_ms {
        if record.updated_ms < from {
            return false;
        }
    }
    if let Some(to) = filter.updated_to_ms {
        if record.updated_ms > to {
            return false;
        }
    }
    true
}

fn link_matches(record: &LinkRecord, filter: &LinkFilter) -> bool {
    if let Some(ty) = &filter.link_type {
        if &record.link_type != ty {
            return false;
        }
    }
    if let Some(start) = &filter.start_item {
        if &record.start_item != start {
            return false;
        }
    }
    if let Some(end) = &filter.end_item {
        if &record.end_item != end {
            return false;
        }
    }
    if !filter.tags.iter().all(|t| record.tags.contains(t)) {
        return false;
    }
    if let Some(active) = filter.stale_key_ix {
        if record.key_ix == 0 || record.key_ix == active {
            return false;
        }
    }
    true
}

fn subset_of(wanted: &BTreeMap<String, String>, present: &BTreeMap<String, String>) -> bool {
    wanted
        .iter()
        .all(|(k, v)| present.get(k).is_some_and(|pv| pv == v))
}
