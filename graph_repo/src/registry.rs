// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cached accessor for item and link type definitions.

use dashmap::DashMap;
use graph_store::{ItemTypeRecord, LinkTypeRecord, MemStore};

/// Read-through cache over the store's type definitions. Type writes go
/// through the repository, which invalidates the touched entry.
#[derive(Default)]
pub struct TypeRegistry {
    item_types: DashMap<String, ItemTypeRecord>,
    link_types: DashMap<String, LinkTypeRecord>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item_type(&self, store: &MemStore, key: &str) -> Option<ItemTypeRecord> {
        if let Some(cached) = self.item_types.get(key) {
            return Some(cached.clone());
        }
        let record = store.get_item_type(key)?;
        self.item_types.insert(key.to_string(), record.clone());
        Some(record)
    }

    pub fn link_type(&self, store: &MemStore, key: &str) -> Option<LinkTypeRecord> {
        if let Some(cached) = self.link_types.get(key) {
            return Some(cached.clone());
        }
        let record = store.get_link_type(key)?;
        self.link_types.insert(key.to_string(), record.clone());
        Some(record)
    }

    pub fn invalidate_item_type(&self, key: &str) {
        self.item_types.remove(key);
    }

    pub fn invalidate_link_type(&self, key: &str) {
        self.link_types.remove(key);
    }

    pub fn clear(&self) {
        self.item_types.clear();
        self.link_types.clear();
    }
}
