// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tag records and the temporal tree query behind snapshot retrieval.
//!
//! A tag never copies data. It is a labelled instant; retrieval replays the
//! item and link history to reconstruct the subgraph reachable from the
//! root as it existed at that instant.

use std::collections::{HashSet, VecDeque};

use crate::{
    model::{HistoryEntry, LinkRecord, TagRecord, TagUpdate, TagWrite, TreeData},
    store::{now_ms, Access, MemStore},
    OpCode, Result, StoreError,
};

impl MemStore {
    /// Create a tag. A duplicate (root, label) pair is reported as a lock
    /// conflict and the existing tag is left untouched.
    pub fn create_tag(&self, write: TagWrite) -> Result<OpCode> {
        if write.label.is_empty() {
            return Err(StoreError::Validation("tag label must not be empty".into()));
        }
        if !self.items.read().contains_key(&write.root_item_key) {
            return Err(StoreError::Validation(format!(
                "root item not found: '{}'",
                write.root_item_key
            )));
        }
        let mut tags = self.tags.write();
        let id = (write.root_item_key.clone(), write.label.clone());
        if tags.contains_key(&id) {
            return Ok(OpCode::LockConflict);
        }
        let ts = now_ms();
        tags.insert(
            id,
            TagRecord {
                label: write.label,
                root_item_key: write.root_item_key,
                name: write.name,
                description: write.description,
                version: 1,
                created_ms: ts,
                updated_ms: ts,
                changed_by: write.changed_by,
            },
        );
        Ok(OpCode::Insert)
    }

    /// Optimistic-locked rename/update keyed by (root, current label).
    pub fn update_tag(
        &self,
        root_item_key: &str,
        current_label: &str,
        update: TagUpdate,
    ) -> Result<OpCode> {
        let mut tags = self.tags.write();
        let id = (root_item_key.to_string(), current_label.to_string());
        let Some(current) = tags.get(&id).cloned() else {
            return Ok(OpCode::NoChange);
        };
        if let Some(v) = update.version {
            if v != current.version {
                return Ok(OpCode::LockConflict);
            }
        }
        let new_label = update.new_label.unwrap_or_else(|| current.label.clone());
        if new_label != current.label {
            let new_id = (root_item_key.to_string(), new_label.clone());
            if tags.contains_key(&new_id) {
                return Ok(OpCode::LockConflict);
            }
        }
        let candidate = TagRecord {
            label: new_label.clone(),
            name: update.name.unwrap_or_else(|| current.name.clone()),
            description: update
                .description
                .unwrap_or_else(|| current.description.clone()),
            ..current.clone()
        };
        if candidate == current {
            return Ok(OpCode::NoChange);
        }
        tags.remove(&id);
        tags.insert(
            (root_item_key.to_string(), new_label),
            TagRecord {
                version: current.version + 1,
                updated_ms: now_ms(),
                changed_by: update.changed_by,
                ..candidate
            },
        );
        Ok(OpCode::Update)
    }

    pub fn delete_tag(&self, root_item_key: &str, label: &str) -> Result<OpCode> {
        let id = (root_item_key.to_string(), label.to_string());
        match self.tags.write().remove(&id) {
            Some(_) => Ok(OpCode::Delete),
            None => Ok(OpCode::NoChange),
        }
    }

    /// Remove every tag of a root item.
    pub fn delete_item_tags(&self, root_item_key: &str) -> Result<OpCode> {
        let mut tags = self.tags.write();
        let before = tags.len();
        tags.retain(|(root, _), _| root != root_item_key);
        Ok(if tags.len() < before {
            OpCode::Delete
        } else {
            OpCode::NoChange
        })
    }

    /// Tags of a root item, ordered by creation.
    pub fn item_tags(&self, root_item_key: &str) -> Vec<TagRecord> {
        let mut rows: Vec<TagRecord> = self
            .tags
            .read()
            .values()
            .filter(|t| t.root_item_key == root_item_key)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.created_ms, &a.label).cmp(&(b.created_ms, &b.label)));
        rows
    }

    pub fn get_tag(&self, root_item_key: &str, label: &str) -> Option<TagRecord> {
        self.tags
            .read()
            .get(&(root_item_key.to_string(), label.to_string()))
            .cloned()
    }

    /// The subgraph reachable from the tagged root, reconstructed as of the
    /// tag's creation instant. `None` when the tag does not exist.
    pub fn tree_for_tag(
        &self,
        root_item_key: &str,
        label: &str,
        roles: &[String],
    ) -> Result<Option<TreeData>> {
        let Some(tag) = self.get_tag(root_item_key, label) else {
            return Ok(None);
        };
        let ts = tag.created_ms;

        // Link states as of the instant, indexed by start item.
        let link_history = self.link_history.read();
        let mut outgoing: Vec<LinkRecord> = Vec::new();
        for entries in link_history.values() {
            if let Some(link) = state_at(entries, ts) {
                outgoing.push(link);
            }
        }
        drop(link_history);

        let item_history = self.item_history.read();
        let mut items = Vec::new();
        let mut links = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(root_item_key.to_string());
        visited.insert(root_item_key.to_string());

        while let Some(current) = queue.pop_front() {
            let Some(item) = item_history.get(&current).and_then(|h| state_at(h, ts)) else {
                continue;
            };
            if !self.allowed(roles, &item.partition, Access::Read) {
                continue;
            }
            items.push(item);
            for link in outgoing.iter().filter(|l| l.start_item == current) {
                links.push(link.clone());
                if visited.insert(link.end_item.clone()) {
                    queue.push_back(link.end_item.clone());
                }
            }
        }

        items.sort_by(|a, b| a.key.cmp(&b.key));
        links.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(Some(TreeData { items, links }))
    }
}

/// Latest history state at or before the instant; `None` when the record
/// did not exist or was deleted.
fn state_at<T: Clone>(entries: &[HistoryEntry<T>], ts_ms: i64) -> Option<T> {
    entries
        .iter()
        .rev()
        .find(|e| e.ts_ms <= ts_ms)
        .and_then(|e| e.record.clone())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::thread::sleep;
    use std::time::Duration;

    use super::*;
    use crate::model::{FieldWrite, LinkTypeWrite, LinkWrite};
    use crate::store::test_support::{admin, plain_item_write, seeded_store};
    use crate::value::MetaValue;

    fn tag_write(root: &str, label: &str) -> TagWrite {
        TagWrite {
            root_item_key: root.to_string(),
            label: label.to_string(),
            name: format!("snapshot {label}"),
            description: String::new(),
            changed_by: "test".into(),
        }
    }

    fn wire(store: &MemStore, key: &str, from: &str, to: &str) {
        let link = LinkWrite {
            link_type: "wire".into(),
            start_item: from.into(),
            end_item: to.into(),
            description: String::new(),
            meta: FieldWrite::Value(MetaValue::Null),
            txt: FieldWrite::Value(String::new()),
            enc_meta: false,
            enc_txt: false,
            key_ix: 0,
            tags: Vec::new(),
            attributes: BTreeMap::new(),
            version: None,
            changed_by: "test".into(),
        };
        store.set_link(key, link, &admin()).unwrap();
    }

    fn graph_store() -> MemStore {
        let store = seeded_store();
        store
            .set_link_type(
                "wire",
                LinkTypeWrite {
                    name: "Wire".into(),
                    changed_by: "test".into(),
                    ..LinkTypeWrite::default()
                },
                &admin(),
            )
            .unwrap();
        store
    }

    #[test]
    fn duplicate_tag_is_lock_conflict_and_original_unchanged() {
        let store = graph_store();
        store
            .set_item("root", plain_item_write("host"), &admin())
            .unwrap();
        assert_eq!(store.create_tag(tag_write("root", "v1")).unwrap(), OpCode::Insert);
        let original = store.get_tag("root", "v1").unwrap();

        let mut dup = tag_write("root", "v1");
        dup.name = "usurper".into();
        assert_eq!(store.create_tag(dup).unwrap(), OpCode::LockConflict);
        assert_eq!(store.get_tag("root", "v1").unwrap(), original);
    }

    #[test]
    fn tag_requires_existing_root() {
        let store = graph_store();
        let err = store.create_tag(tag_write("ghost", "v1")).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn update_tag_rename_with_version() {
        let store = graph_store();
        store
            .set_item("root", plain_item_write("host"), &admin())
            .unwrap();
        store.create_tag(tag_write("root", "v1")).unwrap();

        let op = store
            .update_tag(
                "root",
                "v1",
                TagUpdate {
                    new_label: Some("v1.0".into()),
                    name: None,
                    description: None,
                    version: Some(1),
                    changed_by: "test".into(),
                },
            )
            .unwrap();
        assert_eq!(op, OpCode::Update);
        assert!(store.get_tag("root", "v1").is_none());
        let renamed = store.get_tag("root", "v1.0").unwrap();
        assert_eq!(renamed.version, 2);
    }

    #[test]
    fn update_tag_stale_version_conflicts() {
        let store = graph_store();
        store
            .set_item("root", plain_item_write("host"), &admin())
            .unwrap();
        store.create_tag(tag_write("root", "v1")).unwrap();
        let op = store
            .update_tag(
                "root",
                "v1",
                TagUpdate {
                    new_label: None,
                    name: Some("renamed".into()),
                    description: None,
                    version: Some(9),
                    changed_by: "test".into(),
                },
            )
            .unwrap();
        assert_eq!(op, OpCode::LockConflict);
    }

    #[test]
    fn delete_all_tags_for_root() {
        let store = graph_store();
        store
            .set_item("root", plain_item_write("host"), &admin())
            .unwrap();
        store.create_tag(tag_write("root", "v1")).unwrap();
        store.create_tag(tag_write("root", "v2")).unwrap();
        assert_eq!(store.item_tags("root").len(), 2);
        assert_eq!(store.delete_item_tags("root").unwrap(), OpCode::Delete);
        assert!(store.item_tags("root").is_empty());
    }

    #[test]
    fn tags_listed_in_creation_order() {
        let store = graph_store();
        store
            .set_item("root", plain_item_write("host"), &admin())
            .unwrap();
        for label in ["zeta", "alpha", "mid"] {
            store.create_tag(tag_write("root", label)).unwrap();
            sleep(Duration::from_millis(3));
        }
        let labels: Vec<String> = store
            .item_tags("root")
            .into_iter()
            .map(|t| t.label)
            .collect();
        assert_eq!(labels, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn tree_for_tag_reconstructs_past_state() {
        let store = graph_store();
        store
            .set_item("root", plain_item_write("host"), &admin())
            .unwrap();
        store
            .set_item("child", plain_item_write("host"), &admin())
            .unwrap();
        wire(&store, "l1", "root", "child");

        sleep(Duration::from_millis(5));
        store.create_tag(tag_write("root", "v1")).unwrap();
        sleep(Duration::from_millis(5));

        // Mutate after tagging: rename the child and add another node.
        let mut renamed = plain_item_write("host");
        renamed.name = "renamed child".into();
        store.set_item("child", renamed, &admin()).unwrap();
        store
            .set_item("late", plain_item_write("host"), &admin())
            .unwrap();
        wire(&store, "l2", "root", "late");

        let tree = store.tree_for_tag("root", "v1", &admin()).unwrap().unwrap();
        let keys: Vec<&str> = tree.items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["child", "root"]);
        assert_eq!(tree.links.len(), 1);
        let child = tree.items.iter().find(|i| i.key == "child").unwrap();
        assert_eq!(child.name, "a host");
    }

    #[test]
    fn tree_for_missing_tag_is_none() {
        let store = graph_store();
        store
            .set_item("root", plain_item_write("host"), &admin())
            .unwrap();
        assert!(store.tree_for_tag("root", "nope", &admin()).unwrap().is_none());
    }

    #[test]
    fn tree_survives_later_deletion() {
        let store = graph_store();
        store
            .set_item("root", plain_item_write("host"), &admin())
            .unwrap();
        store
            .set_item("child", plain_item_write("host"), &admin())
            .unwrap();
        wire(&store, "l1", "root", "child");
        sleep(Duration::from_millis(5));
        store.create_tag(tag_write("root", "v1")).unwrap();
        sleep(Duration::from_millis(5));
        store.delete_item("child", &admin()).unwrap();

        let tree = store.tree_for_tag("root", "v1", &admin()).unwrap().unwrap();
        assert_eq!(tree.items.len(), 2);
        assert_eq!(tree.links.len(), 1);
    }
}
