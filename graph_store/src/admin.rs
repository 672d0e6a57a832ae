// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reference-data operations: type definitions and the access-control
//! triple (roles, partitions, privileges).
//!
//! Type definitions live in the REF partition; mutating them needs create
//! rights there. Role, partition and privilege mutations need an
//! admin-level role outright. Reads of reference data are open to any
//! scope, so a caller can always resolve the types of records it can see.

use tracing::debug;

use crate::{
    model::{
        ItemTypeRecord, ItemTypeWrite, LinkTypeRecord, LinkTypeWrite, PartitionRecord,
        PartitionWrite, PrivilegeRecord, PrivilegeWrite, RoleRecord, RoleWrite,
    },
    store::{now_ms, Access, MemStore, ADMIN_LEVEL, REF_PARTITION},
    OpCode, Result, StoreError,
};

impl MemStore {
    fn require_admin(&self, roles: &[String], what: &str) -> Result<()> {
        if self.scope_level(roles) >= ADMIN_LEVEL {
            Ok(())
        } else {
            Err(StoreError::Authorization(format!(
                "{what} requires an admin-level role, scope is [{}]",
                roles.join(",")
            )))
        }
    }

    // ========== Item types ==========

    pub fn set_item_type(
        &self,
        key: &str,
        write: ItemTypeWrite,
        roles: &[String],
    ) -> Result<OpCode> {
        if key.is_empty() {
            return Err(StoreError::Validation("type key must not be empty".into()));
        }
        if !self.allowed(roles, REF_PARTITION, Access::Create) {
            return Err(StoreError::Authorization(format!(
                "scope [{}] lacks Create privilege on partition '{REF_PARTITION}'",
                roles.join(",")
            )));
        }
        let mut types = self.item_types.write();
        let ts = now_ms();
        match types.get(key).cloned() {
            None => {
                types.insert(
                    key.to_string(),
                    ItemTypeRecord {
                        key: key.to_string(),
                        name: write.name,
                        description: write.description,
                        encrypt_meta: write.encrypt_meta,
                        encrypt_txt: write.encrypt_txt,
                        notify_change: write.notify_change,
                        meta_schema: write.meta_schema,
                        filter: write.filter,
                        model_key: write.model_key,
                        version: 1,
                        created_ms: ts,
                        updated_ms: ts,
                        changed_by: write.changed_by,
                    },
                );
                Ok(OpCode::Insert)
            },
            Some(current) => {
                if let Some(v) = write.version {
                    if v != current.version {
                        return Ok(OpCode::LockConflict);
                    }
                }
                let candidate = ItemTypeRecord {
                    name: write.name,
                    description: write.description,
                    encrypt_meta: write.encrypt_meta,
                    encrypt_txt: write.encrypt_txt,
                    notify_change: write.notify_change,
                    meta_schema: write.meta_schema,
                    filter: write.filter,
                    model_key: write.model_key,
                    ..current.clone()
                };
                if candidate == current {
                    return Ok(OpCode::NoChange);
                }
                types.insert(
                    key.to_string(),
                    ItemTypeRecord {
                        version: current.version + 1,
                        updated_ms: ts,
                        changed_by: write.changed_by,
                        ..candidate
                    },
                );
                Ok(OpCode::Update)
            },
        }
    }

    pub fn get_item_type(&self, key: &str) -> Option<ItemTypeRecord> {
        self.item_types.read().get(key).cloned()
    }

    /// All item types, ordered by key, optionally restricted to a model.
    pub fn find_item_types(&self, model_key: Option<&str>) -> Vec<ItemTypeRecord> {
        let mut types: Vec<ItemTypeRecord> = self
            .item_types
            .read()
            .values()
            .filter(|t| model_key.is_none_or(|m| t.model_key == m))
            .cloned()
            .collect();
        types.sort_by(|a, b| a.key.cmp(&b.key));
        types
    }

    /// Delete a type definition. Fails while items of the type exist.
    pub fn delete_item_type(&self, key: &str, roles: &[String]) -> Result<OpCode> {
        if !self.allowed(roles, REF_PARTITION, Access::Delete) {
            return Err(StoreError::Authorization(format!(
                "scope [{}] lacks Delete privilege on partition '{REF_PARTITION}'",
                roles.join(",")
            )));
        }
        let in_use = self.items.read().values().any(|i| i.item_type == key);
        if in_use {
            return Err(StoreError::Validation(format!(
                "item type '{key}' still has items; delete them first"
            )));
        }
        match self.item_types.write().remove(key) {
            Some(_) => Ok(OpCode::Delete),
            None => Ok(OpCode::NoChange),
        }
    }

    /// Delete all unused item type definitions.
    pub fn delete_item_types(&self, roles: &[String]) -> Result<OpCode> {
        self.require_admin(roles, "bulk item type delete")?;
        let keys: Vec<String> = self.item_types.read().keys().cloned().collect();
        let mut deleted = false;
        for key in keys {
            if matches!(self.delete_item_type(&key, roles), Ok(OpCode::Delete)) {
                deleted = true;
            }
        }
        Ok(if deleted { OpCode::Delete } else { OpCode::NoChange })
    }

    // ========== Link types ==========

    pub fn set_link_type(
        &self,
        key: &str,
        write: LinkTypeWrite,
        roles: &[String],
    ) -> Result<OpCode> {
        if key.is_empty() {
            return Err(StoreError::Validation("type key must not be empty".into()));
        }
        if !self.allowed(roles, REF_PARTITION, Access::Create) {
            return Err(StoreError::Authorization(format!(
                "scope [{}] lacks Create privilege on partition '{REF_PARTITION}'",
                roles.join(",")
            )));
        }
        let mut types = self.link_types.write();
        let ts = now_ms();
        match types.get(key).cloned() {
            None => {
                types.insert(
                    key.to_string(),
                    LinkTypeRecord {
                        key: key.to_string(),
                        name: write.name,
                        description: write.description,
                        encrypt_meta: write.encrypt_meta,
                        encrypt_txt: write.encrypt_txt,
                        meta_schema: write.meta_schema,
                        model_key: write.model_key,
                        version: 1,
                        created_ms: ts,
                        updated_ms: ts,
                        changed_by: write.changed_by,
                    },
                );
                Ok(OpCode::Insert)
            },
            Some(current) => {
                if let Some(v) = write.version {
                    if v != current.version {
                        return Ok(OpCode::LockConflict);
                    }
                }
                let candidate = LinkTypeRecord {
                    name: write.name,
                    description: write.description,
                    encrypt_meta: write.encrypt_meta,
                    encrypt_txt: write.encrypt_txt,
                    meta_schema: write.meta_schema,
                    model_key: write.model_key,
                    ..current.clone()
                };
                if candidate == current {
                    return Ok(OpCode::NoChange);
                }
                types.insert(
                    key.to_string(),
                    LinkTypeRecord {
                        version: current.version + 1,
                        updated_ms: ts,
                        changed_by: write.changed_by,
                        ..candidate
                    },
                );
                Ok(OpCode::Update)
            },
        }
    }

    pub fn get_link_type(&self, key: &str) -> Option<LinkTypeRecord> {
        self.link_types.read().get(key).cloned()
    }

    pub fn find_link_types(&self, model_key: Option<&str>) -> Vec<LinkTypeRecord> {
        let mut types: Vec<LinkTypeRecord> = self
            .link_types
            .read()
            .values()
            .filter(|t| model_key.is_none_or(|m| t.model_key == m))
            .cloned()
            .collect();
        types.sort_by(|a, b| a.key.cmp(&b.key));
        types
    }

    pub fn delete_link_type(&self, key: &str, roles: &[String]) -> Result<OpCode> {
        if !self.allowed(roles, REF_PARTITION, Access::Delete) {
            return Err(StoreError::Authorization(format!(
                "scope [{}] lacks Delete privilege on partition '{REF_PARTITION}'",
                roles.join(",")
            )));
        }
        let in_use = self.links.read().values().any(|l| l.link_type == key);
        if in_use {
            return Err(StoreError::Validation(format!(
                "link type '{key}' still has links; delete them first"
            )));
        }
        match self.link_types.write().remove(key) {
            Some(_) => Ok(OpCode::Delete),
            None => Ok(OpCode::NoChange),
        }
    }

    /// Delete all unused link type definitions.
    pub fn delete_link_types(&self, roles: &[String]) -> Result<OpCode> {
        self.require_admin(roles, "bulk link type delete")?;
        let keys: Vec<String> = self.link_types.read().keys().cloned().collect();
        let mut deleted = false;
        for key in keys {
            if matches!(self.delete_link_type(&key, roles), Ok(OpCode::Delete)) {
                deleted = true;
            }
        }
        Ok(if deleted { OpCode::Delete } else { OpCode::NoChange })
    }

    // ========== Roles ==========

    pub fn set_role(&self, key: &str, write: RoleWrite, roles: &[String]) -> Result<OpCode> {
        if key.is_empty() {
            return Err(StoreError::Validation("role key must not be empty".into()));
        }
        self.require_admin(roles, "role mutation")?;
        let mut known = self.roles.write();
        let ts = now_ms();
        match known.get(key).cloned() {
            None => {
                known.insert(
                    key.to_string(),
                    RoleRecord {
                        key: key.to_string(),
                        name: write.name,
                        description: write.description,
                        level: write.level,
                        version: 1,
                        created_ms: ts,
                        updated_ms: ts,
                        changed_by: write.changed_by,
                    },
                );
                Ok(OpCode::Insert)
            },
            Some(current) => {
                if let Some(v) = write.version {
                    if v != current.version {
                        return Ok(OpCode::LockConflict);
                    }
                }
                let candidate = RoleRecord {
                    name: write.name,
                    description: write.description,
                    level: write.level,
                    ..current.clone()
                };
                if candidate == current {
                    return Ok(OpCode::NoChange);
                }
                known.insert(
                    key.to_string(),
                    RoleRecord {
                        version: current.version + 1,
                        updated_ms: ts,
                        changed_by: write.changed_by,
                        ..candidate
                    },
                );
                Ok(OpCode::Update)
            },
        }
    }

    pub fn get_role(&self, key: &str) -> Option<RoleRecord> {
        self.roles.read().get(key).cloned()
    }

    pub fn find_roles(&self) -> Vec<RoleRecord> {
        let mut all: Vec<RoleRecord> = self.roles.read().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Delete a role and its privilege rows.
    pub fn delete_role(&self, key: &str, roles: &[String]) -> Result<OpCode> {
        self.require_admin(roles, "role mutation")?;
        match self.roles.write().remove(key) {
            Some(_) => {
                self.privileges.write().retain(|p| p.role_key != key);
                debug!(key, "role deleted");
                Ok(OpCode::Delete)
            },
            None => Ok(OpCode::NoChange),
        }
    }

    // ========== Partitions ==========

    pub fn set_partition(
        &self,
        key: &str,
        write: PartitionWrite,
        roles: &[String],
    ) -> Result<OpCode> {
        if key.is_empty() {
            return Err(StoreError::Validation(
                "partition key must not be empty".into(),
            ));
        }
        self.require_admin(roles, "partition mutation")?;
        let mut partitions = self.partitions.write();
        let ts = now_ms();
        match partitions.get(key).cloned() {
            None => {
                partitions.insert(
                    key.to_string(),
                    PartitionRecord {
                        key: key.to_string(),
                        name: write.name,
                        description: write.description,
                        owner: write.owner,
                        version: 1,
                        created_ms: ts,
                        updated_ms: ts,
                        changed_by: write.changed_by,
                    },
                );
                Ok(OpCode::Insert)
            },
            Some(current) => {
                if let Some(v) = write.version {
                    if v != current.version {
                        return Ok(OpCode::LockConflict);
                    }
                }
                let candidate = PartitionRecord {
                    name: write.name,
                    description: write.description,
                    owner: write.owner,
                    ..current.clone()
                };
                if candidate == current {
                    return Ok(OpCode::NoChange);
                }
                partitions.insert(
                    key.to_string(),
                    PartitionRecord {
                        version: current.version + 1,
                        updated_ms: ts,
                        changed_by: write.changed_by,
                        ..candidate
                    },
                );
                Ok(OpCode::Update)
            },
        }
    }

    pub fn get_partition(&self, key: &str) -> Option<PartitionRecord> {
        self.partitions.read().get(key).cloned()
    }

    pub fn find_partitions(&self) -> Vec<PartitionRecord> {
        let mut all: Vec<PartitionRecord> = self.partitions.read().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Delete a partition and its privilege rows. Fails while items still
    /// live in it.
    pub fn delete_partition(&self, key: &str, roles: &[String]) -> Result<OpCode> {
        self.require_admin(roles, "partition mutation")?;
        let in_use = self.items.read().values().any(|i| i.partition == key);
        if in_use {
            return Err(StoreError::Validation(format!(
                "partition '{key}' still holds items; delete them first"
            )));
        }
        match self.partitions.write().remove(key) {
            Some(_) => {
                self.privileges.write().retain(|p| p.partition_key != key);
                Ok(OpCode::Delete)
            },
            None => Ok(OpCode::NoChange),
        }
    }

    // ========== Privileges ==========

    /// Grant or replace a role's rights over a partition.
    pub fn set_privilege(
        &self,
        role_key: &str,
        partition_key: &str,
        write: PrivilegeWrite,
        roles: &[String],
    ) -> Result<OpCode> {
        self.require_admin(roles, "privilege mutation")?;
        if !self.roles.read().contains_key(role_key) {
            return Err(StoreError::Validation(format!(
                "role not found: '{role_key}'"
            )));
        }
        if !self.partitions.read().contains_key(partition_key) {
            return Err(StoreError::Validation(format!(
                "partition not found: '{partition_key}'"
            )));
        }
        let mut privileges = self.privileges.write();
        let existing = privileges
            .iter()
            .position(|p| p.role_key == role_key && p.partition_key == partition_key);
        let record = PrivilegeRecord {
            role_key: role_key.to_string(),
            partition_key: partition_key.to_string(),
            can_create: write.can_create,
            can_read: write.can_read,
            can_delete: write.can_delete,
            created_ms: now_ms(),
            changed_by: write.changed_by,
        };
        match existing {
            Some(ix) => {
                let current = &privileges[ix];
                if current.can_create == record.can_create
                    && current.can_read == record.can_read
                    && current.can_delete == record.can_delete
                {
                    return Ok(OpCode::NoChange);
                }
                privileges[ix] = record;
                Ok(OpCode::Update)
            },
            None => {
                privileges.push(record);
                Ok(OpCode::Insert)
            },
        }
    }

    pub fn remove_privilege(
        &self,
        role_key: &str,
        partition_key: &str,
        roles: &[String],
    ) -> Result<OpCode> {
        self.require_admin(roles, "privilege mutation")?;
        let mut privileges = self.privileges.write();
        let before = privileges.len();
        privileges.retain(|p| !(p.role_key == role_key && p.partition_key == partition_key));
        Ok(if privileges.len() < before {
            OpCode::Delete
        } else {
            OpCode::NoChange
        })
    }

    pub fn privileges_by_role(&self, role_key: &str) -> Vec<PrivilegeRecord> {
        let mut rows: Vec<PrivilegeRecord> = self
            .privileges
            .read()
            .iter()
            .filter(|p| p.role_key == role_key)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.partition_key.cmp(&b.partition_key));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{admin, plain_item_write, seeded_store};
    use crate::NotifyChange;

    #[test]
    fn item_type_upsert_cycle() {
        let store = MemStore::new();
        let write = ItemTypeWrite {
            name: "Host".into(),
            notify_change: NotifyChange::Full,
            changed_by: "test".into(),
            ..ItemTypeWrite::default()
        };
        assert_eq!(
            store.set_item_type("host", write.clone(), &admin()).unwrap(),
            OpCode::Insert
        );
        assert_eq!(
            store.set_item_type("host", write.clone(), &admin()).unwrap(),
            OpCode::NoChange
        );
        let mut renamed = write;
        renamed.name = "Compute host".into();
        assert_eq!(
            store.set_item_type("host", renamed, &admin()).unwrap(),
            OpCode::Update
        );
        assert_eq!(store.get_item_type("host").unwrap().version, 2);
    }

    #[test]
    fn item_type_version_conflict() {
        let store = MemStore::new();
        let write = ItemTypeWrite {
            name: "Host".into(),
            changed_by: "test".into(),
            ..ItemTypeWrite::default()
        };
        store.set_item_type("host", write.clone(), &admin()).unwrap();
        let mut stale = write;
        stale.name = "other".into();
        stale.version = Some(42);
        assert_eq!(
            store.set_item_type("host", stale, &admin()).unwrap(),
            OpCode::LockConflict
        );
    }

    #[test]
    fn type_delete_blocked_while_in_use() {
        let store = seeded_store();
        store
            .set_item("i1", plain_item_write("host"), &admin())
            .unwrap();
        let err = store.delete_item_type("host", &admin()).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        store.delete_item("i1", &admin()).unwrap();
        assert_eq!(
            store.delete_item_type("host", &admin()).unwrap(),
            OpCode::Delete
        );
    }

    #[test]
    fn role_mutation_requires_admin() {
        let store = MemStore::new();
        let err = store
            .set_role(
                "r1",
                RoleWrite {
                    name: "R1".into(),
                    changed_by: "test".into(),
                    ..RoleWrite::default()
                },
                &["nobody".to_string()],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Authorization(_)));
    }

    #[test]
    fn role_delete_cascades_privileges() {
        let store = MemStore::new();
        store
            .set_role(
                "r1",
                RoleWrite {
                    name: "R1".into(),
                    changed_by: "test".into(),
                    ..RoleWrite::default()
                },
                &admin(),
            )
            .unwrap();
        store
            .set_privilege(
                "r1",
                "INS",
                PrivilegeWrite {
                    can_create: true,
                    can_read: true,
                    can_delete: false,
                    changed_by: "test".into(),
                },
                &admin(),
            )
            .unwrap();
        assert_eq!(store.privileges_by_role("r1").len(), 1);
        assert_eq!(store.delete_role("r1", &admin()).unwrap(), OpCode::Delete);
        assert!(store.privileges_by_role("r1").is_empty());
    }

    #[test]
    fn privilege_requires_known_role_and_partition() {
        let store = MemStore::new();
        let write = PrivilegeWrite {
            can_create: true,
            can_read: true,
            can_delete: true,
            changed_by: "test".into(),
        };
        assert!(store
            .set_privilege("ghost", "INS", write.clone(), &admin())
            .is_err());
        assert!(store
            .set_privilege("ADMIN", "ghost", write, &admin())
            .is_err());
    }

    #[test]
    fn partition_lifecycle() {
        let store = MemStore::new();
        let write = PartitionWrite {
            name: "Team A".into(),
            owner: "ADMIN".into(),
            changed_by: "test".into(),
            ..PartitionWrite::default()
        };
        assert_eq!(
            store.set_partition("team-a", write.clone(), &admin()).unwrap(),
            OpCode::Insert
        );
        assert_eq!(
            store.set_partition("team-a", write, &admin()).unwrap(),
            OpCode::NoChange
        );
        assert_eq!(
            store.delete_partition("team-a", &admin()).unwrap(),
            OpCode::Delete
        );
        assert_eq!(
            store.delete_partition("team-a", &admin()).unwrap(),
            OpCode::NoChange
        );
    }

    #[test]
    fn find_item_types_by_model() {
        let store = MemStore::new();
        for (key, model) in [("a", "m1"), ("b", "m1"), ("c", "m2")] {
            store
                .set_item_type(
                    key,
                    ItemTypeWrite {
                        name: key.to_uppercase(),
                        model_key: model.into(),
                        changed_by: "test".into(),
                        ..ItemTypeWrite::default()
                    },
                    &admin(),
                )
                .unwrap();
        }
        assert_eq!(store.find_item_types(Some("m1")).len(), 2);
        assert_eq!(store.find_item_types(None).len(), 3);
    }
}
