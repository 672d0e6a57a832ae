// SPDX-License-Identifier: MIT OR Apache-2.0
//! Type definitions and access-control administration.
//!
//! Role, partition and privilege mutations are checked for an admin-level
//! role before any store call; the store enforces the same rule at its own
//! boundary.

use graph_store::{
    check_schema, ItemTypeRecord, ItemTypeWrite, LinkTypeRecord, LinkTypeWrite, MetaValue,
    NotifyChange, PartitionRecord, PartitionWrite, PrivilegeRecord, PrivilegeWrite, RoleRecord,
    RoleWrite,
};

use crate::{repo::Repository, result::TxResult, RepoError, Result, RoleScope};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemTypePayload {
    pub name: String,
    pub description: String,
    pub encrypt_meta: bool,
    pub encrypt_txt: bool,
    pub notify_change: NotifyChange,
    pub meta_schema: Option<MetaValue>,
    pub filter: Option<MetaValue>,
    pub model_key: String,
    pub version: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkTypePayload {
    pub name: String,
    pub description: String,
    pub encrypt_meta: bool,
    pub encrypt_txt: bool,
    pub meta_schema: Option<MetaValue>,
    pub model_key: String,
    pub version: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RolePayload {
    pub name: String,
    pub description: String,
    pub level: i16,
    pub version: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionPayload {
    pub name: String,
    pub description: String,
    pub owner: String,
    pub version: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrivilegePayload {
    pub can_create: bool,
    pub can_read: bool,
    pub can_delete: bool,
}

impl Repository {
    // ========== Item types ==========

    pub fn put_item_type(
        &self,
        key: &str,
        payload: ItemTypePayload,
        scope: &RoleScope,
    ) -> Result<TxResult> {
        if let Some(schema) = &payload.meta_schema {
            check_schema(schema)
                .map_err(|e| RepoError::Validation(format!("invalid meta schema: {e}")))?;
        }
        let write = ItemTypeWrite {
            name: payload.name,
            description: payload.description,
            encrypt_meta: payload.encrypt_meta,
            encrypt_txt: payload.encrypt_txt,
            notify_change: payload.notify_change,
            meta_schema: payload.meta_schema,
            filter: payload.filter,
            model_key: payload.model_key,
            version: payload.version,
            changed_by: scope.subject().to_string(),
        };
        let op = self.store().set_item_type(key, write, scope.roles())?;
        self.registry().invalidate_item_type(key);
        Ok(TxResult::from_op(format!("ItemType:{key}"), op))
    }

    pub fn get_item_type(&self, key: &str) -> Option<ItemTypeRecord> {
        self.store().get_item_type(key)
    }

    pub fn item_types(&self, model_key: Option<&str>) -> Vec<ItemTypeRecord> {
        self.store().find_item_types(model_key)
    }

    pub fn delete_item_type(&self, key: &str, scope: &RoleScope) -> Result<TxResult> {
        let op = self.store().delete_item_type(key, scope.roles())?;
        self.registry().invalidate_item_type(key);
        Ok(TxResult::from_op(format!("ItemType:{key}"), op))
    }

    pub fn delete_item_types(&self, scope: &RoleScope) -> Result<TxResult> {
        self.require_admin(scope, "bulk item type delete")?;
        let op = self.store().delete_item_types(scope.roles())?;
        self.registry().clear();
        Ok(TxResult::from_op("ItemType:*", op))
    }

    // ========== Link types ==========

    pub fn put_link_type(
        &self,
        key: &str,
        payload: LinkTypePayload,
        scope: &RoleScope,
    ) -> Result<TxResult> {
        if let Some(schema) = &payload.meta_schema {
            check_schema(schema)
                .map_err(|e| RepoError::Validation(format!("invalid meta schema: {e}")))?;
        }
        let write = LinkTypeWrite {
            name: payload.name,
            description: payload.description,
            encrypt_meta: payload.encrypt_meta,
            encrypt_txt: payload.encrypt_txt,
            meta_schema: payload.meta_schema,
            model_key: payload.model_key,
            version: payload.version,
            changed_by: scope.subject().to_string(),
        };
        let op = self.store().set_link_type(key, write, scope.roles())?;
        self.registry().invalidate_link_type(key);
        Ok(TxResult::from_op(format!("LinkType:{key}"), op))
    }

    pub fn get_link_type(&self, key: &str) -> Option<LinkTypeRecord> {
        self.store().get_link_type(key)
    }

    pub fn link_types(&self, model_key: Option<&str>) -> Vec<LinkTypeRecord> {
        self.store().find_link_types(model_key)
    }

    pub fn delete_link_type(&self, key: &str, scope: &RoleScope) -> Result<TxResult> {
        let op = self.store().delete_link_type(key, scope.roles())?;
        self.registry().invalidate_link_type(key);
        Ok(TxResult::from_op(format!("LinkType:{key}"), op))
    }

    pub fn delete_link_types(&self, scope: &RoleScope) -> Result<TxResult> {
        self.require_admin(scope, "bulk link type delete")?;
        let op = self.store().delete_link_types(scope.roles())?;
        self.registry().clear();
        Ok(TxResult::from_op("LinkType:*", op))
    }

    // ========== Roles ==========

    pub fn put_role(&self, key: &str, payload: RolePayload, scope: &RoleScope) -> Result<TxResult> {
        self.require_admin(scope, "role administration")?;
        let write = RoleWrite {
            name: payload.name,
            description: payload.description,
            level: payload.level,
            version: payload.version,
            changed_by: scope.subject().to_string(),
        };
        let op = self.store().set_role(key, write, scope.roles())?;
        Ok(TxResult::from_op(format!("Role:{key}"), op))
    }

    pub fn get_role(&self, key: &str) -> Option<RoleRecord> {
        self.store().get_role(key)
    }

    pub fn roles(&self) -> Vec<RoleRecord> {
        self.store().find_roles()
    }

    pub fn delete_role(&self, key: &str, scope: &RoleScope) -> Result<TxResult> {
        self.require_admin(scope, "role administration")?;
        let op = self.store().delete_role(key, scope.roles())?;
        Ok(TxResult::from_op(format!("Role:{key}"), op))
    }

    // ========== Partitions ==========

    pub fn put_partition(
        &self,
        key: &str,
        payload: PartitionPayload,
        scope: &RoleScope,
    ) -> Result<TxResult> {
        self.require_admin(scope, "partition administration")?;
        let write = PartitionWrite {
            name: payload.name,
            description: payload.description,
            owner: payload.owner,
            version: payload.version,
            changed_by: scope.subject().to_string(),
        };
        let op = self.store().set_partition(key, write, scope.roles())?;
        Ok(TxResult::from_op(format!("Partition:{key}"), op))
    }

    pub fn get_partition(&self, key: &str) -> Option<PartitionRecord> {
        self.store().get_partition(key)
    }

    pub fn partitions(&self) -> Vec<PartitionRecord> {
        self.store().find_partitions()
    }

    pub fn delete_partition(&self, key: &str, scope: &RoleScope) -> Result<TxResult> {
        self.require_admin(scope, "partition administration")?;
        let op = self.store().delete_partition(key, scope.roles())?;
        Ok(TxResult::from_op(format!("Partition:{key}"), op))
    }

    // ========== Privileges ==========

    pub fn grant_privilege(
        &self,
        role_key: &str,
        partition_key: &str,
        payload: PrivilegePayload,
        scope: &RoleScope,
    ) -> Result<TxResult> {
        self.require_admin(scope, "privilege administration")?;
        let write = PrivilegeWrite {
            can_create: payload.can_create,
            can_read: payload.can_read,
            can_delete: payload.can_delete,
            changed_by: scope.subject().to_string(),
        };
        let op = self
            .store()
            .set_privilege(role_key, partition_key, write, scope.roles())?;
        Ok(TxResult::from_op(
            format!("Privilege:{role_key}:{partition_key}"),
            op,
        ))
    }

    pub fn revoke_privilege(
        &self,
        role_key: &str,
        partition_key: &str,
        scope: &RoleScope,
    ) -> Result<TxResult> {
        self.require_admin(scope, "privilege administration")?;
        let op = self
            .store()
            .remove_privilege(role_key, partition_key, scope.roles())?;
        Ok(TxResult::from_op(
            format!("Privilege:{role_key}:{partition_key}"),
            op,
        ))
    }

    pub fn privileges_by_role(&self, role_key: &str) -> Vec<PrivilegeRecord> {
        self.store().privileges_by_role(role_key)
    }
}
