// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tag lifecycle and snapshot retrieval.
//!
//! Tags are thin, versioned handles over the store's temporal query; they
//! never copy or mutate the records they cover.

use graph_store::{OpCode, TagRecord, TagUpdate, TagWrite, TreeData};

use crate::{
    policy::EncryptionPolicy, repo::Repository, result::TxResult, RepoError, Result, RoleScope,
};

/// Payload for tag creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagPayload {
    pub root_item_key: String,
    pub label: String,
    pub name: String,
    pub description: String,
}

/// Payload for an optimistic-locked tag rename/update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagUpdatePayload {
    pub new_label: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<i64>,
}

impl Repository {
    /// Create a tag. A duplicate (root, label) pair reports a lock
    /// conflict; the existing tag is untouched.
    pub fn create_tag(&self, payload: TagPayload, scope: &RoleScope) -> Result<TxResult> {
        let reference = format!("Tag:{}:{}", payload.root_item_key, payload.label);
        let label = payload.label.clone();
        let root = payload.root_item_key.clone();
        let op = self.store().create_tag(TagWrite {
            root_item_key: payload.root_item_key,
            label: payload.label,
            name: payload.name,
            description: payload.description,
            changed_by: scope.subject().to_string(),
        })?;
        let result = TxResult::from_op(reference, op);
        if op == OpCode::LockConflict {
            return Ok(result.with_message(format!(
                "tag '{label}' already exists for item '{root}' and cannot be overridden"
            )));
        }
        Ok(result)
    }

    /// Rename or re-describe a tag, addressed by its current label.
    pub fn update_tag(
        &self,
        root_item_key: &str,
        current_label: &str,
        payload: TagUpdatePayload,
        scope: &RoleScope,
    ) -> Result<TxResult> {
        if self.store().get_tag(root_item_key, current_label).is_none() {
            return Err(RepoError::NotFound(format!(
                "no tag '{current_label}' on item '{root_item_key}'"
            )));
        }
        if let Some(new_label) = &payload.new_label {
            if new_label != current_label
                && self.store().get_tag(root_item_key, new_label).is_some()
            {
                return Err(RepoError::Conflict(format!(
                    "tag label '{new_label}' already exists for item '{root_item_key}'"
                )));
            }
        }
        let op = self.store().update_tag(
            root_item_key,
            current_label,
            TagUpdate {
                new_label: payload.new_label,
                name: payload.name,
                description: payload.description,
                version: payload.version,
                changed_by: scope.subject().to_string(),
            },
        )?;
        Ok(TxResult::from_op(
            format!("Tag:{root_item_key}:{current_label}"),
            op,
        ))
    }

    pub fn delete_tag(&self, root_item_key: &str, label: &str) -> Result<TxResult> {
        let op = self.store().delete_tag(root_item_key, label)?;
        Ok(TxResult::from_op(format!("Tag:{root_item_key}:{label}"), op))
    }

    /// Remove every tag of a root item.
    pub fn delete_item_tags(&self, root_item_key: &str) -> Result<TxResult> {
        let op = self.store().delete_item_tags(root_item_key)?;
        Ok(TxResult::from_op(format!("Tag:{root_item_key}:*"), op))
    }

    /// Tags of a root item, ordered by creation.
    pub fn item_tags(&self, root_item_key: &str) -> Vec<TagRecord> {
        self.store().item_tags(root_item_key)
    }

    /// The subgraph under a tag as it existed when the tag was created,
    /// with encrypted fields decrypted for the caller. `None` when the tag
    /// does not exist.
    pub fn snapshot(
        &self,
        root_item_key: &str,
        label: &str,
        scope: &RoleScope,
    ) -> Result<Option<TreeData>> {
        let Some(tree) = self
            .store()
            .tree_for_tag(root_item_key, label, scope.roles())?
        else {
            return Ok(None);
        };
        let policy = EncryptionPolicy::new(self.cipher());
        let items = tree
            .items
            .into_iter()
            .map(|i| policy.decrypt_item(i))
            .collect::<Result<Vec<_>>>()?;
        let links = tree
            .links
            .into_iter()
            .map(|l| policy.decrypt_link(l))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(TreeData { items, links }))
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;
    use std::time::Duration;

    use super::*;
    use crate::repo::test_support::{host_item, operator, repo_with_type};

    fn tag(root: &str, label: &str) -> TagPayload {
        TagPayload {
            root_item_key: root.to_string(),
            label: label.to_string(),
            name: format!("snapshot {label}"),
            description: String::new(),
        }
    }

    #[test]
    fn duplicate_tag_reports_conflict_with_message() {
        let repo = repo_with_type(false);
        repo.put_item("root", host_item(""), &operator()).unwrap();
        let first = repo.create_tag(tag("root", "v1"), &operator()).unwrap();
        assert_eq!(first.operation, Some(OpCode::Insert));

        let second = repo.create_tag(tag("root", "v1"), &operator()).unwrap();
        assert_eq!(second.operation, Some(OpCode::LockConflict));
        assert!(!second.changed);
        assert!(second.message.contains("already exists"), "{}", second.message);
    }

    #[test]
    fn update_missing_tag_is_not_found() {
        let repo = repo_with_type(false);
        repo.put_item("root", host_item(""), &operator()).unwrap();
        let err = repo
            .update_tag("root", "ghost", TagUpdatePayload::default(), &operator())
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound(_)));
    }

    #[test]
    fn rename_onto_existing_label_is_conflict() {
        let repo = repo_with_type(false);
        repo.put_item("root", host_item(""), &operator()).unwrap();
        repo.create_tag(tag("root", "v1"), &operator()).unwrap();
        repo.create_tag(tag("root", "v2"), &operator()).unwrap();
        let err = repo
            .update_tag(
                "root",
                "v1",
                TagUpdatePayload {
                    new_label: Some("v2".into()),
                    ..TagUpdatePayload::default()
                },
                &operator(),
            )
            .unwrap_err();
        assert!(matches!(err, RepoError::Conflict(_)));
    }

    #[test]
    fn snapshot_returns_decrypted_past_state() {
        let repo = repo_with_type(true);
        repo.put_item("root", host_item("secret at tag time"), &operator())
            .unwrap();
        sleep(Duration::from_millis(5));
        repo.create_tag(tag("root", "v1"), &operator()).unwrap();
        sleep(Duration::from_millis(5));
        repo.put_item("root", host_item("changed later"), &operator())
            .unwrap();

        let tree = repo.snapshot("root", "v1", &operator()).unwrap().unwrap();
        assert_eq!(tree.items.len(), 1);
        assert_eq!(tree.items[0].txt, "secret at tag time");
    }

    #[test]
    fn snapshot_of_unknown_tag_is_none() {
        let repo = repo_with_type(false);
        repo.put_item("root", host_item(""), &operator()).unwrap();
        assert!(repo.snapshot("root", "nope", &operator()).unwrap().is_none());
    }

    #[test]
    fn tags_never_mutate_tagged_records() {
        let repo = repo_with_type(false);
        repo.put_item("root", host_item("x"), &operator()).unwrap();
        let before = repo.get_item("root", &operator()).unwrap().unwrap();
        repo.create_tag(tag("root", "v1"), &operator()).unwrap();
        repo.delete_tag("root", "v1").unwrap();
        let after = repo.get_item("root", &operator()).unwrap().unwrap();
        assert_eq!(before, after);
    }
}
