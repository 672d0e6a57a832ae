// SPDX-License-Identifier: MIT OR Apache-2.0
//! Repository core: the write state machine and the item/link operations.
//!
//! Every write runs RECEIVED → TYPE_RESOLVED → ENC_EVALUATED →
//! STORE_CALLED and lands in COMMITTED, CONFLICT or REJECTED. The
//! read-to-detect-change step and the store upsert execute under a per-key
//! lock (sharded by natural key), so the pair is atomic for one key while
//! unrelated keys proceed concurrently.

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    hash::{Hash, Hasher},
    sync::Arc,
};

use graph_store::{
    validate_meta, ItemFilter, ItemRecord, ItemWrite, LinkFilter, LinkRecord, LinkWrite, MemStore,
    MetaValue, NotifyChange, OpCode, TabularData, ADMIN_LEVEL,
};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{
    encryption::FieldCipher,
    key::KeyChain,
    notify::{ChangeEvent, ChangeNotifier, LogNotifier},
    policy::{EncryptionPolicy, StoredFields},
    registry::TypeRegistry,
    result::TxResult,
    sanitizer, RepoConfig, RepoError, Result, RoleScope,
};

const LOCK_SHARDS: usize = 64;

/// Per-key lock shards guarding the read-then-write window.
struct KeyLocks {
    shards: Vec<Mutex<()>>,
}

impl KeyLocks {
    fn new() -> Self {
        Self {
            shards: (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
        }
    }

    fn guard(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let ix = (hasher.finish() as usize) % LOCK_SHARDS;
        self.shards[ix].lock()
    }
}

/// Candidate item state as submitted by a caller, in plaintext.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPayload {
    pub item_type: String,
    pub name: String,
    pub description: String,
    pub status: i16,
    pub meta: MetaValue,
    pub txt: String,
    pub tags: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub partition: Option<String>,
    pub version: Option<i64>,
}

impl Default for ItemPayload {
    fn default() -> Self {
        Self {
            item_type: String::new(),
            name: String::new(),
            description: String::new(),
            status: 0,
            meta: MetaValue::Null,
            txt: String::new(),
            tags: Vec::new(),
            attributes: BTreeMap::new(),
            partition: None,
            version: None,
        }
    }
}

/// Candidate link state as submitted by a caller, in plaintext.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkPayload {
    pub link_type: String,
    pub start_item: String,
    pub end_item: String,
    pub description: String,
    pub meta: MetaValue,
    pub txt: String,
    pub tags: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub version: Option<i64>,
}

impl Default for LinkPayload {
    fn default() -> Self {
        Self {
            link_type: String::new(),
            start_item: String::new(),
            end_item: String::new(),
            description: String::new(),
            meta: MetaValue::Null,
            txt: String::new(),
            tags: Vec::new(),
            attributes: BTreeMap::new(),
            version: None,
        }
    }
}

/// Batch graph upsert payload: types first, then items, then links, each
/// entry keyed by its natural key.
#[derive(Debug, Clone, Default)]
pub struct GraphPayload {
    pub item_types: Vec<(String, crate::admin::ItemTypePayload)>,
    pub link_types: Vec<(String, crate::admin::LinkTypePayload)>,
    pub items: Vec<(String, ItemPayload)>,
    pub links: Vec<(String, LinkPayload)>,
}

/// What one rotation batch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationOutcome {
    /// Stale records picked up by this batch.
    pub scanned: usize,
    /// Records actually re-encrypted.
    pub rotated: usize,
    /// Stale records still left after the batch.
    pub remaining: usize,
}

impl RotationOutcome {
    /// True once no records remain under the non-active key.
    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }
}

/// The secure graph repository.
pub struct Repository {
    store: Arc<MemStore>,
    cipher: FieldCipher,
    registry: TypeRegistry,
    notifier: Box<dyn ChangeNotifier>,
    locks: KeyLocks,
}

impl Repository {
    pub fn new(store: Arc<MemStore>, config: RepoConfig) -> Result<Self> {
        let chain = KeyChain::new(&config)?;
        Ok(Self {
            store,
            cipher: FieldCipher::new(chain),
            registry: TypeRegistry::new(),
            notifier: Box::new(LogNotifier),
            locks: KeyLocks::new(),
        })
    }

    /// Replace the notification collaborator.
    pub fn with_notifier(mut self, notifier: Box<dyn ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &MemStore {
        &self.store
    }

    pub fn key_chain(&self) -> &KeyChain {
        self.cipher.chain()
    }

    pub(crate) fn cipher(&self) -> &FieldCipher {
        &self.cipher
    }

    pub(crate) fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub(crate) fn require_admin(&self, scope: &RoleScope, what: &str) -> Result<()> {
        if self.store.scope_level(scope.roles()) >= ADMIN_LEVEL {
            Ok(())
        } else {
            Err(RepoError::Authorization(format!(
                "{what} requires an admin-level role; scope is [{}]",
                scope.roles().join(",")
            )))
        }
    }

    // ========== Items ==========

    /// Create or update an item.
    pub fn put_item(&self, key: &str, payload: ItemPayload, scope: &RoleScope) -> Result<TxResult> {
        let reference = format!("Item:{key}");
        if key.is_empty() {
            return Err(RepoError::Validation("item key must not be empty".into()));
        }
        // RECEIVED → TYPE_RESOLVED
        let ty = self
            .registry
            .item_type(&self.store, &payload.item_type)
            .ok_or_else(|| {
                RepoError::Validation(format!("item type not found: '{}'", payload.item_type))
            })?;
        if let Some(schema) = &ty.meta_schema {
            validate_meta(&payload.meta, schema).map_err(RepoError::Validation)?;
        }

        // TYPE_RESOLVED → ENC_EVALUATED: the detection read and the write
        // below must be atomic per key.
        let _guard = self.locks.guard(key);
        let current = self.store.get_item(key, scope.roles());
        let plan = EncryptionPolicy::new(&self.cipher).plan(
            ty.encrypt_meta,
            ty.encrypt_txt,
            &payload.meta,
            &payload.txt,
            current.as_ref().map(StoredFields::from),
        )?;

        // ENC_EVALUATED → STORE_CALLED
        let write = ItemWrite {
            item_type: payload.item_type.clone(),
            name: payload.name.clone(),
            description: payload.description.clone(),
            status: payload.status,
            meta: plan.meta,
            txt: plan.txt,
            enc_meta: plan.enc_meta,
            enc_txt: plan.enc_txt,
            key_ix: plan.key_ix,
            tags: payload.tags.clone(),
            attributes: payload.attributes.clone(),
            partition: payload.partition.clone(),
            version: payload.version,
            changed_by: scope.subject().to_string(),
        };
        let op = self.store.set_item(key, write, scope.roles())?;
        debug!(key, op = %op, "item upsert");

        // COMMITTED: notify on insert/update when the type asks for it.
        if matches!(op, OpCode::Insert | OpCode::Update)
            && ty.notify_change != NotifyChange::None
        {
            let event = ChangeEvent {
                scope: ty.notify_change,
                operation: op,
                item_key: key.to_string(),
                meta: payload.meta,
                txt: matches!(ty.notify_change, NotifyChange::Full).then_some(payload.txt),
            };
            if let Err(e) = self.notifier.notify(&event) {
                warn!(key, error = %e, "change notification failed; write stands");
            }
        }
        Ok(TxResult::from_op(reference, op))
    }

    /// Read an item, decrypting any encrypted fields with the key index
    /// recorded on the record.
    pub fn get_item(&self, key: &str, scope: &RoleScope) -> Result<Option<ItemRecord>> {
        match self.store.get_item(key, scope.roles()) {
            None => Ok(None),
            Some(record) => EncryptionPolicy::new(&self.cipher)
                .decrypt_item(record)
                .map(Some),
        }
    }

    /// Find items; the page is fully materialized and decrypted.
    pub fn find_items(&self, filter: &ItemFilter, scope: &RoleScope) -> Result<Vec<ItemRecord>> {
        let policy = EncryptionPolicy::new(&self.cipher);
        self.store
            .find_items(filter, scope.roles())
            .into_iter()
            .map(|r| policy.decrypt_item(r))
            .collect()
    }

    /// An item's metadata, optionally projected through one of the type's
    /// declared filters.
    pub fn item_meta(
        &self,
        key: &str,
        filter_key: Option<&str>,
        scope: &RoleScope,
    ) -> Result<Option<MetaValue>> {
        let Some(item) = self.get_item(key, scope)? else {
            return Ok(None);
        };
        let Some(fk) = filter_key else {
            return Ok(Some(item.meta));
        };
        let ty = self
            .registry
            .item_type(&self.store, &item.item_type)
            .ok_or_else(|| {
                RepoError::Validation(format!("item type not found: '{}'", item.item_type))
            })?;
        let Some(filter) = &ty.filter else {
            return Ok(Some(item.meta));
        };
        let Some(spec) = filter.get(fk) else {
            return Ok(Some(item.meta));
        };
        let MetaValue::Object(paths) = spec else {
            return Err(RepoError::Validation(format!(
                "filter '{fk}' on type '{}' must map aliases to paths",
                ty.key
            )));
        };
        // A single path projects the value itself; several build a document.
        let extract = |path: &MetaValue| -> Result<MetaValue> {
            let path = path.as_str().ok_or_else(|| {
                RepoError::Validation(format!("filter '{fk}' paths must be strings"))
            })?;
            Ok(item.meta.path(path).cloned().unwrap_or(MetaValue::Null))
        };
        if paths.len() == 1 {
            let (_, path) = paths.iter().next().expect("len checked");
            return Ok(Some(extract(path)?));
        }
        let mut out = BTreeMap::new();
        for (alias, path) in paths {
            out.insert(alias.clone(), extract(path)?);
        }
        Ok(Some(MetaValue::Object(out)))
    }

    /// Items one outgoing link away from the given item.
    pub fn item_children(&self, key: &str, scope: &RoleScope) -> Result<Vec<ItemRecord>> {
        let links = self.store.find_links(
            &LinkFilter {
                start_item: Some(key.to_string()),
                max_rows: Some(usize::MAX),
                ..LinkFilter::default()
            },
            scope.roles(),
        );
        let mut children = Vec::new();
        for link in links {
            if let Some(child) = self.get_item(&link.end_item, scope)? {
                children.push(child);
            }
        }
        Ok(children)
    }

    /// Delete an item; attached links go with it.
    pub fn delete_item(&self, key: &str, scope: &RoleScope) -> Result<TxResult> {
        let _guard = self.locks.guard(key);
        let op = self.store.delete_item(key, scope.roles())?;
        Ok(TxResult::from_op(format!("Item:{key}"), op))
    }

    /// Bulk delete of all items; explicitly admin-guarded.
    pub fn delete_all_items(&self, scope: &RoleScope) -> Result<TxResult> {
        self.require_admin(scope, "bulk item delete")?;
        let op = self.store.delete_all_items(scope.roles())?;
        Ok(TxResult::from_op("Item:*", op))
    }

    /// Delete the subtree reachable from a root item, the root included.
    pub fn delete_tree(&self, root: &str, scope: &RoleScope) -> Result<TxResult> {
        let reference = format!("ItemTree:{root}");
        if self.store.get_item(root, scope.roles()).is_none() {
            return Ok(TxResult::from_op(reference, OpCode::NoChange));
        }
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        visited.insert(root.to_string());
        queue.push_back(root.to_string());
        while let Some(current) = queue.pop_front() {
            let links = self.store.find_links(
                &LinkFilter {
                    start_item: Some(current.clone()),
                    max_rows: Some(usize::MAX),
                    ..LinkFilter::default()
                },
                scope.roles(),
            );
            for link in links {
                if visited.insert(link.end_item.clone()) {
                    queue.push_back(link.end_item);
                }
            }
        }
        for key in &visited {
            self.store.delete_item(key, scope.roles())?;
        }
        debug!(root, deleted = visited.len(), "item tree deleted");
        Ok(TxResult::from_op(reference, OpCode::Delete))
    }

    /// Wipe all instance data. Admin-guarded at both layers.
    pub fn clear(&self, scope: &RoleScope) -> Result<TxResult> {
        self.require_admin(scope, "clear")?;
        let op = self.store.clear(scope.roles())?;
        Ok(TxResult::from_op("CLEAR_ALL", op))
    }

    // ========== Links ==========

    /// Create or update a link between two existing items.
    pub fn put_link(&self, key: &str, payload: LinkPayload, scope: &RoleScope) -> Result<TxResult> {
        let reference = format!("Link:{key}");
        if key.is_empty() {
            return Err(RepoError::Validation("link key must not be empty".into()));
        }
        let ty = self
            .registry
            .link_type(&self.store, &payload.link_type)
            .ok_or_else(|| {
                RepoError::Validation(format!("link type not found: '{}'", payload.link_type))
            })?;
        if let Some(schema) = &ty.meta_schema {
            validate_meta(&payload.meta, schema).map_err(RepoError::Validation)?;
        }

        let _guard = self.locks.guard(key);
        let current = self.store.get_link(key, scope.roles());
        let plan = EncryptionPolicy::new(&self.cipher).plan(
            ty.encrypt_meta,
            ty.encrypt_txt,
            &payload.meta,
            &payload.txt,
            current.as_ref().map(StoredFields::from),
        )?;

        let write = LinkWrite {
            link_type: payload.link_type,
            start_item: payload.start_item,
            end_item: payload.end_item,
            description: payload.description,
            meta: plan.meta,
            txt: plan.txt,
            enc_meta: plan.enc_meta,
            enc_txt: plan.enc_txt,
            key_ix: plan.key_ix,
            tags: payload.tags,
            attributes: payload.attributes,
            version: payload.version,
            changed_by: scope.subject().to_string(),
        };
        let op = self.store.set_link(key, write, scope.roles())?;
        debug!(key, op = %op, "link upsert");
        Ok(TxResult::from_op(reference, op))
    }

    pub fn get_link(&self, key: &str, scope: &RoleScope) -> Result<Option<LinkRecord>> {
        match self.store.get_link(key, scope.roles()) {
            None => Ok(None),
            Some(record) => EncryptionPolicy::new(&self.cipher)
                .decrypt_link(record)
                .map(Some),
        }
    }

    pub fn find_links(&self, filter: &LinkFilter, scope: &RoleScope) -> Result<Vec<LinkRecord>> {
        let policy = EncryptionPolicy::new(&self.cipher);
        self.store
            .find_links(filter, scope.roles())
            .into_iter()
            .map(|r| policy.decrypt_link(r))
            .collect()
    }

    pub fn delete_link(&self, key: &str, scope: &RoleScope) -> Result<TxResult> {
        let _guard = self.locks.guard(key);
        let op = self.store.delete_link(key, scope.roles())?;
        Ok(TxResult::from_op(format!("Link:{key}"), op))
    }

    // ========== Key rotation ==========

    /// Re-encrypt up to `max` items currently stamped with the non-active
    /// key index by pushing them back through the normal upsert path.
    /// Idempotent and resumable; repeated calls converge.
    pub fn rotate_items(&self, max: usize, scope: &RoleScope) -> Result<RotationOutcome> {
        self.require_admin(scope, "key rotation")?;
        let active = self.cipher.chain().active_key_ix();
        let stale = self.store.find_items(
            &ItemFilter {
                stale_key_ix: Some(active),
                max_rows: Some(max),
                ..ItemFilter::default()
            },
            scope.roles(),
        );
        let scanned = stale.len();
        let policy = EncryptionPolicy::new(&self.cipher);
        let mut rotated = 0;
        for record in stale {
            let plain = policy.decrypt_item(record)?;
            let payload = ItemPayload {
                item_type: plain.item_type,
                name: plain.name,
                description: plain.description,
                status: plain.status,
                meta: plain.meta,
                txt: plain.txt,
                tags: plain.tags,
                attributes: plain.attributes,
                partition: Some(plain.partition),
                version: None,
            };
            if self.put_item(&plain.key, payload, scope)?.changed {
                rotated += 1;
            }
        }
        let remaining = self.store.count_stale_items(active);
        debug!(scanned, rotated, remaining, "item key rotation batch");
        Ok(RotationOutcome {
            scanned,
            rotated,
            remaining,
        })
    }

    /// Link counterpart of [`Repository::rotate_items`].
    pub fn rotate_links(&self, max: usize, scope: &RoleScope) -> Result<RotationOutcome> {
        self.require_admin(scope, "key rotation")?;
        let active = self.cipher.chain().active_key_ix();
        let stale = self.store.find_links(
            &LinkFilter {
                stale_key_ix: Some(active),
                max_rows: Some(max),
                ..LinkFilter::default()
            },
            scope.roles(),
        );
        let scanned = stale.len();
        let policy = EncryptionPolicy::new(&self.cipher);
        let mut rotated = 0;
        for record in stale {
            let plain = policy.decrypt_link(record)?;
            let payload = LinkPayload {
                link_type: plain.link_type,
                start_item: plain.start_item,
                end_item: plain.end_item,
                description: plain.description,
                meta: plain.meta,
                txt: plain.txt,
                tags: plain.tags,
                attributes: plain.attributes,
                version: None,
            };
            if self.put_link(&plain.key, payload, scope)?.changed {
                rotated += 1;
            }
        }
        let remaining = self.store.count_stale_links(active);
        debug!(scanned, rotated, remaining, "link key rotation batch");
        Ok(RotationOutcome {
            scanned,
            rotated,
            remaining,
        })
    }

    // ========== Batch upsert ==========

    /// Upsert a whole graph payload: types, then items, then links. Failed
    /// entries become failure results; the rest of the batch continues.
    pub fn put_graph(&self, payload: GraphPayload, scope: &RoleScope) -> Vec<TxResult> {
        let mut results = Vec::new();
        for (key, ty) in payload.item_types {
            results.push(self.recover(format!("ItemType:{key}"), self.put_item_type(&key, ty, scope)));
        }
        for (key, ty) in payload.link_types {
            results.push(self.recover(format!("LinkType:{key}"), self.put_link_type(&key, ty, scope)));
        }
        for (key, item) in payload.items {
            results.push(self.recover(format!("Item:{key}"), self.put_item(&key, item, scope)));
        }
        for (key, link) in payload.links {
            results.push(self.recover(format!("Link:{key}"), self.put_link(&key, link, scope)));
        }
        results
    }

    fn recover(&self, reference: String, outcome: Result<TxResult>) -> TxResult {
        match outcome {
            Ok(result) => result,
            Err(err) => TxResult::failed(reference, err.to_string()),
        }
    }

    // ========== Ad-hoc queries ==========

    /// Validate, rewrite and execute a free-form read query.
    pub fn query(&self, query: &str, scope: &RoleScope) -> Result<TabularData> {
        let sanitized = sanitizer::sanitize(query, scope)?;
        self.store.select(&sanitized).map_err(Into::into)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::admin::ItemTypePayload;
    use crate::KEY_SIZE;

    pub(crate) fn test_config() -> RepoConfig {
        RepoConfig::with_keys([11u8; KEY_SIZE], [22u8; KEY_SIZE])
    }

    pub(crate) fn operator() -> RoleScope {
        RoleScope::operator()
    }

    pub(crate) fn repo() -> Repository {
        Repository::new(Arc::new(MemStore::new()), test_config()).unwrap()
    }

    pub(crate) fn repo_with_type(encrypt_txt: bool) -> Repository {
        let repo = repo();
        repo.put_item_type(
            "host",
            ItemTypePayload {
                name: "Host".into(),
                encrypt_txt,
                ..ItemTypePayload::default()
            },
            &operator(),
        )
        .unwrap();
        repo
    }

    pub(crate) fn host_item(txt: &str) -> ItemPayload {
        ItemPayload {
            item_type: "host".into(),
            name: "a host".into(),
            txt: txt.into(),
            ..ItemPayload::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::notify::tests::RecordingNotifier;
    use crate::admin::ItemTypePayload;

    #[test]
    fn put_item_unknown_type_rejected_before_store() {
        let repo = repo();
        let err = repo
            .put_item("i1", host_item("x"), &operator())
            .unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
        assert!(repo.store().get_item("i1", &["ADMIN".to_string()]).is_none());
    }

    #[test]
    fn plaintext_round_trip() {
        let repo = repo_with_type(false);
        let result = repo.put_item("i1", host_item("hello"), &operator()).unwrap();
        assert_eq!(result.operation, Some(OpCode::Insert));
        let item = repo.get_item("i1", &operator()).unwrap().unwrap();
        assert_eq!(item.txt, "hello");
        assert_eq!(item.key_ix, 0);
        assert!(!item.enc_txt);
    }

    #[test]
    fn encrypted_item_stores_ciphertext_and_reads_plaintext() {
        let repo = repo_with_type(true);
        repo.put_item("i1", host_item("secret"), &operator()).unwrap();

        let raw = repo.store().get_item("i1", &["ADMIN".to_string()]).unwrap();
        assert_ne!(raw.txt, "secret");
        assert!(raw.enc_txt);
        assert_eq!(raw.key_ix, 1);

        let item = repo.get_item("i1", &operator()).unwrap().unwrap();
        assert_eq!(item.txt, "secret");
    }

    #[test]
    fn meta_schema_enforced_on_writes() {
        let repo = repo();
        repo.put_item_type(
            "typed",
            ItemTypePayload {
                name: "Typed".into(),
                meta_schema: Some(MetaValue::Object(
                    [(
                        "cores".to_string(),
                        MetaValue::String("int".to_string()),
                    )]
                    .into_iter()
                    .collect(),
                )),
                ..ItemTypePayload::default()
            },
            &operator(),
        )
        .unwrap();

        let mut payload = ItemPayload {
            item_type: "typed".into(),
            ..ItemPayload::default()
        };
        payload.meta = MetaValue::Object(
            [("cores".to_string(), MetaValue::String("eight".into()))]
                .into_iter()
                .collect(),
        );
        let err = repo.put_item("i1", payload.clone(), &operator()).unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));

        payload.meta = MetaValue::Object(
            [("cores".to_string(), MetaValue::Int(8))]
                .into_iter()
                .collect(),
        );
        assert!(repo.put_item("i1", payload, &operator()).is_ok());
    }

    #[test]
    fn notification_failure_does_not_roll_back() {
        let store = Arc::new(MemStore::new());
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        });
        struct Fwd(Arc<RecordingNotifier>);
        impl ChangeNotifier for Fwd {
            fn notify(&self, e: &ChangeEvent) -> std::result::Result<(), String> {
                self.0.notify(e)
            }
        }
        let repo = Repository::new(store, test_config())
            .unwrap()
            .with_notifier(Box::new(Fwd(Arc::clone(&notifier))));
        repo.put_item_type(
            "host",
            ItemTypePayload {
                name: "Host".into(),
                notify_change: NotifyChange::Full,
                ..ItemTypePayload::default()
            },
            &operator(),
        )
        .unwrap();

        let result = repo.put_item("i1", host_item("x"), &operator()).unwrap();
        assert_eq!(result.operation, Some(OpCode::Insert));
        assert_eq!(notifier.events.lock().len(), 1);
        assert!(repo.get_item("i1", &operator()).unwrap().is_some());
    }

    #[test]
    fn meta_changed_scope_omits_txt() {
        let store = Arc::new(MemStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        struct Fwd(Arc<RecordingNotifier>);
        impl ChangeNotifier for Fwd {
            fn notify(&self, e: &ChangeEvent) -> std::result::Result<(), String> {
                self.0.notify(e)
            }
        }
        let repo = Repository::new(store, test_config())
            .unwrap()
            .with_notifier(Box::new(Fwd(Arc::clone(&notifier))));
        repo.put_item_type(
            "host",
            ItemTypePayload {
                name: "Host".into(),
                notify_change: NotifyChange::MetaChanged,
                ..ItemTypePayload::default()
            },
            &operator(),
        )
        .unwrap();
        repo.put_item("i1", host_item("classified"), &operator()).unwrap();

        let events = notifier.events.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].txt.is_none());
    }

    #[test]
    fn no_change_suppresses_notification() {
        let store = Arc::new(MemStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        struct Fwd(Arc<RecordingNotifier>);
        impl ChangeNotifier for Fwd {
            fn notify(&self, e: &ChangeEvent) -> std::result::Result<(), String> {
                self.0.notify(e)
            }
        }
        let repo = Repository::new(store, test_config())
            .unwrap()
            .with_notifier(Box::new(Fwd(Arc::clone(&notifier))));
        repo.put_item_type(
            "host",
            ItemTypePayload {
                name: "Host".into(),
                notify_change: NotifyChange::Full,
                ..ItemTypePayload::default()
            },
            &operator(),
        )
        .unwrap();
        repo.put_item("i1", host_item("x"), &operator()).unwrap();
        repo.put_item("i1", host_item("x"), &operator()).unwrap();
        assert_eq!(notifier.events.lock().len(), 1);
    }

    #[test]
    fn delete_tree_removes_reachable_subgraph() {
        let repo = repo_with_type(false);
        repo.put_link_type(
            "wire",
            crate::admin::LinkTypePayload {
                name: "Wire".into(),
                ..crate::admin::LinkTypePayload::default()
            },
            &operator(),
        )
        .unwrap();
        for key in ["root", "child", "grandchild", "island"] {
            repo.put_item(key, host_item(""), &operator()).unwrap();
        }
        for (key, from, to) in [("l1", "root", "child"), ("l2", "child", "grandchild")] {
            repo.put_link(
                key,
                LinkPayload {
                    link_type: "wire".into(),
                    start_item: from.into(),
                    end_item: to.into(),
                    ..LinkPayload::default()
                },
                &operator(),
            )
            .unwrap();
        }

        let result = repo.delete_tree("root", &operator()).unwrap();
        assert_eq!(result.operation, Some(OpCode::Delete));
        for key in ["root", "child", "grandchild"] {
            assert!(repo.get_item(key, &operator()).unwrap().is_none(), "{key}");
        }
        assert!(repo.get_item("island", &operator()).unwrap().is_some());
    }

    #[test]
    fn put_graph_continues_past_failures() {
        let repo = repo_with_type(false);
        let payload = GraphPayload {
            items: vec![
                ("ok1".to_string(), host_item("a")),
                (
                    "bad".to_string(),
                    ItemPayload {
                        item_type: "missing-type".into(),
                        ..ItemPayload::default()
                    },
                ),
                ("ok2".to_string(), host_item("b")),
            ],
            ..GraphPayload::default()
        };
        let results = repo.put_graph(payload, &operator());
        assert_eq!(results.len(), 3);
        assert!(!results[0].error);
        assert!(results[1].error);
        assert!(!results[2].error);
        assert!(repo.get_item("ok2", &operator()).unwrap().is_some());
    }

    #[test]
    fn query_goes_through_sanitizer() {
        let repo = repo_with_type(false);
        repo.put_item("i1", host_item(""), &operator()).unwrap();
        let err = repo.query("drop table item", &operator()).unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));

        let table = repo
            .query("select key, name from item where status = 0", &operator())
            .unwrap();
        assert_eq!(table.rows.len(), 1);
    }
}
