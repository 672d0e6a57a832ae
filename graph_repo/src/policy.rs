// SPDX-License-Identifier: MIT OR Apache-2.0
//! Encryption policy: per-write field decisions and read-path decryption.
//!
//! For fields configured for encryption the policy must decide whether the
//! plaintext actually changed before re-encrypting, because a fresh nonce
//! makes every ciphertext unique and a naive re-encrypt would turn every
//! read-modify-write cycle into a spurious update. Detection reads the
//! stored record (supplied by the caller, inside its per-key critical
//! section), decrypts it with the index recorded on it, and compares
//! plaintexts. Equal value plus an already-active key index yields the
//! [`FieldWrite::Keep`] sentinel; anything else re-encrypts under the
//! active key, which is also what drains stale-key records during
//! rotation.

use graph_store::{FieldWrite, ItemRecord, LinkRecord, MetaValue};

use crate::{encryption::FieldCipher, RepoError, Result};

/// The per-field outcome of one write evaluation, ready to hand to the
/// store. `enc_*` are the record-level flags to stamp; for `Keep` fields
/// the store preserves the stored flag and bytes.
#[derive(Debug)]
pub struct FieldPlan {
    pub meta: FieldWrite<MetaValue>,
    pub txt: FieldWrite<String>,
    pub enc_meta: bool,
    pub enc_txt: bool,
    pub key_ix: i16,
}

/// The stored fields relevant to change detection, borrowed from the
/// current record when one exists.
#[derive(Debug, Clone, Copy)]
pub struct StoredFields<'a> {
    pub meta: &'a MetaValue,
    pub txt: &'a str,
    pub enc_meta: bool,
    pub enc_txt: bool,
    pub key_ix: i16,
}

impl<'a> From<&'a ItemRecord> for StoredFields<'a> {
    fn from(rec: &'a ItemRecord) -> Self {
        Self {
            meta: &rec.meta,
            txt: &rec.txt,
            enc_meta: rec.enc_meta,
            enc_txt: rec.enc_txt,
            key_ix: rec.key_ix,
        }
    }
}

impl<'a> From<&'a LinkRecord> for StoredFields<'a> {
    fn from(rec: &'a LinkRecord) -> Self {
        Self {
            meta: &rec.meta,
            txt: &rec.txt,
            enc_meta: rec.enc_meta,
            enc_txt: rec.enc_txt,
            key_ix: rec.key_ix,
        }
    }
}

/// Decides, per write, what the store receives for the meta and txt fields.
pub struct EncryptionPolicy<'a> {
    cipher: &'a FieldCipher,
}

impl<'a> EncryptionPolicy<'a> {
    pub fn new(cipher: &'a FieldCipher) -> Self {
        Self { cipher }
    }

    /// Evaluate one candidate write against the type's encryption flags and
    /// the currently stored record, if any.
    pub fn plan(
        &self,
        encrypt_meta: bool,
        encrypt_txt: bool,
        meta: &MetaValue,
        txt: &str,
        current: Option<StoredFields<'_>>,
    ) -> Result<FieldPlan> {
        let active = self.cipher.chain().active_key_ix();

        let (meta_write, meta_flag) = if encrypt_meta {
            self.plan_encrypted_meta(meta, current, active)?
        } else {
            (FieldWrite::Value(meta.clone()), false)
        };

        let (txt_write, txt_flag) = if encrypt_txt {
            self.plan_encrypted_txt(txt, current, active)?
        } else {
            (FieldWrite::Value(txt.to_string()), false)
        };

        // Keep is only emitted when the stored index already equals the
        // active one, so a single record-level index stays consistent.
        let key_ix = if meta_flag || txt_flag { active } else { 0 };
        Ok(FieldPlan {
            meta: meta_write,
            txt: txt_write,
            enc_meta: meta_flag,
            enc_txt: txt_flag,
            key_ix,
        })
    }

    fn plan_encrypted_meta(
        &self,
        incoming: &MetaValue,
        current: Option<StoredFields<'_>>,
        active: i16,
    ) -> Result<(FieldWrite<MetaValue>, bool)> {
        // Empty values are stored in the clear with the flag down; there is
        // nothing worth a ciphertext and the read path stays unambiguous.
        if incoming.is_empty() {
            return Ok((FieldWrite::Value(incoming.clone()), false));
        }
        if let Some(stored) = current {
            if stored.enc_meta {
                let encoded = stored.meta.as_str().ok_or_else(|| {
                    RepoError::Integrity(
                        "record flagged meta-encrypted but stored value is not a ciphertext string"
                            .into(),
                    )
                })?;
                let plain = self.cipher.decrypt(encoded, stored.key_ix)?;
                let stored_value = MetaValue::from_json(&plain).map_err(RepoError::Integrity)?;
                if stored_value == *incoming && stored.key_ix == active {
                    return Ok((FieldWrite::Keep, true));
                }
            }
        }
        let ciphertext = self.cipher.encrypt(&incoming.to_json(), active)?;
        Ok((FieldWrite::Value(MetaValue::String(ciphertext)), true))
    }

    fn plan_encrypted_txt(
        &self,
        incoming: &str,
        current: Option<StoredFields<'_>>,
        active: i16,
    ) -> Result<(FieldWrite<String>, bool)> {
        if incoming.is_empty() {
            return Ok((FieldWrite::Value(String::new()), false));
        }
        if let Some(stored) = current {
            if stored.enc_txt {
                let plain = self.cipher.decrypt(stored.txt, stored.key_ix)?;
                if plain == incoming && stored.key_ix == active {
                    return Ok((FieldWrite::Keep, true));
                }
            }
        }
        let ciphertext = self.cipher.encrypt(incoming, active)?;
        Ok((FieldWrite::Value(ciphertext), true))
    }

    /// Reverse the write path: decrypt the fields whose record-level flag
    /// is set, using the key index recorded on this record.
    pub fn decrypt_item(&self, mut record: ItemRecord) -> Result<ItemRecord> {
        if record.enc_meta {
            let encoded = record.meta.as_str().ok_or_else(|| {
                RepoError::Integrity(format!(
                    "item '{}' flagged meta-encrypted but stored value is not a ciphertext string",
                    record.key
                ))
            })?;
            let plain = self.cipher.decrypt(encoded, record.key_ix)?;
            record.meta = MetaValue::from_json(&plain).map_err(RepoError::Integrity)?;
        }
        if record.enc_txt {
            record.txt = self.cipher.decrypt(&record.txt, record.key_ix)?;
        }
        Ok(record)
    }

    pub fn decrypt_link(&self, mut record: LinkRecord) -> Result<LinkRecord> {
        if record.enc_meta {
            let encoded = record.meta.as_str().ok_or_else(|| {
                RepoError::Integrity(format!(
                    "link '{}' flagged meta-encrypted but stored value is not a ciphertext string",
                    record.key
                ))
            })?;
            let plain = self.cipher.decrypt(encoded, record.key_ix)?;
            record.meta = MetaValue::from_json(&plain).map_err(RepoError::Integrity)?;
        }
        if record.enc_txt {
            record.txt = self.cipher.decrypt(&record.txt, record.key_ix)?;
        }
        Ok(record)
    }
}
