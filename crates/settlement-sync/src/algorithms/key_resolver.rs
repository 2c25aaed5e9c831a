//! # Key Resolver
//!
//! `(operator, key tag) → key payload`, current and historical, plus the
//! inverse `payload → operator` for the current state.
//!
//! ## Rules on `set_key`
//!
//! 1. Tag maps to a registered scheme (`InvalidKeyType`)
//! 2. Payload is well-formed for that scheme (`InvalidKeyFormat`)
//! 3. Proof-of-possession over [`key_ownership_message`] verifies (`InvalidKeySignature`)
//! 4. Payload is not bound to any other `(operator, tag)` (`AlreadyUsed`)
//!
//! A rejected call leaves the resolver untouched.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

use super::checkpoint_store::CheckpointStore;
use super::schemes::SchemeRegistry;
use crate::domain::{
    keccak256, Address, ErrorKind, Key, KeyTag, SettlementError, SettlementResult, Timestamp,
    KEY_OWNERSHIP_DOMAIN,
};

/// Message an operator signs with the new key to prove possession.
pub fn key_ownership_message(operator: &Address, tag: KeyTag, payload: &[u8]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(KEY_OWNERSHIP_DOMAIN.len() + 21 + payload.len());
    buf.extend_from_slice(KEY_OWNERSHIP_DOMAIN);
    buf.extend_from_slice(operator);
    buf.push(tag.0);
    buf.extend_from_slice(payload);
    keccak256(&buf)
}

/// Checkpointed key registry view.
pub struct KeyResolver {
    schemes: SchemeRegistry,
    keys: CheckpointStore<(Address, KeyTag), Vec<u8>>,
    owners: RwLock<HashMap<Vec<u8>, (Address, KeyTag)>>,
    write: Mutex<()>,
}

impl KeyResolver {
    /// Empty resolver over `schemes`.
    pub fn new(schemes: SchemeRegistry) -> Self {
        Self {
            schemes,
            keys: CheckpointStore::new(),
            owners: RwLock::new(HashMap::new()),
            write: Mutex::new(()),
        }
    }

    /// Scheme registry used for validation.
    pub fn schemes(&self) -> &SchemeRegistry {
        &self.schemes
    }

    /// Run every `set_key` check without recording anything.
    pub fn validate_set_key(
        &self,
        operator: &Address,
        tag: KeyTag,
        payload: &[u8],
        signature: &[u8],
        extra_data: &[u8],
    ) -> SettlementResult<()> {
        let scheme = self.schemes.get(tag)?;
        scheme
            .validate_key(payload)
            .map_err(|reason| SettlementError::InvalidKeyFormat { tag, reason })?;

        let message = key_ownership_message(operator, tag, payload);
        if !scheme.verify_possession(payload, signature, &message, extra_data) {
            return Err(SettlementError::InvalidKeySignature {
                operator: *operator,
            });
        }

        self.check_unused(operator, tag, payload)
    }

    /// Bind `payload` to `(operator, tag)` at `at` after full validation.
    pub fn set_key(
        &self,
        operator: Address,
        tag: KeyTag,
        payload: Vec<u8>,
        signature: &[u8],
        extra_data: &[u8],
        at: Timestamp,
    ) -> SettlementResult<()> {
        self.validate_set_key(&operator, tag, &payload, signature, extra_data)?;
        self.bind(operator, tag, payload, at)
    }

    /// Ingest a key already accepted on chain: format and uniqueness only.
    pub fn record_chain_key(
        &self,
        operator: Address,
        tag: KeyTag,
        payload: Vec<u8>,
        at: Timestamp,
    ) -> SettlementResult<()> {
        self.schemes.validate_key(tag, &payload)?;
        self.bind(operator, tag, payload, at)
    }

    fn check_unused(&self, operator: &Address, tag: KeyTag, payload: &[u8]) -> SettlementResult<()> {
        match self.owners.read().get(payload) {
            Some((owner, owner_tag)) if owner != operator || *owner_tag != tag => {
                Err(SettlementError::AlreadyUsed { owner: *owner })
            }
            _ => Ok(()),
        }
    }

    fn bind(
        &self,
        operator: Address,
        tag: KeyTag,
        payload: Vec<u8>,
        at: Timestamp,
    ) -> SettlementResult<()> {
        let _guard = self.write.lock();
        self.check_unused(&operator, tag, &payload)?;

        let previous = self.keys.query_latest(&(operator, tag)).ok();
        if previous.as_deref() == Some(payload.as_slice()) {
            tracing::debug!(
                "[settlement] key for 0x{} tag {} unchanged",
                hex::encode(operator),
                tag
            );
            return Ok(());
        }

        self.keys.record((operator, tag), at, payload.clone())?;

        let mut owners = self.owners.write();
        if let Some(old) = previous {
            owners.remove(&old);
        }
        owners.insert(payload, (operator, tag));

        tracing::info!(
            "[settlement] key set for 0x{} tag {} at {}",
            hex::encode(operator),
            tag,
            at
        );
        Ok(())
    }

    /// Current key of `(operator, tag)`.
    pub fn get_key(&self, operator: &Address, tag: KeyTag) -> SettlementResult<Vec<u8>> {
        self.keys
            .query_latest(&(*operator, tag))
            .map_err(|_| SettlementError::KeyNotSet {
                operator: *operator,
                tag,
            })
    }

    /// Key of `(operator, tag)` as of `timestamp`.
    pub fn get_key_at(
        &self,
        operator: &Address,
        tag: KeyTag,
        timestamp: Timestamp,
    ) -> SettlementResult<Vec<u8>> {
        self.keys
            .query(&(*operator, tag), timestamp, None)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => SettlementError::KeyNotSet {
                    operator: *operator,
                    tag,
                },
                _ => e,
            })
    }

    /// All current keys of `operator`, sorted by tag.
    pub fn get_keys(&self, operator: &Address) -> Vec<Key> {
        let snapshot = self.keys.snapshot();
        let mut keys: Vec<Key> = snapshot
            .keys()
            .filter(|(op, _)| op == operator)
            .filter_map(|k| {
                snapshot.query_latest(k).ok().map(|payload| Key {
                    tag: k.1,
                    payload,
                })
            })
            .collect();
        keys.sort_by_key(|k| k.tag);
        keys
    }

    /// All keys of `operator` as of `timestamp`, sorted by tag.
    pub fn get_keys_at(&self, operator: &Address, timestamp: Timestamp) -> Vec<Key> {
        let snapshot = self.keys.snapshot();
        let mut keys: Vec<Key> = snapshot
            .keys()
            .filter(|(op, _)| op == operator)
            .filter_map(|k| {
                snapshot
                    .query(k, timestamp, None)
                    .ok()
                    .map(|payload| Key { tag: k.1, payload })
            })
            .collect();
        keys.sort_by_key(|k| k.tag);
        keys
    }

    /// Current owner of `payload`.
    pub fn get_operator(&self, payload: &[u8]) -> SettlementResult<Address> {
        self.owners
            .read()
            .get(payload)
            .map(|(op, _)| *op)
            .ok_or_else(|| SettlementError::UnknownKey(payload.to_vec()))
    }

    /// Drop keys set at or after `timestamp` and rebuild the owner index.
    pub fn truncate_from(&self, timestamp: Timestamp) -> usize {
        let _guard = self.write.lock();
        let removed = self.keys.truncate_all_from(timestamp);

        let snapshot = self.keys.snapshot();
        let mut owners = HashMap::new();
        for key in snapshot.keys() {
            if let Ok(payload) = snapshot.query_latest(key) {
                owners.insert(payload, *key);
            }
        }
        *self.owners.write() = owners;
        removed
    }
}
