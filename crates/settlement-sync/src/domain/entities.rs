//! # Domain Entities
//!
//! Validator-set headers, keys, vault values and quorum proofs.
//!
//! Every hash in this module is keccak-256 over a fixed big-endian layout,
//! so two engines that committed the same chain data produce identical
//! header hashes and validator roots.

use super::errors::{SettlementError, SettlementResult};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha3::{Digest, Keccak256};
use std::collections::HashSet;
use std::fmt;

/// 20-byte account identifier (operator, vault, token).
pub type Address = [u8; 20];

/// 32-byte keccak-256 digest.
pub type Hash = [u8; 32];

/// Validator-set period identifier.
pub type Epoch = u64;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Stake-weighted voting power.
pub type VotingPower = U256;

/// Domain tag for validator-set commit messages.
pub const VALSET_COMMIT_DOMAIN: &[u8] = b"SETTLEMENT_VALSET_COMMIT_V1";

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn u256_be(value: &U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

// =============================================================================
// KEY TAGS
// =============================================================================

/// Signature scheme selector (high nibble of a [`KeyTag`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyType(pub u8);

impl KeyType {
    /// BLS12-381, public key in G2, signature in G1.
    pub const BLS12_381: KeyType = KeyType(0);
    /// ECDSA over secp256k1, key stored as its 20-byte address.
    pub const ECDSA_SECP256K1: KeyType = KeyType(1);
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            KeyType::BLS12_381 => write!(f, "bls12-381"),
            KeyType::ECDSA_SECP256K1 => write!(f, "ecdsa-secp256k1"),
            KeyType(other) => write!(f, "type-{other}"),
        }
    }
}

/// Key tag: high nibble is the [`KeyType`], low nibble an identifier (0-15).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyTag(pub u8);

impl KeyTag {
    /// Build a tag from its parts. The identifier is masked to four bits.
    pub fn from_parts(key_type: KeyType, identifier: u8) -> Self {
        Self((key_type.0 << 4) | (identifier & 0x0F))
    }

    /// Scheme selector.
    pub fn key_type(&self) -> KeyType {
        KeyType(self.0 >> 4)
    }

    /// Identifier within the scheme.
    pub fn identifier(&self) -> u8 {
        self.0 & 0x0F
    }
}

impl fmt::Display for KeyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.key_type(), self.identifier())
    }
}

// =============================================================================
// HEADERS
// =============================================================================

/// Validator-set header committed once per epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValSetHeader {
    /// Header format version.
    pub version: u8,
    /// Key tag the next commit's quorum proof must use.
    pub required_key_tag: KeyTag,
    /// Epoch this header describes.
    pub epoch: Epoch,
    /// Timestamp at which the validator set was captured.
    pub capture_timestamp: Timestamp,
    /// Minimum signed power for a quorum.
    pub quorum_threshold: VotingPower,
    /// Sum of all validators' voting power.
    pub total_voting_power: VotingPower,
    /// Commitment to the validator set ([`ValidatorSet::root`]).
    pub validators_root: Hash,
}

impl ValSetHeader {
    /// Keccak-256 over the header's canonical encoding.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(2 + 8 + 8 + 32 * 3);
        buf.push(self.version);
        buf.push(self.required_key_tag.0);
        buf.extend_from_slice(&self.epoch.to_be_bytes());
        buf.extend_from_slice(&self.capture_timestamp.to_be_bytes());
        buf.extend_from_slice(&u256_be(&self.quorum_threshold));
        buf.extend_from_slice(&u256_be(&self.total_voting_power));
        buf.extend_from_slice(&self.validators_root);
        keccak256(&buf)
    }

    /// Message the outgoing validator set signs to attest this header.
    pub fn commit_message(&self, extra_data: &ExtraData) -> Hash {
        let mut buf = Vec::with_capacity(VALSET_COMMIT_DOMAIN.len() + 64);
        buf.extend_from_slice(VALSET_COMMIT_DOMAIN);
        buf.extend_from_slice(&self.hash());
        buf.extend_from_slice(&extra_data.hash());
        keccak256(&buf)
    }
}

/// One extra-data entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraDataEntry {
    /// Entry key; unique within one [`ExtraData`].
    pub key: Hash,
    /// Entry value.
    pub value: Hash,
}

/// Ordered extra-data attached to a header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraData {
    entries: Vec<ExtraDataEntry>,
}

impl ExtraData {
    /// Wrap entries without validation; see [`ExtraData::validate`].
    pub fn new(entries: Vec<ExtraDataEntry>) -> Self {
        Self { entries }
    }

    /// No entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from `(key, value)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Hash, Hash)>) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(key, value)| ExtraDataEntry { key, value })
                .collect(),
        }
    }

    /// Reject repeated keys.
    pub fn validate(&self) -> SettlementResult<()> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !seen.insert(entry.key) {
                return Err(SettlementError::DuplicateExtraDataKey(entry.key));
            }
        }
        Ok(())
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &Hash) -> Option<Hash> {
        self.entries.iter().find(|e| &e.key == key).map(|e| e.value)
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[ExtraDataEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keccak-256 over all `key || value` pairs in order.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(self.entries.len() * 64);
        for entry in &self.entries {
            buf.extend_from_slice(&entry.key);
            buf.extend_from_slice(&entry.value);
        }
        keccak256(&buf)
    }
}

// =============================================================================
// KEYS AND VOTING POWER
// =============================================================================

/// A tagged key payload.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    /// Scheme tag.
    pub tag: KeyTag,
    /// Scheme-specific encoding (address for ECDSA, compressed G2 for BLS).
    #[serde_as(as = "Bytes")]
    pub payload: Vec<u8>,
}

/// Voting power contributed by one vault.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultValue {
    /// Vault address.
    pub vault: Address,
    /// Voting power (after the vault's stake-to-power curve).
    pub value: VotingPower,
}

/// Per-vault voting power of one operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorVotingPower {
    /// Operator address.
    pub operator: Address,
    /// One entry per contributing vault.
    pub vaults: Vec<VaultValue>,
}

impl OperatorVotingPower {
    /// Sum over all vaults (saturating).
    pub fn total(&self) -> VotingPower {
        self.vaults
            .iter()
            .fold(U256::zero(), |acc, v| acc.saturating_add(v.value))
    }
}

/// Vault metadata used for eligibility checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultInfo {
    /// Collateral token.
    pub collateral: Address,
    /// Whether a slasher is attached.
    pub has_slasher: bool,
    /// Vault epoch duration in seconds.
    pub epoch_duration: u64,
}

/// Slashing requirements applied to vaults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashingData {
    /// Only vaults with a slasher count.
    pub require_slasher: bool,
    /// Minimum vault epoch duration when a slasher is required.
    pub min_vault_epoch_duration: u64,
}

impl SlashingData {
    /// Whether a vault with `info` satisfies these requirements.
    pub fn admits(&self, info: &VaultInfo) -> bool {
        !self.require_slasher
            || (info.has_slasher && info.epoch_duration >= self.min_vault_epoch_duration)
    }
}

// =============================================================================
// VALIDATOR SET
// =============================================================================

/// One validator of a frozen set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Operator address.
    pub operator: Address,
    /// Aggregated voting power.
    pub voting_power: VotingPower,
    /// Keys at the capture timestamp, sorted by tag.
    pub keys: Vec<Key>,
}

impl Validator {
    /// Key payload for `tag`.
    pub fn key(&self, tag: KeyTag) -> Option<&[u8]> {
        self.keys
            .iter()
            .find(|k| k.tag == tag)
            .map(|k| k.payload.as_slice())
    }

    fn leaf(&self) -> Hash {
        let mut buf = Vec::with_capacity(20 + 32 + self.keys.len() * 64);
        buf.extend_from_slice(&self.operator);
        buf.extend_from_slice(&u256_be(&self.voting_power));
        for key in &self.keys {
            buf.push(key.tag.0);
            buf.extend_from_slice(&(key.payload.len() as u32).to_be_bytes());
            buf.extend_from_slice(&key.payload);
        }
        keccak256(&buf)
    }
}

/// Validator set frozen for one epoch, sorted by operator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
}

impl ValidatorSet {
    /// Sort validators by operator (and their keys by tag).
    pub fn new(mut validators: Vec<Validator>) -> Self {
        for validator in &mut validators {
            validator.keys.sort_by_key(|k| k.tag);
        }
        validators.sort_by(|a, b| a.operator.cmp(&b.operator));
        validators.dedup_by(|a, b| a.operator == b.operator);
        Self { validators }
    }

    /// Validator for `operator`.
    pub fn get(&self, operator: &Address) -> Option<&Validator> {
        self.validators
            .binary_search_by(|v| v.operator.cmp(operator))
            .ok()
            .map(|i| &self.validators[i])
    }

    /// Sum of all voting power (saturating).
    pub fn total_voting_power(&self) -> VotingPower {
        self.validators
            .iter()
            .fold(U256::zero(), |acc, v| acc.saturating_add(v.voting_power))
    }

    /// Keccak-256 commitment over the sorted validator leaves.
    pub fn root(&self) -> Hash {
        let mut buf = Vec::with_capacity(self.validators.len() * 32);
        for validator in &self.validators {
            buf.extend_from_slice(&validator.leaf());
        }
        keccak256(&buf)
    }

    /// Validators in operator order.
    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }

    /// Number of validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// True when the set is empty.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

// =============================================================================
// PROOFS AND COMMITS
// =============================================================================

/// Signature from one claimed signer.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerSignature {
    /// Claimed signer.
    pub operator: Address,
    /// Scheme-specific signature bytes.
    #[serde_as(as = "Bytes")]
    pub signature: Vec<u8>,
}

/// Quorum proof attached to a commit or presented for verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuorumProof {
    /// One signature per signer.
    Signatures(Vec<SignerSignature>),
    /// One aggregate signature over the same message.
    Aggregated {
        /// Claimed signers.
        signers: Vec<Address>,
        /// Aggregate signature bytes.
        signature: Vec<u8>,
    },
}

impl QuorumProof {
    /// Number of claimed signers.
    pub fn claimed_signers(&self) -> usize {
        match self {
            Self::Signatures(sigs) => sigs.len(),
            Self::Aggregated { signers, .. } => signers.len(),
        }
    }
}

/// Header, extra data and proof for one epoch as read from the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValSetCommit {
    /// Validator-set header.
    pub header: ValSetHeader,
    /// Extra data committed with the header.
    pub extra_data: ExtraData,
    /// Quorum proof; `None` for genesis.
    pub proof: Option<QuorumProof>,
}
