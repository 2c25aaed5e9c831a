//! Driving Ports (API - Inbound)
//!
//! Read and verification surface the settlement engine exposes to
//! downstream consumers (bridges, relayers, light-client verifiers).

use async_trait::async_trait;

use crate::algorithms::QuorumVerdict;
use crate::domain::{
    Address, Epoch, Hash, KeyTag, QuorumProof, SettlementResult, SyncState, ValSetHeader,
    ValidatorSet, VaultValue, VotingPower,
};

/// Primary Settlement API.
///
/// Reads never block on an in-flight commit and never retry: a chain
/// failure surfaces to the caller immediately.
#[async_trait]
pub trait SettlementApi: Send + Sync {
    /// Latest committed header.
    async fn get_val_set_header(&self) -> SettlementResult<ValSetHeader>;

    /// Header committed for `epoch`.
    async fn get_val_set_header_at(&self, epoch: Epoch) -> SettlementResult<ValSetHeader>;

    /// Extra-data value stored under `key` for `epoch`; `None` if the key
    /// was not part of that commit.
    async fn get_extra_data_at(&self, epoch: Epoch, key: Hash) -> SettlementResult<Option<Hash>>;

    /// Whether `epoch` has a committed header. Idempotent.
    async fn is_val_set_header_committed_at(&self, epoch: Epoch) -> bool;

    /// Validator set frozen when `epoch` was committed.
    async fn get_validator_set_at(&self, epoch: Epoch) -> SettlementResult<ValidatorSet>;

    /// Verify a quorum proof against live keys and voting power.
    async fn verify_quorum_sig(
        &self,
        message: &[u8],
        key_tag: KeyTag,
        threshold: VotingPower,
        proof: &QuorumProof,
    ) -> SettlementResult<QuorumVerdict>;

    /// Verify a quorum proof against the validator set frozen at `epoch`.
    async fn verify_quorum_sig_at(
        &self,
        message: &[u8],
        key_tag: KeyTag,
        threshold: VotingPower,
        proof: &QuorumProof,
        epoch: Epoch,
    ) -> SettlementResult<QuorumVerdict>;

    /// Verify a quorum proof against the validator set in force at
    /// `timestamp` (the latest epoch captured at or before it).
    async fn verify_quorum_sig_at_timestamp(
        &self,
        message: &[u8],
        key_tag: KeyTag,
        threshold: VotingPower,
        proof: &QuorumProof,
        timestamp: u64,
    ) -> SettlementResult<QuorumVerdict>;

    /// Current key of `operator` for `tag`.
    async fn get_key(&self, operator: Address, tag: KeyTag) -> SettlementResult<Vec<u8>>;

    /// Key of `operator` for `tag` as of `timestamp`.
    async fn get_key_at(
        &self,
        operator: Address,
        tag: KeyTag,
        timestamp: u64,
    ) -> SettlementResult<Vec<u8>>;

    /// Current owner of a key payload.
    async fn get_operator(&self, payload: &[u8]) -> SettlementResult<Address>;

    /// Per-vault voting power of `operator` (`None` = latest).
    async fn get_operator_voting_powers(
        &self,
        operator: Address,
        extra_data: &[u8],
        timestamp: Option<u64>,
    ) -> SettlementResult<Vec<VaultValue>>;

    /// Current sync state.
    async fn state(&self) -> SyncState;
}
