//! # Outbound Ports
//!
//! Typed views of the chain the engine depends on. The contract-binding
//! layer implements these; the engine never builds calls by method name.

use async_trait::async_trait;
use primitive_types::U256;

use crate::domain::{
    Address, ChainEvent, Epoch, ExtraData, Hash, Key, KeyTag, QuorumProof, SettlementResult,
    SlashingData, Timestamp, ValSetCommit, ValSetHeader, VaultInfo,
};

/// Settlement contract reads.
#[async_trait]
pub trait SettlementReader: Send + Sync {
    /// Last committed epoch, `None` before genesis.
    async fn get_last_committed_header_epoch(&self) -> SettlementResult<Option<Epoch>>;

    /// Genesis header and extra data, `None` before genesis.
    async fn get_genesis_commit(&self) -> SettlementResult<Option<ValSetCommit>>;

    /// Header, extra data and proof committed for `epoch`.
    async fn get_val_set_commit(&self, epoch: Epoch) -> SettlementResult<ValSetCommit>;

    /// Header hash the chain currently reports for `epoch`.
    async fn get_val_set_header_hash_at(&self, epoch: Epoch) -> SettlementResult<Hash>;
}

/// Key registry and voting-power provider membership reads.
#[async_trait]
pub trait RegistryReader: Send + Sync {
    /// Registered operators.
    async fn get_operators_at(&self, timestamp: Timestamp) -> SettlementResult<Vec<Address>>;

    /// Every operator key.
    async fn get_keys_at(&self, timestamp: Timestamp) -> SettlementResult<Vec<(Address, Key)>>;

    /// Vaults shared by all operators.
    async fn get_shared_vaults_at(&self, timestamp: Timestamp) -> SettlementResult<Vec<Address>>;

    /// Vaults registered for `operator`.
    async fn get_operator_vaults_at(
        &self,
        operator: Address,
        timestamp: Timestamp,
    ) -> SettlementResult<Vec<Address>>;

    /// Registered collateral tokens.
    async fn get_tokens_at(&self, timestamp: Timestamp) -> SettlementResult<Vec<Address>>;

    /// Slashing requirements.
    async fn get_slashing_data_at(&self, timestamp: Timestamp) -> SettlementResult<SlashingData>;
}

/// Vault stake reads.
#[async_trait]
pub trait StakeReader: Send + Sync {
    /// Stake `operator` holds in `vault`; `None` means latest.
    async fn get_operator_stake_at(
        &self,
        vault: Address,
        operator: Address,
        timestamp: Option<Timestamp>,
    ) -> SettlementResult<U256>;

    /// Vault collateral and slasher metadata.
    async fn get_vault_info(&self, vault: Address) -> SettlementResult<VaultInfo>;
}

/// Transaction submission.
#[async_trait]
pub trait SettlementWriter: Send + Sync {
    /// Submit `setKey`.
    async fn set_key(
        &self,
        operator: Address,
        tag: KeyTag,
        payload: Vec<u8>,
        signature: Vec<u8>,
        extra_data: Vec<u8>,
    ) -> SettlementResult<()>;

    /// Submit `commitValSetHeader`.
    async fn commit_val_set_header(
        &self,
        header: ValSetHeader,
        extra_data: ExtraData,
        proof: QuorumProof,
    ) -> SettlementResult<()>;

    /// Submit `setGenesis`.
    async fn set_genesis(&self, header: ValSetHeader, extra_data: ExtraData) -> SettlementResult<()>;

    /// Submit `registerOperator`.
    async fn register_operator(&self, operator: Address) -> SettlementResult<()>;

    /// Submit `unregisterOperator`.
    async fn unregister_operator(&self, operator: Address) -> SettlementResult<()>;
}

/// Events decoded since a block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventBatch {
    /// Events in chain order.
    pub events: Vec<ChainEvent>,
    /// Block to poll from next time.
    pub next_block: u64,
}

/// Decoded contract events.
#[async_trait]
pub trait ChainEventSource: Send + Sync {
    /// Events emitted at or after `from_block`.
    async fn poll_events(&self, from_block: u64) -> SettlementResult<EventBatch>;
}

/// Every read the engine performs.
pub trait ChainClient: SettlementReader + RegistryReader + StakeReader {}

impl<T: SettlementReader + RegistryReader + StakeReader> ChainClient for T {}
