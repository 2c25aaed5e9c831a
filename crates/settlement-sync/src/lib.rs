//! # Settlement Sync
//!
//! Off-chain settlement sync and quorum verification for a restaking
//! middleware: checkpointed validator-set headers, operator keys and vault
//! voting power, mirrored from the settlement contracts.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! - Keep an append-only, timestamp-indexed history of keys, registry
//!   membership and committed validator-set headers
//! - Answer "was this message signed by enough voting power?" both live
//!   and for any committed epoch
//! - Follow the chain: new headers are attested by the outgoing validator
//!   set before they are accepted
//!
//! ## Components
//!
//! | Component | Type |
//! |-----------|------|
//! | Checkpoint Store | [`CheckpointStore`] |
//! | Key Resolver | [`KeyResolver`] |
//! | Voting Power Aggregator | [`VotingPowerAggregator`] |
//! | Quorum Verifier | [`verify_quorum`] |
//! | Settlement Sync Engine | [`SettlementEngine`] + [`SyncService`] |
//!
//! ## Module Structure
//!
//! ```text
//! settlement-sync/
//! ├── domain/          # Headers, keys, checkpoints, events, errors, sync state
//! ├── algorithms/      # Checkpoint store, key schemes, keys, voting power, quorum
//! ├── ports/           # SettlementApi (inbound) + chain traits (outbound), MockChain
//! ├── adapters/        # Fetch retry policy, bounded event feed
//! ├── application/     # SettlementEngine, SyncService
//! └── config.rs        # SettlementConfig
//! ```
//!
//! ## Sync State
//!
//! ```text
//! [UNINITIALIZED] ──genesis──→ [GENESIS_SET] ──caught up──→ [SYNCED] ⇄ [STALE]
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use settlement_sync::{SettlementConfig, SettlementEngine, SyncService};
//!
//! let engine = Arc::new(SettlementEngine::new(
//!     SettlementConfig::default(),
//!     chain.clone(),
//!     SchemeRegistry::with_defaults(),
//!     PowerCurves::default(),
//! ));
//! tokio::spawn(SyncService::new(engine.clone(), events).run(0, cancel.clone()));
//!
//! let verdict = engine.verify_quorum_sig_at(&message, tag, threshold, &proof, epoch)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

/// Test fixtures.
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-exports
pub use adapters::{spawn_event_poller, EventFeed, RetryPolicy};
pub use algorithms::{
    key_ownership_message, verify_quorum, BlsScheme, CheckpointStore, EcdsaScheme,
    ExclusionReason, KeyResolver, KeyScheme, Membership, PowerCurve, PowerCurves, QuorumStatus,
    QuorumVerdict, SchemeRegistry, StakeToPower, StoreSnapshot, VotingPowerAggregator,
};
pub use application::{CommittedValSet, SettlementEngine, SyncService, TickReport};
pub use config::SettlementConfig;
pub use domain::{
    keccak256, Address, ChainEvent, Checkpoint, Epoch, ErrorKind, ExtraData, ExtraDataEntry,
    Hash, Key, KeyTag, KeyType, OperatorVotingPower, QuorumProof, SettlementError, SettlementResult,
    SignerSignature, SlashingData, SyncState, Timestamp, Trace, ValSetCommit, ValSetHeader,
    Validator, ValidatorSet, VaultInfo, VaultValue, VotingPower, SUPPORTED_HEADER_VERSION,
};
pub use ports::{
    ChainClient, ChainEventSource, EventBatch, MockChain, RegistryReader, SettlementApi,
    SettlementReader, SettlementWriter, StakeReader, Submission,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
