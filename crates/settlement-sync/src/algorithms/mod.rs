//! # Algorithms Module
//!
//! Checkpoint storage, key resolution, voting power and quorum checks.

pub mod checkpoint_store;
pub mod key_resolver;
pub mod quorum;
pub mod schemes;
pub mod voting_power;

pub use checkpoint_store::{CheckpointStore, StoreSnapshot};
pub use key_resolver::{key_ownership_message, KeyResolver};
pub use quorum::{verify_quorum, ExclusionReason, QuorumStatus, QuorumVerdict};
pub use schemes::{BlsScheme, EcdsaScheme, KeyScheme, SchemeRegistry};
pub use voting_power::{Membership, PowerCurve, PowerCurves, StakeToPower, VotingPowerAggregator};
