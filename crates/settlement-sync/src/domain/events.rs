//! # Chain Events
//!
//! Decoded contract events that drive incremental cache updates.

use super::entities::{Address, Epoch, KeyTag, SlashingData, Timestamp};
use serde::{Deserialize, Serialize};

/// Event emitted by the key registry, voting-power provider or settlement.
///
/// Membership and key events carry the block timestamp at which they took
/// effect; that timestamp is the checkpoint point they are recorded at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
    /// Operator bound a key.
    SetKey {
        /// Operator
        operator: Address,
        /// Key tag
        tag: KeyTag,
        /// Key payload
        payload: Vec<u8>,
        /// Effective time
        timestamp: Timestamp,
    },
    /// Operator registered.
    RegisterOperator {
        /// Operator
        operator: Address,
        /// Effective time
        timestamp: Timestamp,
    },
    /// Operator unregistered.
    UnregisterOperator {
        /// Operator
        operator: Address,
        /// Effective time
        timestamp: Timestamp,
    },
    /// Vault registered for one operator.
    RegisterOperatorVault {
        /// Operator
        operator: Address,
        /// Vault
        vault: Address,
        /// Effective time
        timestamp: Timestamp,
    },
    /// Operator vault unregistered.
    UnregisterOperatorVault {
        /// Operator
        operator: Address,
        /// Vault
        vault: Address,
        /// Effective time
        timestamp: Timestamp,
    },
    /// Vault shared by all operators registered.
    RegisterSharedVault {
        /// Vault
        vault: Address,
        /// Effective time
        timestamp: Timestamp,
    },
    /// Shared vault unregistered.
    UnregisterSharedVault {
        /// Vault
        vault: Address,
        /// Effective time
        timestamp: Timestamp,
    },
    /// Collateral token registered.
    RegisterToken {
        /// Token
        token: Address,
        /// Effective time
        timestamp: Timestamp,
    },
    /// Collateral token unregistered.
    UnregisterToken {
        /// Token
        token: Address,
        /// Effective time
        timestamp: Timestamp,
    },
    /// Slashing requirements changed.
    SetSlashingData {
        /// New requirements
        data: SlashingData,
        /// Effective time
        timestamp: Timestamp,
    },
    /// Genesis header set on chain.
    SetGenesis {
        /// Genesis epoch
        epoch: Epoch,
    },
    /// Header committed on chain.
    CommitValSetHeader {
        /// Committed epoch
        epoch: Epoch,
    },
}

impl ChainEvent {
    /// Event name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetKey { .. } => "set_key",
            Self::RegisterOperator { .. } => "register_operator",
            Self::UnregisterOperator { .. } => "unregister_operator",
            Self::RegisterOperatorVault { .. } => "register_operator_vault",
            Self::UnregisterOperatorVault { .. } => "unregister_operator_vault",
            Self::RegisterSharedVault { .. } => "register_shared_vault",
            Self::UnregisterSharedVault { .. } => "unregister_shared_vault",
            Self::RegisterToken { .. } => "register_token",
            Self::UnregisterToken { .. } => "unregister_token",
            Self::SetSlashingData { .. } => "set_slashing_data",
            Self::SetGenesis { .. } => "set_genesis",
            Self::CommitValSetHeader { .. } => "commit_val_set_header",
        }
    }

    /// Whether the event announces a header the sync loop must fetch.
    pub fn is_header_event(&self) -> bool {
        matches!(self, Self::SetGenesis { .. } | Self::CommitValSetHeader { .. })
    }

    /// Epoch announced by a header event.
    pub fn header_epoch(&self) -> Option<Epoch> {
        match self {
            Self::SetGenesis { epoch } | Self::CommitValSetHeader { epoch } => Some(*epoch),
            _ => None,
        }
    }

    /// Effective time of a membership or key event.
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::SetKey { timestamp, .. }
            | Self::RegisterOperator { timestamp, .. }
            | Self::UnregisterOperator { timestamp, .. }
            | Self::RegisterOperatorVault { timestamp, .. }
            | Self::UnregisterOperatorVault { timestamp, .. }
            | Self::RegisterSharedVault { timestamp, .. }
            | Self::UnregisterSharedVault { timestamp, .. }
            | Self::RegisterToken { timestamp, .. }
            | Self::UnregisterToken { timestamp, .. }
            | Self::SetSlashingData { timestamp, .. } => Some(*timestamp),
            Self::SetGenesis { .. } | Self::CommitValSetHeader { .. } => None,
        }
    }
}
