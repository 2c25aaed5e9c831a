//! # Domain Errors
//!
//! Error taxonomy for the settlement engine.
//!
//! | Kind | Meaning | Retried? |
//! |------|---------|----------|
//! | Validation | Malformed or inconsistent input, rejected before mutation | No (resubmit) |
//! | NotFound | Missing checkpoint, key, operator or epoch | No |
//! | Quorum | Not enough verified voting power | No |
//! | Transient | RPC timeout, inconsistent read | Sync loop only |
//! | Fatal | Committed header changed on chain | Forces resync |

use super::entities::{Address, Epoch, Hash, KeyTag, Timestamp, VotingPower};
use thiserror::Error;

/// Coarse classification of a [`SettlementError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rejected input; nothing was mutated.
    Validation,
    /// Requested data does not exist.
    NotFound,
    /// Quorum not reached.
    Quorum,
    /// Retryable infrastructure failure.
    Transient,
    /// Consistency fault that invalidates local history.
    Fatal,
}

/// Settlement engine errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SettlementError {
    // =========================================================================
    // CHECKPOINTS
    // =========================================================================
    /// Checkpoint appended at or before the last recorded point.
    #[error("Out-of-order checkpoint insertion: {at} is not after {last}")]
    OutOfOrderInsertion {
        /// Point being inserted
        at: u64,
        /// Last recorded point
        last: u64,
    },

    /// Lookup precedes the first checkpoint (or the history is unknown).
    #[error("No checkpoint at or before {at}")]
    NoCheckpointBefore {
        /// Requested point
        at: u64,
    },

    /// History has no entries.
    #[error("Checkpoint history is empty")]
    EmptyHistory,

    // =========================================================================
    // KEYS
    // =========================================================================
    /// Operator has no key for this tag (at the requested time).
    #[error("Key not set for operator 0x{} tag {tag}", hex::encode(.operator))]
    KeyNotSet {
        /// Operator queried
        operator: Address,
        /// Key tag queried
        tag: KeyTag,
    },

    /// No operator owns this key payload.
    #[error("Unknown key 0x{}", hex::encode(.0))]
    UnknownKey(Vec<u8>),

    /// Key tag maps to no registered signature scheme.
    #[error("Invalid key type for tag {0}")]
    InvalidKeyType(KeyTag),

    /// Key payload does not match the scheme's format.
    #[error("Invalid key format for tag {tag}: {reason}")]
    InvalidKeyFormat {
        /// Key tag
        tag: KeyTag,
        /// What is wrong with the payload
        reason: String,
    },

    /// Proof-of-possession did not verify.
    #[error("Invalid key signature from operator 0x{}", hex::encode(.operator))]
    InvalidKeySignature {
        /// Operator submitting the key
        operator: Address,
    },

    /// Key payload already bound to another operator or tag.
    #[error("Key already used by operator 0x{}", hex::encode(.owner))]
    AlreadyUsed {
        /// Current owner of the payload
        owner: Address,
    },

    // =========================================================================
    // HEADERS
    // =========================================================================
    /// Header version not supported.
    #[error("Invalid header version: expected {expected}, got {got}")]
    InvalidVersion {
        /// Supported version
        expected: u8,
        /// Version in the header
        got: u8,
    },

    /// Quorum threshold above total voting power.
    #[error("Quorum threshold {quorum} exceeds total voting power {total}")]
    InvalidQuorumThreshold {
        /// Header quorum threshold
        quorum: VotingPower,
        /// Header total voting power
        total: VotingPower,
    },

    /// Extra-data key appears twice.
    #[error("Duplicate extra data key 0x{}", hex::encode(.0))]
    DuplicateExtraDataKey(Hash),

    /// Epoch not after the last committed one.
    #[error("Header for epoch {epoch} already committed (last committed {last})")]
    ValSetHeaderAlreadyCommitted {
        /// Epoch submitted
        epoch: Epoch,
        /// Last committed epoch
        last: Epoch,
    },

    /// Epoch not monotonically increasing.
    #[error("Invalid epoch {epoch} after {previous}")]
    InvalidEpoch {
        /// Epoch submitted
        epoch: Epoch,
        /// Previous header epoch
        previous: Epoch,
    },

    /// Capture timestamp not monotonically increasing.
    #[error("Invalid capture timestamp {timestamp} after {previous}")]
    InvalidCaptureTimestamp {
        /// Timestamp submitted
        timestamp: Timestamp,
        /// Previous header timestamp
        previous: Timestamp,
    },

    /// Header disagrees with the locally derived validator set.
    #[error("Validator set mismatch: {0}")]
    ValidatorSetMismatch(String),

    /// Genesis can be set only once.
    #[error("Genesis already set")]
    GenesisAlreadySet,

    /// Operation requires genesis.
    #[error("Engine not initialized: genesis not set")]
    NotInitialized,

    /// No header committed for this epoch.
    #[error("No header committed for epoch {epoch}")]
    HeaderNotCommitted {
        /// Epoch queried
        epoch: Epoch,
    },

    // =========================================================================
    // QUORUM
    // =========================================================================
    /// Verified voting power below threshold.
    #[error("Insufficient quorum: signed {signed}, threshold {threshold}")]
    InsufficientQuorum {
        /// Power of verified signers
        signed: VotingPower,
        /// Required threshold
        threshold: VotingPower,
    },

    /// A commit arrived without a proof.
    #[error("Missing quorum proof")]
    MissingProof,

    /// Proof shape not supported for the scheme.
    #[error("Invalid proof format: {0}")]
    InvalidProofFormat(String),

    // =========================================================================
    // TRANSIENT
    // =========================================================================
    /// Chain RPC failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Chain fetch timed out.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Timeout applied
        timeout_ms: u64,
    },

    /// Chain returned data inconsistent with itself (e.g. mid-reorg).
    #[error("Inconsistent read: {0}")]
    ReadInconsistency(String),

    /// Work abandoned because the engine is shutting down.
    #[error("Cancelled")]
    Cancelled,

    // =========================================================================
    // FATAL
    // =========================================================================
    /// A committed header changed on chain.
    #[error(
        "Reorg past finality at epoch {epoch}: expected 0x{}, chain has 0x{}",
        hex::encode(.expected),
        hex::encode(.actual)
    )]
    ReorgDetected {
        /// Epoch whose header changed
        epoch: Epoch,
        /// Locally committed header hash
        expected: Hash,
        /// Header hash now reported by the chain
        actual: Hash,
    },
}

impl SettlementError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoCheckpointBefore { .. }
            | Self::EmptyHistory
            | Self::KeyNotSet { .. }
            | Self::UnknownKey(_)
            | Self::HeaderNotCommitted { .. } => ErrorKind::NotFound,

            Self::InsufficientQuorum { .. } => ErrorKind::Quorum,

            Self::Rpc(_) | Self::Timeout { .. } | Self::ReadInconsistency(_) | Self::Cancelled => {
                ErrorKind::Transient
            }

            Self::ReorgDetected { .. } => ErrorKind::Fatal,

            _ => ErrorKind::Validation,
        }
    }

    /// Whether the sync loop should retry the failed fetch.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient && !matches!(self, Self::Cancelled)
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::OutOfOrderInsertion { .. } => "out_of_order",
            Self::NoCheckpointBefore { .. } => "no_checkpoint",
            Self::EmptyHistory => "empty_history",
            Self::KeyNotSet { .. } => "key_not_set",
            Self::UnknownKey(_) => "unknown_key",
            Self::InvalidKeyType(_) => "invalid_key_type",
            Self::InvalidKeyFormat { .. } => "invalid_key_format",
            Self::InvalidKeySignature { .. } => "invalid_key_signature",
            Self::AlreadyUsed { .. } => "already_used",
            Self::InvalidVersion { .. } => "invalid_version",
            Self::InvalidQuorumThreshold { .. } => "invalid_quorum_threshold",
            Self::DuplicateExtraDataKey(_) => "duplicate_extra_data_key",
            Self::ValSetHeaderAlreadyCommitted { .. } => "already_committed",
            Self::InvalidEpoch { .. } => "invalid_epoch",
            Self::InvalidCaptureTimestamp { .. } => "invalid_capture_timestamp",
            Self::ValidatorSetMismatch(_) => "validator_set_mismatch",
            Self::GenesisAlreadySet => "genesis_already_set",
            Self::NotInitialized => "not_initialized",
            Self::HeaderNotCommitted { .. } => "header_not_committed",
            Self::InsufficientQuorum { .. } => "insufficient_quorum",
            Self::MissingProof => "missing_proof",
            Self::InvalidProofFormat(_) => "invalid_proof_format",
            Self::Rpc(_) => "rpc",
            Self::Timeout { .. } => "timeout",
            Self::ReadInconsistency(_) => "read_inconsistency",
            Self::Cancelled => "cancelled",
            Self::ReorgDetected { .. } => "reorg",
        }
    }
}

/// Result alias for settlement operations.
pub type SettlementResult<T> = Result<T, SettlementError>;
