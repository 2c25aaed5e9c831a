//! # Domain Invariants
//!
//! Header rules checked before anything is recorded.

use super::entities::{ValSetHeader, ValidatorSet};
use super::errors::{SettlementError, SettlementResult};

/// Header version understood by default.
pub const SUPPORTED_HEADER_VERSION: u8 = 1;

/// Domain tag for key proof-of-possession messages.
pub const KEY_OWNERSHIP_DOMAIN: &[u8] = b"SETTLEMENT_KEY_OWNERSHIP_V1";

/// Invariant: header version is the supported one.
pub fn invariant_version(header: &ValSetHeader, supported: u8) -> SettlementResult<()> {
    if header.version != supported {
        return Err(SettlementError::InvalidVersion {
            expected: supported,
            got: header.version,
        });
    }
    Ok(())
}

/// Invariant: `quorum_threshold <= total_voting_power`.
///
/// Enforced when a header is committed, never at verification time.
pub fn invariant_quorum_within_total(header: &ValSetHeader) -> SettlementResult<()> {
    if header.quorum_threshold > header.total_voting_power {
        return Err(SettlementError::InvalidQuorumThreshold {
            quorum: header.quorum_threshold,
            total: header.total_voting_power,
        });
    }
    Ok(())
}

/// Invariant: epoch and capture timestamp strictly increase.
pub fn invariant_monotonic(previous: &ValSetHeader, next: &ValSetHeader) -> SettlementResult<()> {
    if next.epoch <= previous.epoch {
        return Err(SettlementError::ValSetHeaderAlreadyCommitted {
            epoch: next.epoch,
            last: previous.epoch,
        });
    }
    if next.epoch != previous.epoch + 1 {
        return Err(SettlementError::InvalidEpoch {
            epoch: next.epoch,
            previous: previous.epoch,
        });
    }
    if next.capture_timestamp <= previous.capture_timestamp {
        return Err(SettlementError::InvalidCaptureTimestamp {
            timestamp: next.capture_timestamp,
            previous: previous.capture_timestamp,
        });
    }
    Ok(())
}

/// Invariant: header describes the locally derived validator set.
pub fn invariant_matches_validator_set(
    header: &ValSetHeader,
    set: &ValidatorSet,
) -> SettlementResult<()> {
    let total = set.total_voting_power();
    if total != header.total_voting_power {
        return Err(SettlementError::ValidatorSetMismatch(format!(
            "total voting power {} != derived {}",
            header.total_voting_power, total
        )));
    }
    let root = set.root();
    if root != header.validators_root {
        return Err(SettlementError::ValidatorSetMismatch(format!(
            "validators root 0x{} != derived 0x{}",
            hex::encode(header.validators_root),
            hex::encode(root)
        )));
    }
    Ok(())
}
