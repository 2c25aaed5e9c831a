//! # Quorum Verifier
//!
//! Checks a multi-signer proof against a frozen validator set.
//!
//! ```text
//! [PENDING] ──signed power ≥ threshold──→ [ACCEPTED]
//!     │
//!     └──────signed power < threshold──→ [REJECTED]
//! ```
//!
//! A bad individual signature only excludes that signer. Duplicate claims,
//! unknown operators and operators without a key for the tag are excluded
//! the same way. Aggregated proofs are all-or-nothing over the signers that
//! resolved to a key.

use primitive_types::U256;
use rayon::prelude::*;
use std::collections::HashSet;

use super::schemes::SchemeRegistry;
use crate::domain::{
    Address, KeyTag, QuorumProof, SettlementError, SettlementResult, ValidatorSet, VotingPower,
};

/// Verification outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuorumStatus {
    /// Not evaluated yet.
    Pending,
    /// Signed power reached the threshold.
    Accepted,
    /// Signed power below the threshold.
    Rejected,
}

/// Why a claimed signer did not count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Signer already claimed earlier in the proof.
    Duplicate,
    /// Not in the validator set.
    UnknownOperator,
    /// No key for the required tag.
    MissingKey,
    /// Signature did not verify.
    InvalidSignature,
}

/// Result of one verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumVerdict {
    /// Final status.
    pub status: QuorumStatus,
    /// Voting power of verified signers.
    pub signed_power: VotingPower,
    /// Threshold applied.
    pub threshold: VotingPower,
    /// Verified signers, in proof order.
    pub accepted: Vec<Address>,
    /// Excluded signers.
    pub rejected: Vec<(Address, ExclusionReason)>,
}

impl QuorumVerdict {
    fn pending(threshold: VotingPower) -> Self {
        Self {
            status: QuorumStatus::Pending,
            signed_power: U256::zero(),
            threshold,
            accepted: Vec::new(),
            rejected: Vec::new(),
        }
    }

    fn accept(&mut self, operator: Address, power: VotingPower) {
        self.signed_power = self.signed_power.saturating_add(power);
        self.accepted.push(operator);
    }

    fn exclude(&mut self, operator: Address, reason: ExclusionReason) {
        self.rejected.push((operator, reason));
    }

    fn finalize(mut self) -> Self {
        self.status = if self.signed_power >= self.threshold {
            QuorumStatus::Accepted
        } else {
            QuorumStatus::Rejected
        };
        self
    }

    /// Whether the quorum was reached.
    pub fn is_accepted(&self) -> bool {
        self.status == QuorumStatus::Accepted
    }

    /// `InsufficientQuorum` unless accepted.
    pub fn into_result(self) -> SettlementResult<Self> {
        if self.is_accepted() {
            Ok(self)
        } else {
            Err(SettlementError::InsufficientQuorum {
                signed: self.signed_power,
                threshold: self.threshold,
            })
        }
    }
}

struct Candidate<'a> {
    operator: Address,
    power: VotingPower,
    key: &'a [u8],
}

/// Dedupe claimed signers and resolve them against `set`.
fn resolve<'a>(
    set: &'a ValidatorSet,
    tag: KeyTag,
    claimed: impl Iterator<Item = Address>,
    verdict: &mut QuorumVerdict,
) -> Vec<(usize, Candidate<'a>)> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for (i, operator) in claimed.enumerate() {
        if !seen.insert(operator) {
            verdict.exclude(operator, ExclusionReason::Duplicate);
            continue;
        }
        let Some(validator) = set.get(&operator) else {
            verdict.exclude(operator, ExclusionReason::UnknownOperator);
            continue;
        };
        let Some(key) = validator.key(tag) else {
            verdict.exclude(operator, ExclusionReason::MissingKey);
            continue;
        };
        candidates.push((
            i,
            Candidate {
                operator,
                power: validator.voting_power,
                key,
            },
        ));
    }
    candidates
}

/// Verify `proof` over `message` against `set` for `tag` and `threshold`.
///
/// Errors only when the proof cannot be evaluated at all (unknown scheme,
/// aggregated proof for a scheme without aggregation); an insufficient
/// quorum is a `Rejected` verdict.
pub fn verify_quorum(
    schemes: &SchemeRegistry,
    set: &ValidatorSet,
    message: &[u8],
    tag: KeyTag,
    threshold: VotingPower,
    proof: &QuorumProof,
) -> SettlementResult<QuorumVerdict> {
    let scheme = schemes.get(tag)?;
    let mut verdict = QuorumVerdict::pending(threshold);

    match proof {
        QuorumProof::Signatures(signatures) => {
            let candidates = resolve(
                set,
                tag,
                signatures.iter().map(|s| s.operator),
                &mut verdict,
            );

            let results: Vec<bool> = candidates
                .par_iter()
                .map(|(i, c)| scheme.verify(c.key, &signatures[*i].signature, message))
                .collect();

            for ((_, candidate), valid) in candidates.into_iter().zip(results) {
                if valid {
                    verdict.accept(candidate.operator, candidate.power);
                } else {
                    verdict.exclude(candidate.operator, ExclusionReason::InvalidSignature);
                }
            }
        }
        QuorumProof::Aggregated { signers, signature } => {
            let candidates = resolve(set, tag, signers.iter().copied(), &mut verdict);
            let keys: Vec<&[u8]> = candidates.iter().map(|(_, c)| c.key).collect();

            let valid = if keys.is_empty() {
                false
            } else {
                scheme
                    .verify_aggregate(&keys, signature, message)
                    .ok_or_else(|| {
                        SettlementError::InvalidProofFormat(format!(
                            "{} does not support aggregated proofs",
                            scheme.name()
                        ))
                    })?
            };

            for (_, candidate) in candidates {
                if valid {
                    verdict.accept(candidate.operator, candidate.power);
                } else {
                    verdict.exclude(candidate.operator, ExclusionReason::InvalidSignature);
                }
            }
        }
    }

    Ok(verdict.finalize())
}
