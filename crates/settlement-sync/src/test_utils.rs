//! Test fixtures: ECDSA operators and a seeded mock registry.
//!
//! Requires feature: `test-utils` (always on for unit tests).

use k256::ecdsa::SigningKey;
use primitive_types::U256;

use crate::algorithms::key_ownership_message;
use crate::algorithms::schemes::address_from_verifying_key;
use crate::domain::{
    keccak256, Address, ChainEvent, Epoch, ExtraData, Key, KeyTag, QuorumProof, SignerSignature,
    Timestamp, ValSetCommit, ValSetHeader, Validator, ValidatorSet, VaultInfo,
    SUPPORTED_HEADER_VERSION,
};
use crate::ports::MockChain;

/// ECDSA secp256k1 tag used by the fixtures.
pub const ECDSA_TAG: KeyTag = KeyTag(0x10);

/// Collateral token every fixture vault uses.
pub const TOKEN: Address = [0xC0; 20];

/// Operator with one dedicated vault and an ECDSA key.
pub struct TestOperator {
    /// Operator address
    pub operator: Address,
    /// Operator-specific vault
    pub vault: Address,
    sk: SigningKey,
}

impl TestOperator {
    /// Operator `[index; 20]` with a fresh random key.
    pub fn new(index: u8) -> Self {
        let mut vault = [index; 20];
        vault[0] = 0xA0;
        Self {
            operator: [index; 20],
            vault,
            sk: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Key payload (address of the signing key).
    pub fn key_payload(&self) -> Vec<u8> {
        address_from_verifying_key(self.sk.verifying_key()).to_vec()
    }

    /// 65-byte `r || s || v` signature over keccak(`message`).
    pub fn sign_bytes(&self, message: &[u8]) -> Vec<u8> {
        let (sig, recid) = self
            .sk
            .sign_prehash_recoverable(&keccak256(message))
            .expect("prehash signing");
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte());
        bytes
    }

    /// Signature attributed to this operator.
    pub fn sign(&self, message: &[u8]) -> SignerSignature {
        SignerSignature {
            operator: self.operator,
            signature: self.sign_bytes(message),
        }
    }

    /// Proof of possession for binding this operator's key under `tag`.
    pub fn sign_ownership(&self, tag: KeyTag) -> Vec<u8> {
        let message = key_ownership_message(&self.operator, tag, &self.key_payload());
        self.sign_bytes(&message)
    }
}

/// `count` operators numbered from 1.
pub fn operators(count: u8) -> Vec<TestOperator> {
    (1..=count).map(TestOperator::new).collect()
}

/// Emit token, operator, vault and key events at `at` and set each
/// operator's stake in its vault.
pub fn seed_registry(chain: &MockChain, stakes: &[(&TestOperator, u64)], at: Timestamp) {
    chain.emit(ChainEvent::RegisterToken {
        token: TOKEN,
        timestamp: at,
    });
    for (op, stake) in stakes {
        chain.emit(ChainEvent::RegisterOperator {
            operator: op.operator,
            timestamp: at,
        });
        chain.emit(ChainEvent::RegisterOperatorVault {
            operator: op.operator,
            vault: op.vault,
            timestamp: at,
        });
        chain.emit(ChainEvent::SetKey {
            operator: op.operator,
            tag: ECDSA_TAG,
            payload: op.key_payload(),
            timestamp: at,
        });
        chain.set_vault_info(
            op.vault,
            VaultInfo {
                collateral: TOKEN,
                has_slasher: true,
                epoch_duration: 7 * 24 * 3600,
            },
        );
        chain.set_stake(op.vault, op.operator, at, U256::from(*stake));
    }
}

/// Validator set the engine derives from [`seed_registry`] with the same stakes.
pub fn expected_set(stakes: &[(&TestOperator, u64)]) -> ValidatorSet {
    ValidatorSet::new(
        stakes
            .iter()
            .map(|(op, stake)| Validator {
                operator: op.operator,
                voting_power: U256::from(*stake),
                keys: vec![Key {
                    tag: ECDSA_TAG,
                    payload: op.key_payload(),
                }],
            })
            .collect(),
    )
}

/// Header describing `set` at `epoch`.
pub fn header_for(
    set: &ValidatorSet,
    epoch: Epoch,
    capture_timestamp: Timestamp,
    quorum_threshold: u64,
) -> ValSetHeader {
    ValSetHeader {
        version: SUPPORTED_HEADER_VERSION,
        required_key_tag: ECDSA_TAG,
        epoch,
        capture_timestamp,
        quorum_threshold: U256::from(quorum_threshold),
        total_voting_power: set.total_voting_power(),
        validators_root: set.root(),
    }
}

/// Individual-signature proof of `header` + `extra_data` by `signers`.
pub fn sign_commit(
    signers: &[&TestOperator],
    header: &ValSetHeader,
    extra_data: &ExtraData,
) -> QuorumProof {
    let message = header.commit_message(extra_data);
    QuorumProof::Signatures(signers.iter().map(|s| s.sign(&message)).collect())
}

/// Signed commit of `header` with empty extra data.
pub fn signed_commit(signers: &[&TestOperator], header: ValSetHeader) -> ValSetCommit {
    signed_commit_with(signers, header, ExtraData::empty())
}

/// Signed commit of `header` with `extra_data`.
pub fn signed_commit_with(
    signers: &[&TestOperator],
    header: ValSetHeader,
    extra_data: ExtraData,
) -> ValSetCommit {
    let proof = sign_commit(signers, &header, &extra_data);
    ValSetCommit {
        header,
        extra_data,
        proof: Some(proof),
    }
}
