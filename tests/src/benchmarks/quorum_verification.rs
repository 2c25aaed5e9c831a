//! # Quorum Verification Benchmarks
//!
//! Claims to validate:
//! - Individual ECDSA proofs verify in parallel (rayon), scaling with cores
//! - One BLS aggregate check beats N individual checks for large sets
//! - Excluded signers (unknown, duplicate) cost no signature check
//!
//! Conditions:
//! - Sets of 10 to 200 validators
//! - Full participation and bare-threshold participation

use blst::min_sig::{AggregateSignature, SecretKey, Signature};
use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use primitive_types::U256;
use rand::RngCore;
use std::time::Duration;

use settlement_sync::algorithms::schemes::BLS_DST;
use settlement_sync::test_utils::{TestOperator, ECDSA_TAG};
use settlement_sync::{
    keccak256, verify_quorum, Address, Key, KeyTag, KeyType, QuorumProof, SchemeRegistry,
    Validator, ValidatorSet,
};

fn ecdsa_committee(size: u8) -> (Vec<TestOperator>, ValidatorSet) {
    let ops: Vec<TestOperator> = (1..=size).map(TestOperator::new).collect();
    let set = ValidatorSet::new(
        ops.iter()
            .map(|op| Validator {
                operator: op.operator,
                voting_power: U256::from(100u64),
                keys: vec![Key {
                    tag: ECDSA_TAG,
                    payload: op.key_payload(),
                }],
            })
            .collect(),
    );
    (ops, set)
}

struct BlsCommittee {
    operators: Vec<Address>,
    secrets: Vec<SecretKey>,
    set: ValidatorSet,
}

fn bls_tag() -> KeyTag {
    KeyTag::from_parts(KeyType::BLS12_381, 0)
}

fn bls_committee(size: u8) -> BlsCommittee {
    let mut rng = rand::thread_rng();
    let mut operators = Vec::new();
    let mut secrets = Vec::new();
    let mut validators = Vec::new();
    for i in 1..=size {
        let mut ikm = [0u8; 32];
        rng.fill_bytes(&mut ikm);
        let sk = SecretKey::key_gen(&ikm, &[]).expect("ikm is 32 bytes");
        let operator = [i; 20];
        validators.push(Validator {
            operator,
            voting_power: U256::from(100u64),
            keys: vec![Key {
                tag: bls_tag(),
                payload: sk.sk_to_pk().to_bytes().to_vec(),
            }],
        });
        operators.push(operator);
        secrets.push(sk);
    }
    BlsCommittee {
        operators,
        secrets,
        set: ValidatorSet::new(validators),
    }
}

fn aggregate(secrets: &[SecretKey], message: &[u8]) -> Vec<u8> {
    let sigs: Vec<Signature> = secrets
        .iter()
        .map(|sk| sk.sign(message, BLS_DST, &[]))
        .collect();
    let refs: Vec<&Signature> = sigs.iter().collect();
    AggregateSignature::aggregate(&refs, true)
        .expect("non-empty signature list")
        .to_signature()
        .to_bytes()
        .to_vec()
}

pub fn register_benchmarks(c: &mut Criterion) {
    let schemes = SchemeRegistry::with_defaults();
    let message = keccak256(b"validator set header");

    let mut group = c.benchmark_group("settlement/quorum");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for size in [10u8, 50, 100, 200] {
        let (ops, set) = ecdsa_committee(size);
        let threshold = set.total_voting_power() * U256::from(2u64) / U256::from(3u64);

        let full = QuorumProof::Signatures(ops.iter().map(|op| op.sign(&message)).collect());
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("ecdsa_full", size), &full, |b, proof| {
            b.iter(|| {
                black_box(verify_quorum(
                    &schemes,
                    &set,
                    &message,
                    ECDSA_TAG,
                    threshold,
                    black_box(proof),
                ))
            })
        });

        // two thirds of the signers, plus every signature sent twice
        let quorum = (size as usize * 2).div_ceil(3);
        let noisy = QuorumProof::Signatures(
            ops.iter()
                .take(quorum)
                .flat_map(|op| [op.sign(&message), op.sign(&message)])
                .collect(),
        );
        group.bench_with_input(BenchmarkId::new("ecdsa_duplicates", size), &noisy, |b, proof| {
            b.iter(|| {
                black_box(verify_quorum(
                    &schemes,
                    &set,
                    &message,
                    ECDSA_TAG,
                    threshold,
                    black_box(proof),
                ))
            })
        });

        let committee = bls_committee(size);
        let aggregated = QuorumProof::Aggregated {
            signers: committee.operators.clone(),
            signature: aggregate(&committee.secrets, &message),
        };
        group.bench_with_input(
            BenchmarkId::new("bls_aggregate", size),
            &aggregated,
            |b, proof| {
                b.iter(|| {
                    black_box(verify_quorum(
                        &schemes,
                        &committee.set,
                        &message,
                        bls_tag(),
                        threshold,
                        black_box(proof),
                    ))
                })
            },
        );
    }

    group.finish();
}
