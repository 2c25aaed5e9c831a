//! # Settlement Benchmarks
//!
//! | Component | Claim | Target |
//! |-----------|-------|--------|
//! | Checkpoint Store | O(log n) historical lookup | < 1μs at 1M points |
//! | Checkpoint Store | O(1) hinted lookup | < 100ns |
//! | Quorum Verifier | 100 ECDSA signers | < 10ms |
//! | Quorum Verifier | 100 BLS signers, one aggregate | < 5ms |

#![allow(clippy::excessive_nesting)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

use settlement_sync::algorithms::schemes::EcdsaScheme;
use settlement_sync::test_utils::TestOperator;
use settlement_sync::{keccak256, KeyScheme};

// ============================================================================
// Baseline: one recoverable ECDSA check, no quorum bookkeeping
// ============================================================================

fn bench_single_ecdsa_recovery(c: &mut Criterion) {
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    let mut group = c.benchmark_group("settlement/baseline");
    group.measurement_time(Duration::from_secs(5));

    let op = TestOperator::new(1);
    let message = keccak256(b"baseline");
    let sig_bytes = op.sign_bytes(&message);
    let payload = op.key_payload();

    group.bench_function("k256_recover_prehash", |b| {
        b.iter(|| {
            let signature = Signature::from_slice(&sig_bytes[..64]).ok();
            let recid = RecoveryId::from_byte(sig_bytes[64]);
            black_box(signature.zip(recid).and_then(|(sig, id)| {
                VerifyingKey::recover_from_prehash(&keccak256(&message), &sig, id).ok()
            }))
        })
    });

    group.bench_function("ecdsa_scheme_verify", |b| {
        b.iter(|| black_box(EcdsaScheme.verify(&payload, &sig_bytes, black_box(&message))))
    });

    group.finish();
}

fn bench_checkpoints(c: &mut Criterion) {
    settlement_tests::benchmarks::checkpoint_lookup::register_benchmarks(c);
}

fn bench_quorum(c: &mut Criterion) {
    settlement_tests::benchmarks::quorum_verification::register_benchmarks(c);
}

criterion_group!(
    benches,
    bench_single_ecdsa_recovery,
    bench_checkpoints,
    bench_quorum
);
criterion_main!(benches);
