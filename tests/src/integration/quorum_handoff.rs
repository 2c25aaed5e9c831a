//! # Quorum Hand-off
//!
//! Each header is attested by the validator set frozen one epoch earlier:
//!
//! ```text
//! genesis (50/30/20, q=60) ──signs──→ epoch 1 (50/30/100, q=120) ──signs──→ epoch 2
//! ```
//!
//! Stake moves between captures change who can sign the *next* header,
//! never the header currently being attested.

#[cfg(test)]
mod tests {
    use primitive_types::U256;

    use settlement_sync::test_utils::{
        expected_set, header_for, operators, seed_registry, sign_commit, TestOperator, ECDSA_TAG,
    };
    use settlement_sync::{
        keccak256, ExtraData, MockChain, PowerCurves, QuorumProof, SettlementError, SyncState,
    };
    use std::sync::Arc;

    use crate::integration::support::replayed_engine;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Network {
        chain: Arc<MockChain>,
        ops: Vec<TestOperator>,
    }

    impl Network {
        fn new() -> Self {
            let chain = Arc::new(MockChain::new());
            let ops = operators(3);
            seed_registry(&chain, &[(&ops[0], 50), (&ops[1], 30), (&ops[2], 20)], 1);
            Self { chain, ops }
        }

        fn genesis_stakes(&self) -> [(&TestOperator, u64); 3] {
            [(&self.ops[0], 50), (&self.ops[1], 30), (&self.ops[2], 20)]
        }

        fn boosted_stakes(&self) -> [(&TestOperator, u64); 3] {
            [(&self.ops[0], 50), (&self.ops[1], 30), (&self.ops[2], 100)]
        }
    }

    // =============================================================================
    // HAND-OFF
    // =============================================================================

    #[tokio::test]
    async fn test_epoch_one_needs_genesis_quorum() -> anyhow::Result<()> {
        let net = Network::new();
        let engine = replayed_engine(&net.chain, PowerCurves::default()).await?;
        let set = expected_set(&net.genesis_stakes());
        engine
            .set_genesis(header_for(&set, 0, 10, 60), ExtraData::empty())
            .await?;

        let header = header_for(&set, 1, 20, 60);
        let extra = ExtraData::empty();

        let weak = sign_commit(&[&net.ops[0]], &header, &extra);
        let result = engine
            .commit_val_set_header(header.clone(), extra.clone(), Some(weak))
            .await;
        match result {
            Err(SettlementError::InsufficientQuorum { signed, threshold }) => {
                assert_eq!(signed, U256::from(50u64));
                assert_eq!(threshold, U256::from(60u64));
            }
            other => panic!("expected insufficient quorum, got {:?}", other),
        }
        assert!(!engine.is_val_set_header_committed_at(1));

        let strong = sign_commit(&[&net.ops[0], &net.ops[2]], &header, &extra);
        let verdict = engine
            .commit_val_set_header(header, extra, Some(strong))
            .await?;
        assert_eq!(verdict.signed_power, U256::from(70u64));
        assert!(engine.is_val_set_header_committed_at(1));
        assert_eq!(engine.state(), SyncState::Synced);
        Ok(())
    }

    #[tokio::test]
    async fn test_stake_increase_hands_off_to_next_epoch() -> anyhow::Result<()> {
        let net = Network::new();
        let op3 = &net.ops[2];
        net.chain
            .set_stake(op3.vault, op3.operator, 15, U256::from(100u64));

        let engine = replayed_engine(&net.chain, PowerCurves::default()).await?;
        let genesis_set = expected_set(&net.genesis_stakes());
        engine
            .set_genesis(header_for(&genesis_set, 0, 10, 60), ExtraData::empty())
            .await?;

        // epoch 1 freezes op3 at 100 but is still signed by the genesis set
        let boosted = expected_set(&net.boosted_stakes());
        let epoch1 = header_for(&boosted, 1, 20, 120);
        let proof = sign_commit(&[&net.ops[0], op3], &epoch1, &ExtraData::empty());
        let verdict = engine
            .commit_val_set_header(epoch1, ExtraData::empty(), Some(proof))
            .await?;
        assert_eq!(verdict.signed_power, U256::from(70u64));
        assert_eq!(
            engine.get_validator_set_at(1)?.total_voting_power(),
            U256::from(180u64)
        );

        // epoch 2 needs 120 out of the epoch 1 set
        let epoch2 = header_for(&boosted, 2, 30, 60);
        let extra = ExtraData::empty();
        let without_op3 = sign_commit(&[&net.ops[0], &net.ops[1]], &epoch2, &extra);
        let result = engine
            .commit_val_set_header(epoch2.clone(), extra.clone(), Some(without_op3))
            .await;
        assert!(matches!(
            result,
            Err(SettlementError::InsufficientQuorum { .. })
        ));

        let with_op3 = sign_commit(&[&net.ops[0], op3], &epoch2, &extra);
        let verdict = engine
            .commit_val_set_header(epoch2, extra, Some(with_op3))
            .await?;
        assert_eq!(verdict.signed_power, U256::from(150u64));
        assert_eq!(verdict.threshold, U256::from(120u64));
        assert_eq!(engine.get_last_committed_epoch(), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_historical_verification_uses_frozen_set() -> anyhow::Result<()> {
        let net = Network::new();
        let op3 = &net.ops[2];
        net.chain
            .set_stake(op3.vault, op3.operator, 15, U256::from(100u64));

        let engine = replayed_engine(&net.chain, PowerCurves::default()).await?;
        let genesis_set = expected_set(&net.genesis_stakes());
        engine
            .set_genesis(header_for(&genesis_set, 0, 10, 60), ExtraData::empty())
            .await?;
        let epoch1 = header_for(&expected_set(&net.boosted_stakes()), 1, 20, 120);
        let proof = sign_commit(&[&net.ops[0], op3], &epoch1, &ExtraData::empty());
        engine
            .commit_val_set_header(epoch1, ExtraData::empty(), Some(proof))
            .await?;

        let message = keccak256(b"settlement batch #7");
        let proof = QuorumProof::Signatures(vec![op3.sign(&message)]);
        let threshold = U256::from(100u64);

        let at_genesis = engine.verify_quorum_sig_at(&message, ECDSA_TAG, threshold, &proof, 0)?;
        assert!(!at_genesis.is_accepted());
        assert_eq!(at_genesis.signed_power, U256::from(20u64));

        let at_one = engine.verify_quorum_sig_at(&message, ECDSA_TAG, threshold, &proof, 1)?;
        assert!(at_one.is_accepted());
        assert_eq!(at_one.accepted, vec![op3.operator]);

        let live = engine
            .verify_quorum_sig(&message, ECDSA_TAG, threshold, &proof)
            .await?;
        assert!(live.is_accepted());

        assert!(matches!(
            engine.verify_quorum_sig_at(&message, ECDSA_TAG, threshold, &proof, 5),
            Err(SettlementError::HeaderNotCommitted { epoch: 5 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_outsider_signature_does_not_count() -> anyhow::Result<()> {
        let net = Network::new();
        let engine = replayed_engine(&net.chain, PowerCurves::default()).await?;
        let set = expected_set(&net.genesis_stakes());
        engine
            .set_genesis(header_for(&set, 0, 10, 60), ExtraData::empty())
            .await?;

        let outsider = TestOperator::new(9);
        let message = keccak256(b"payload");
        let proof = QuorumProof::Signatures(vec![
            outsider.sign(&message),
            net.ops[1].sign(&message),
            net.ops[1].sign(&message),
        ]);
        let verdict =
            engine.verify_quorum_sig_at(&message, ECDSA_TAG, U256::from(30u64), &proof, 0)?;

        assert!(verdict.is_accepted());
        assert_eq!(verdict.signed_power, U256::from(30u64));
        assert_eq!(verdict.rejected.len(), 2);
        Ok(())
    }
}
