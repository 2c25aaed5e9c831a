//! # Key Registry
//!
//! `setKey` submissions are checked locally before they reach the chain;
//! the resulting `SetKey` events feed the key history back into the engine.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use settlement_sync::test_utils::{operators, seed_registry, TestOperator, ECDSA_TAG};
    use settlement_sync::{
        key_ownership_message, ChainEventSource, MockChain, PowerCurves, SettlementEngine,
        SettlementError, Submission,
    };

    use crate::integration::support::replayed_engine;

    /// Apply every event logged at or after `from`; returns the next block.
    async fn catch_up(engine: &SettlementEngine<MockChain>, from: u64) -> anyhow::Result<u64> {
        let batch = engine.chain().poll_events(from).await?;
        for event in &batch.events {
            engine.apply_event(event)?;
        }
        Ok(batch.next_block)
    }

    #[tokio::test]
    async fn test_set_key_round_trip() -> anyhow::Result<()> {
        let chain = Arc::new(MockChain::new());
        let engine = replayed_engine(&chain, PowerCurves::default()).await?;
        let op = TestOperator::new(7);

        chain.set_timestamp(5);
        engine
            .submit_key(
                chain.as_ref(),
                op.operator,
                ECDSA_TAG,
                op.key_payload(),
                op.sign_ownership(ECDSA_TAG),
                Vec::new(),
            )
            .await?;
        assert_eq!(
            chain.submissions(),
            vec![Submission::SetKey {
                operator: op.operator,
                tag: ECDSA_TAG,
                payload: op.key_payload(),
            }]
        );

        catch_up(&engine, 0).await?;
        assert_eq!(engine.keys().get_key(&op.operator, ECDSA_TAG)?, op.key_payload());
        assert_eq!(engine.keys().get_operator(&op.key_payload())?, op.operator);
        assert_eq!(
            engine.keys().get_key_at(&op.operator, ECDSA_TAG, 5)?,
            op.key_payload()
        );
        assert!(matches!(
            engine.keys().get_key_at(&op.operator, ECDSA_TAG, 4),
            Err(SettlementError::KeyNotSet { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_possession_proof_never_submitted() -> anyhow::Result<()> {
        let chain = Arc::new(MockChain::new());
        let engine = replayed_engine(&chain, PowerCurves::default()).await?;
        let op = TestOperator::new(7);
        let other = TestOperator::new(8);

        let result = engine
            .submit_key(
                chain.as_ref(),
                op.operator,
                ECDSA_TAG,
                op.key_payload(),
                other.sign_ownership(ECDSA_TAG),
                Vec::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(SettlementError::InvalidKeySignature { .. })
        ));
        assert!(chain.submissions().is_empty());
        assert!(engine.keys().get_key(&op.operator, ECDSA_TAG).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_key_cannot_be_claimed_twice() -> anyhow::Result<()> {
        let chain = Arc::new(MockChain::new());
        let ops = operators(2);
        seed_registry(&chain, &[(&ops[0], 10), (&ops[1], 10)], 1);
        let engine = replayed_engine(&chain, PowerCurves::default()).await?;

        // op1's key, with a valid possession proof for op2's claim
        let stolen = ops[0].key_payload();
        let message = key_ownership_message(&ops[1].operator, ECDSA_TAG, &stolen);
        let signature = ops[0].sign_bytes(&message);

        let result = engine
            .submit_key(
                chain.as_ref(),
                ops[1].operator,
                ECDSA_TAG,
                stolen,
                signature,
                Vec::new(),
            )
            .await;

        match result {
            Err(SettlementError::AlreadyUsed { owner }) => assert_eq!(owner, ops[0].operator),
            other => panic!("expected AlreadyUsed, got {:?}", other),
        }
        assert!(chain.submissions().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_key_rotation_keeps_history() -> anyhow::Result<()> {
        let chain = Arc::new(MockChain::new());
        let ops = operators(1);
        seed_registry(&chain, &[(&ops[0], 10)], 1);
        let engine = replayed_engine(&chain, PowerCurves::default()).await?;
        let next_block = chain.poll_events(0).await?.next_block;

        let old = ops[0].key_payload();
        let rotated = TestOperator::new(1);
        assert_eq!(rotated.operator, ops[0].operator);

        chain.set_timestamp(20);
        engine
            .submit_key(
                chain.as_ref(),
                rotated.operator,
                ECDSA_TAG,
                rotated.key_payload(),
                rotated.sign_ownership(ECDSA_TAG),
                Vec::new(),
            )
            .await?;
        catch_up(&engine, next_block).await?;

        let keys = engine.keys();
        assert_eq!(keys.get_key_at(&rotated.operator, ECDSA_TAG, 10)?, old);
        assert_eq!(
            keys.get_key_at(&rotated.operator, ECDSA_TAG, 20)?,
            rotated.key_payload()
        );
        assert_eq!(keys.get_operator(&rotated.key_payload())?, rotated.operator);
        assert!(matches!(
            keys.get_operator(&old),
            Err(SettlementError::UnknownKey(_))
        ));

        let before = engine
            .voting_power()
            .derive_validator_set(keys, Some(10))
            .await?;
        let after = engine
            .voting_power()
            .derive_validator_set(keys, Some(25))
            .await?;
        assert_eq!(
            before.get(&rotated.operator).and_then(|v| v.key(ECDSA_TAG)),
            Some(old.as_slice())
        );
        assert_eq!(
            after.get(&rotated.operator).and_then(|v| v.key(ECDSA_TAG)),
            Some(rotated.key_payload().as_slice())
        );
        Ok(())
    }
}
