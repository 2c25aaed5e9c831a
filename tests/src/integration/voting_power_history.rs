//! # Voting Power History
//!
//! Registry membership replayed from chain events, combined with stake
//! reads, must answer "what was this operator's power at τ" for any past τ.

#[cfg(test)]
mod tests {
    use primitive_types::U256;
    use std::sync::Arc;

    use settlement_sync::test_utils::{operators, seed_registry, TestOperator, TOKEN};
    use settlement_sync::{
        Address, ChainEvent, MockChain, PowerCurve, PowerCurves, SlashingData, VaultInfo,
        VaultValue,
    };

    use crate::integration::support::replayed_engine;

    const SHARED: Address = [0xB0; 20];

    fn seeded() -> (Arc<MockChain>, Vec<TestOperator>) {
        let chain = Arc::new(MockChain::new());
        let ops = operators(2);
        seed_registry(&chain, &[(&ops[0], 40), (&ops[1], 60)], 1);
        (chain, ops)
    }

    fn value(vault: Address, amount: u64) -> VaultValue {
        VaultValue {
            vault,
            value: U256::from(amount),
        }
    }

    #[tokio::test]
    async fn test_vault_unregister_and_return() -> anyhow::Result<()> {
        let (chain, ops) = seeded();
        let op = &ops[0];
        chain.emit(ChainEvent::UnregisterOperatorVault {
            operator: op.operator,
            vault: op.vault,
            timestamp: 20,
        });
        chain.emit(ChainEvent::RegisterOperatorVault {
            operator: op.operator,
            vault: op.vault,
            timestamp: 40,
        });
        let engine = replayed_engine(&chain, PowerCurves::default()).await?;
        let power = engine.voting_power();

        assert_eq!(
            power.get_operator_voting_powers(&op.operator, &[], Some(10)).await?,
            vec![value(op.vault, 40)]
        );
        assert!(power
            .get_operator_voting_powers(&op.operator, &[], Some(25))
            .await?
            .is_empty());
        assert_eq!(
            power.get_operator_voting_powers(&op.operator, &[], Some(45)).await?,
            vec![value(op.vault, 40)]
        );

        let set = power.derive_validator_set(engine.keys(), Some(25)).await?;
        assert_eq!(set.len(), 1);
        assert!(set.get(&op.operator).is_none());
        assert!(power.is_operator_vault_registered(&op.vault));
        Ok(())
    }

    #[tokio::test]
    async fn test_shared_vault_counts_for_every_operator() -> anyhow::Result<()> {
        let (chain, ops) = seeded();
        chain.emit(ChainEvent::RegisterSharedVault {
            vault: SHARED,
            timestamp: 5,
        });
        chain.set_vault_info(
            SHARED,
            VaultInfo {
                collateral: TOKEN,
                has_slasher: true,
                epoch_duration: 7 * 24 * 3600,
            },
        );
        chain.set_stake(SHARED, ops[0].operator, 5, U256::from(10u64));
        chain.set_stake(SHARED, ops[1].operator, 5, U256::from(15u64));

        let engine = replayed_engine(&chain, PowerCurves::default()).await?;
        let power = engine.voting_power();

        assert_eq!(
            power
                .get_operator_voting_powers(&ops[0].operator, &[], Some(10))
                .await?,
            vec![value(ops[0].vault, 40), value(SHARED, 10)]
        );
        // before registration only the dedicated vault counts
        assert_eq!(
            power
                .get_operator_voting_powers(&ops[1].operator, &[], Some(3))
                .await?,
            vec![value(ops[1].vault, 60)]
        );

        let totals: Vec<U256> = power
            .get_voting_powers(&[], Some(10))
            .await?
            .iter()
            .map(|p| p.total())
            .collect();
        assert_eq!(totals, vec![U256::from(50u64), U256::from(75u64)]);
        assert!(power.is_shared_vault_registered(&SHARED));
        Ok(())
    }

    #[tokio::test]
    async fn test_unregistered_token_zeroes_power() -> anyhow::Result<()> {
        let (chain, ops) = seeded();
        chain.emit(ChainEvent::UnregisterToken {
            token: TOKEN,
            timestamp: 30,
        });
        let engine = replayed_engine(&chain, PowerCurves::default()).await?;
        let power = engine.voting_power();

        let before = power.derive_validator_set(engine.keys(), Some(25)).await?;
        assert_eq!(before.total_voting_power(), U256::from(100u64));

        let after = power.derive_validator_set(engine.keys(), Some(35)).await?;
        assert!(after.is_empty());
        assert!(power
            .get_operator_voting_powers(&ops[1].operator, &[], None)
            .await?
            .is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_slashing_requirement_filters_vaults() -> anyhow::Result<()> {
        let (chain, _ops) = seeded();
        chain.emit(ChainEvent::SetSlashingData {
            data: SlashingData {
                require_slasher: true,
                min_vault_epoch_duration: 14 * 24 * 3600,
            },
            timestamp: 50,
        });
        chain.emit(ChainEvent::SetSlashingData {
            data: SlashingData {
                require_slasher: true,
                min_vault_epoch_duration: 24 * 3600,
            },
            timestamp: 60,
        });
        let engine = replayed_engine(&chain, PowerCurves::default()).await?;
        let power = engine.voting_power();

        assert!(power
            .derive_validator_set(engine.keys(), Some(55))
            .await?
            .is_empty());
        assert_eq!(
            power
                .derive_validator_set(engine.keys(), Some(65))
                .await?
                .total_voting_power(),
            U256::from(100u64)
        );
        assert!(power.get_slashing_data_at(Some(55)).require_slasher);
        assert_eq!(power.get_slashing_data_at(Some(10)), SlashingData::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_per_vault_curve() -> anyhow::Result<()> {
        let (chain, ops) = seeded();
        let mut curves = PowerCurves::default();
        curves.set(
            ops[0].vault,
            Arc::new(PowerCurve::Capped {
                cap: U256::from(25u64),
            }),
        );
        let engine = replayed_engine(&chain, curves).await?;

        let powers = engine.voting_power().get_voting_powers(&[], Some(10)).await?;
        assert_eq!(powers.len(), 2);
        assert_eq!(powers[0].operator, ops[0].operator);
        assert_eq!(powers[0].total(), U256::from(25u64));
        assert_eq!(powers[1].total(), U256::from(60u64));
        Ok(())
    }

    #[tokio::test]
    async fn test_stake_history_is_read_at_capture() -> anyhow::Result<()> {
        let (chain, ops) = seeded();
        chain.set_stake(ops[1].vault, ops[1].operator, 20, U256::from(5u64));
        let engine = replayed_engine(&chain, PowerCurves::default()).await?;
        let power = engine.voting_power();

        let at = |ts| power.get_operator_voting_powers(&ops[1].operator, &[], ts);
        assert_eq!(at(Some(19)).await?, vec![value(ops[1].vault, 60)]);
        assert_eq!(at(Some(20)).await?, vec![value(ops[1].vault, 5)]);
        assert_eq!(at(None).await?, vec![value(ops[1].vault, 5)]);
        Ok(())
    }
}
