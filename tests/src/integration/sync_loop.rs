//! # Sync Loop
//!
//! The full background pipeline against a live mock chain:
//!
//! ```text
//! MockChain ──poll──→ event poller ──feed──→ SyncService ──commit──→ SettlementEngine
//!     ↑                                                                    │
//!     └──────────────── header / stake / vault reads (retried) ────────────┘
//! ```

#[cfg(test)]
mod tests {
    use primitive_types::U256;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    use settlement_sync::test_utils::{
        expected_set, header_for, operators, seed_registry, signed_commit, signed_commit_with,
        TestOperator, ECDSA_TAG, TOKEN,
    };
    use settlement_sync::{
        ChainEvent, ExtraData, MockChain, PowerCurves, SchemeRegistry, SettlementConfig,
        SettlementEngine, SyncService, SyncState, Timestamp, VaultInfo,
    };
    use settlement_telemetry::REORGS_DETECTED;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Running {
        chain: Arc<MockChain>,
        engine: Arc<SettlementEngine<MockChain>>,
        ops: Vec<TestOperator>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    impl Running {
        /// Three operators (50/30/20), genesis at capture 10, loop started.
        fn start() -> Self {
            settlement_telemetry::init_test_logging();
            let chain = Arc::new(MockChain::new());
            let ops = operators(3);
            seed_registry(&chain, &[(&ops[0], 50), (&ops[1], 30), (&ops[2], 20)], 1);
            let set = expected_set(&[(&ops[0], 50), (&ops[1], 30), (&ops[2], 20)]);
            chain.set_genesis_commit(header_for(&set, 0, 10, 60), ExtraData::empty());

            let engine = Arc::new(SettlementEngine::new(
                SettlementConfig::for_testing(),
                chain.clone(),
                SchemeRegistry::with_defaults(),
                PowerCurves::default(),
            ));
            let cancel = CancellationToken::new();
            let task = tokio::spawn(
                SyncService::new(engine.clone(), chain.clone()).run(0, cancel.clone()),
            );
            Self {
                chain,
                engine,
                ops,
                cancel,
                task,
            }
        }

        async fn wait_for(&self, condition: impl Fn(&SettlementEngine<MockChain>) -> bool) {
            let engine: &SettlementEngine<MockChain> = &self.engine;
            let reached = tokio::time::timeout(Duration::from_secs(10), async {
                while !condition(engine) {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await;
            assert!(reached.is_ok(), "condition not reached, state {:?}", engine.state());
        }

        async fn wait_for_epoch(&self, epoch: u64) {
            self.wait_for(|e| e.get_last_committed_epoch() == Some(epoch))
                .await;
        }

        async fn stop(self) {
            self.cancel.cancel();
            let stopped = tokio::time::timeout(Duration::from_secs(5), self.task).await;
            assert!(stopped.is_ok(), "sync loop did not stop");
        }
    }

    /// Register `op` with a fresh vault and key at `at`.
    fn onboard(chain: &MockChain, op: &TestOperator, stake: u64, at: Timestamp) {
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
        chain.set_stake(op.vault, op.operator, at, U256::from(stake));
    }

    // =============================================================================
    // SCENARIOS
    // =============================================================================

    #[tokio::test]
    async fn test_follows_new_operator_and_headers() {
        let node = Running::start();
        node.wait_for_epoch(0).await;
        assert_eq!(node.engine.state(), SyncState::Synced);

        // a fourth operator joins before the epoch 1 capture
        let newcomer = TestOperator::new(4);
        onboard(&node.chain, &newcomer, 40, 15);
        let grown = expected_set(&[
            (&node.ops[0], 50),
            (&node.ops[1], 30),
            (&node.ops[2], 20),
            (&newcomer, 40),
        ]);
        node.chain.push_commit(signed_commit(
            &[&node.ops[0], &node.ops[1]],
            header_for(&grown, 1, 20, 100),
        ));
        node.wait_for_epoch(1).await;

        let frozen = node.engine.get_validator_set_at(1).expect("epoch 1");
        assert_eq!(frozen.total_voting_power(), U256::from(140u64));
        assert!(frozen.get(&newcomer.operator).is_some());

        // epoch 2 must be signed with 100 of the epoch 1 set
        node.chain.push_commit(signed_commit(
            &[&node.ops[0], &newcomer, &node.ops[2]],
            header_for(&grown, 2, 30, 100),
        ));
        node.wait_for_epoch(2).await;
        assert_eq!(node.engine.state(), SyncState::Synced);

        node.stop().await;
    }

    #[tokio::test]
    async fn test_recovers_from_rpc_outage() {
        let node = Running::start();
        node.wait_for_epoch(0).await;

        let set = expected_set(&[(&node.ops[0], 50), (&node.ops[1], 30), (&node.ops[2], 20)]);
        // longer than one retry budget: at least one tick goes stale
        node.chain.fail_next(12);
        node.chain
            .push_commit(signed_commit(&[&node.ops[0], &node.ops[1]], header_for(&set, 1, 20, 60)));

        node.wait_for_epoch(1).await;
        node.wait_for(|e| e.state() == SyncState::Synced).await;
        node.stop().await;
    }

    #[tokio::test]
    async fn test_rejected_header_is_not_committed() {
        let node = Running::start();
        node.wait_for_epoch(0).await;

        let set = expected_set(&[(&node.ops[0], 50), (&node.ops[1], 30), (&node.ops[2], 20)]);
        // 30 of 60 required
        node.chain
            .push_commit(signed_commit(&[&node.ops[1]], header_for(&set, 1, 20, 60)));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(node.engine.get_last_committed_epoch(), Some(0));
        assert!(!node.engine.is_val_set_header_committed_at(1));
        assert_ne!(node.engine.state(), SyncState::Synced);

        node.stop().await;
    }

    #[tokio::test]
    async fn test_reorg_replaces_committed_epoch() {
        let node = Running::start();
        let set = expected_set(&[(&node.ops[0], 50), (&node.ops[1], 30), (&node.ops[2], 20)]);
        node.chain
            .push_commit(signed_commit(&[&node.ops[0], &node.ops[2]], header_for(&set, 1, 20, 60)));
        node.wait_for_epoch(1).await;
        let original = node.engine.get_val_set_header_hash_at(1).expect("epoch 1");
        let reorgs = REORGS_DETECTED.get();

        let replacement = signed_commit_with(
            &[&node.ops[0], &node.ops[1]],
            header_for(&set, 1, 22, 60),
            ExtraData::from_pairs([([7u8; 32], [8u8; 32])]),
        );
        let new_hash = replacement.header.hash();
        node.chain.replace_commit(replacement);

        node.wait_for(|e| e.get_val_set_header_hash_at(1).ok() == Some(new_hash))
            .await;
        assert_ne!(original, new_hash);
        assert_eq!(
            node.engine.get_extra_data_at(1, &[7u8; 32]).expect("epoch 1"),
            Some([8u8; 32])
        );
        assert!(REORGS_DETECTED.get() > reorgs);
        node.wait_for(|e| e.state() == SyncState::Synced).await;

        node.stop().await;
    }
}
