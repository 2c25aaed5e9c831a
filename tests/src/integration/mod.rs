//! # Integration Scenarios
//!
//! Engine, registry and sync loop exercised together against `MockChain`.

pub mod key_registry;
pub mod quorum_handoff;
pub mod sync_loop;
pub mod voting_power_history;

#[cfg(test)]
pub(crate) mod support {
    use std::sync::Arc;

    use settlement_sync::{
        ChainEventSource, MockChain, PowerCurves, SchemeRegistry, SettlementConfig,
        SettlementEngine,
    };

    /// Engine over `chain` with every logged event applied.
    pub async fn replayed_engine(
        chain: &Arc<MockChain>,
        curves: PowerCurves,
    ) -> anyhow::Result<SettlementEngine<MockChain>> {
        let engine = SettlementEngine::new(
            SettlementConfig::for_testing(),
            chain.clone(),
            SchemeRegistry::with_defaults(),
            curves,
        );
        for event in chain.poll_events(0).await?.events {
            engine.apply_event(&event)?;
        }
        Ok(engine)
    }
}
