//! Sync state machine.
//!
//! ```text
//! [UNINITIALIZED] ──genesis set──→ [GENESIS_SET] ──caught up──→ [SYNCED]
//!                                        │                        ↑   │
//!                                        │                 caught up  fetch failed /
//!                                        │                        │   epoch missed
//!                                        └──────fetch failed────→ [STALE]
//! ```
//!
//! A fatal reorg that invalidates the genesis epoch sends the engine back
//! to `Uninitialized`; any later epoch leaves it `Stale` until resynced.

use serde::{Deserialize, Serialize};

/// Engine sync state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// No genesis yet.
    #[default]
    Uninitialized,
    /// Genesis recorded, not yet confirmed against the chain tip.
    GenesisSet,
    /// Last committed epoch matches the chain.
    Synced,
    /// Behind the chain or the last fetch failed.
    Stale,
}

impl SyncState {
    /// Value reported through the `settlement_sync_state` gauge.
    pub fn as_gauge(&self) -> f64 {
        match self {
            Self::Uninitialized => 0.0,
            Self::GenesisSet => 1.0,
            Self::Synced => 2.0,
            Self::Stale => 3.0,
        }
    }

    /// Whether genesis has been set.
    pub fn is_initialized(&self) -> bool {
        !matches!(self, Self::Uninitialized)
    }
}

/// Events that drive [`SyncState`] transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    /// Genesis header recorded.
    GenesisSet,
    /// Local timeline matches the chain's last committed epoch.
    CaughtUp,
    /// A chain fetch failed or timed out.
    FetchFailed,
    /// The chain is ahead of the local timeline.
    EpochMissed,
    /// History invalidated back to before genesis.
    Reset,
}

/// Deterministic transition function. Unknown combinations keep the state.
pub fn next_state(state: SyncState, event: SyncEvent) -> SyncState {
    use SyncEvent as E;
    use SyncState as S;

    match (state, event) {
        (_, E::Reset) => S::Uninitialized,
        (S::Uninitialized, E::GenesisSet) => S::GenesisSet,
        (S::Uninitialized, _) => S::Uninitialized,
        (S::GenesisSet | S::Stale | S::Synced, E::CaughtUp) => S::Synced,
        (S::GenesisSet | S::Synced | S::Stale, E::FetchFailed | E::EpochMissed) => S::Stale,
        (s, E::GenesisSet) => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_path() {
        let s = next_state(SyncState::Uninitialized, SyncEvent::GenesisSet);
        assert_eq!(s, SyncState::GenesisSet);
        assert_eq!(next_state(s, SyncEvent::CaughtUp), SyncState::Synced);
    }

    #[test]
    fn test_uninitialized_ignores_sync_events() {
        for event in [SyncEvent::CaughtUp, SyncEvent::FetchFailed, SyncEvent::EpochMissed] {
            assert_eq!(
                next_state(SyncState::Uninitialized, event),
                SyncState::Uninitialized
            );
        }
    }

    #[test]
    fn test_synced_stale_round_trip() {
        let s = next_state(SyncState::Synced, SyncEvent::FetchFailed);
        assert_eq!(s, SyncState::Stale);
        assert_eq!(next_state(s, SyncEvent::EpochMissed), SyncState::Stale);
        assert_eq!(next_state(s, SyncEvent::CaughtUp), SyncState::Synced);
    }

    #[test]
    fn test_genesis_set_twice_is_noop() {
        assert_eq!(
            next_state(SyncState::Synced, SyncEvent::GenesisSet),
            SyncState::Synced
        );
    }

    #[test]
    fn test_reset() {
        assert_eq!(
            next_state(SyncState::Stale, SyncEvent::Reset),
            SyncState::Uninitialized
        );
        assert!(!SyncState::Uninitialized.is_initialized());
        assert!(SyncState::Stale.is_initialized());
    }
}
