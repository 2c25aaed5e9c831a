//! # Application Module
//!
//! The settlement engine and the sync loop that drives it.

pub mod engine;
pub mod syncer;

pub use engine::{CommittedValSet, SettlementEngine};
pub use syncer::{SyncService, TickReport};
