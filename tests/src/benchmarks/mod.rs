//! # Settlement Benchmarks
//!
//! Hot paths of the read side: historical lookups and quorum verification.

pub mod checkpoint_lookup;
pub mod quorum_verification;
