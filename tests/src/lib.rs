//! # Settlement Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── benchmarks/       # Criterion benchmarks (checkpoint lookup, quorum checks)
//! │   ├── checkpoint_lookup.rs
//! │   └── quorum_verification.rs
//! │
//! └── integration/      # Cross-component scenarios
//!     ├── quorum_handoff.rs
//!     ├── voting_power_history.rs
//!     ├── key_registry.rs
//!     └── sync_loop.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p settlement-tests
//!
//! # By category
//! cargo test -p settlement-tests integration::
//!
//! # Benchmarks
//! cargo bench -p settlement-tests
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod benchmarks;
pub mod integration;
