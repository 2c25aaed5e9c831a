//! # Ports Module
//!
//! Hexagonal architecture ports (inbound API, outbound chain access).

pub mod inbound;
pub mod mock;
pub mod outbound;

pub use inbound::*;
pub use mock::{MockChain, Submission};
pub use outbound::*;
