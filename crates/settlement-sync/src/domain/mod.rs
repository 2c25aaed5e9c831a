//! # Domain Module
//!
//! Core types for settlement sync: headers, keys, checkpoints, events, errors.

pub mod checkpoint;
pub mod entities;
pub mod errors;
pub mod events;
pub mod invariants;
pub mod sync_state;

pub use checkpoint::*;
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use invariants::*;
pub use sync_state::*;
