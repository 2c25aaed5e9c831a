//! # Adapters
//!
//! Runtime plumbing between the chain ports and the engine: fetch retry
//! and the event queue.

pub mod event_feed;
pub mod retrying;

pub use event_feed::{spawn_event_poller, EventFeed};
pub use retrying::RetryPolicy;
