//! Bounded chain-event queue.
//!
//! ```text
//! ChainEventSource ──poll──→ [poller task] ──mpsc (bounded)──→ EventFeed ──→ SyncService
//! ```
//!
//! The poller blocks on a full queue instead of dropping events, so a slow
//! sync task throttles polling.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retrying::RetryPolicy;
use crate::config::SettlementConfig;
use crate::domain::{ChainEvent, SettlementError};
use crate::ports::ChainEventSource;

/// Receiving end of the event queue.
pub struct EventFeed {
    rx: mpsc::Receiver<ChainEvent>,
}

impl EventFeed {
    /// Wrap a receiver (tests feed events by hand through the sender).
    pub fn new(rx: mpsc::Receiver<ChainEvent>) -> Self {
        Self { rx }
    }

    /// Create a detached feed and its sender.
    pub fn channel(capacity: usize) -> (mpsc::Sender<ChainEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// Next event; `None` once the poller is gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<ChainEvent> {
        self.rx.recv().await
    }

    /// Take up to `max` queued events without waiting.
    pub fn drain(&mut self, max: usize) -> Vec<ChainEvent> {
        let mut events = Vec::new();
        while events.len() < max {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        events
    }
}

/// Spawn the poller task.
///
/// Polls `source` every `poll_interval` starting at `from_block`. Fetch
/// failures are retried through [`RetryPolicy`] and otherwise skipped until
/// the next tick. The task returns the block the next poll would start
/// from when cancelled or when the feed is dropped.
pub fn spawn_event_poller<S>(
    source: Arc<S>,
    from_block: u64,
    config: &SettlementConfig,
    cancel: CancellationToken,
) -> (EventFeed, JoinHandle<u64>)
where
    S: ChainEventSource + ?Sized + 'static,
{
    let (tx, feed) = EventFeed::channel(config.event_channel_capacity);
    let policy = RetryPolicy::from_config(config);
    let interval = config.poll_interval();

    let handle = tokio::spawn(async move {
        let mut next_block = from_block;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("[settlement] event poller started at block {}", from_block);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let from = next_block;
            let batch = match policy
                .run("poll_events", &cancel, || source.poll_events(from))
                .await
            {
                Ok(batch) => batch,
                Err(SettlementError::Cancelled) => break,
                Err(e) => {
                    warn!("[settlement] event poll from block {} failed: {}", from, e);
                    continue;
                }
            };

            if !batch.events.is_empty() {
                debug!(
                    "[settlement] polled {} events from block {}",
                    batch.events.len(),
                    from
                );
            }
            for event in batch.events {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return next_block,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            debug!("[settlement] event feed dropped, poller exiting");
                            return next_block;
                        }
                    }
                }
            }
            next_block = batch.next_block;
        }

        info!("[settlement] event poller stopped at block {}", next_block);
        next_block
    });

    (feed, handle)
}
