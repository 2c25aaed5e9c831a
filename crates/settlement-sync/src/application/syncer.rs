//! # Sync Service
//!
//! The single writer. Drains chain events into the engine's caches, checks
//! the last committed header against the chain, and commits new headers.
//!
//! ```text
//! tick
//!   ├── drain EventFeed ──→ apply_event (membership / keys)
//!   │                  └──→ header events raise the announced epoch
//!   ├── genesis not set?  fetch + set_genesis (once announced)
//!   ├── last local header hash == chain hash?  no ──→ bisect to the first
//!   │                                             diverging epoch, invalidate + resync
//!   └── commit epochs last+1 ..= min(chain last, announced)
//! ```
//!
//! Headers are committed only after the event carrying them was drained,
//! so every membership change before the capture timestamp is already
//! applied. Fetches are retried on transient errors; a tick that still
//! fails leaves the engine `Stale` until the next tick.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::{spawn_event_poller, EventFeed, RetryPolicy};
use crate::application::engine::SettlementEngine;
use crate::domain::{
    Epoch, Hash, SettlementError, SettlementResult, SyncEvent, SyncState, Timestamp,
};
use crate::ports::{ChainClient, ChainEventSource, SettlementReader};

/// What one tick did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Membership and key events applied.
    pub events_applied: usize,
    /// Events the engine refused (logged and skipped).
    pub events_skipped: usize,
    /// Headers committed (genesis included).
    pub epochs_committed: usize,
    /// Epoch invalidated by a detected reorg.
    pub reorg_from: Option<Epoch>,
}

/// Sync loop driving a [`SettlementEngine`].
pub struct SyncService<C, S>
where
    C: ChainClient + ?Sized,
    S: ChainEventSource + ?Sized,
{
    engine: Arc<SettlementEngine<C>>,
    source: Arc<S>,
    policy: RetryPolicy,
    /// Highest header epoch announced by a drained event.
    announced: Option<Epoch>,
}

impl<C, S> SyncService<C, S>
where
    C: ChainClient + ?Sized + 'static,
    S: ChainEventSource + ?Sized + 'static,
{
    /// Create a sync service for `engine`, reading events from `source`.
    pub fn new(engine: Arc<SettlementEngine<C>>, source: Arc<S>) -> Self {
        let policy = RetryPolicy::from_config(engine.config());
        Self {
            engine,
            source,
            policy,
            announced: None,
        }
    }

    /// Engine being driven.
    pub fn engine(&self) -> &Arc<SettlementEngine<C>> {
        &self.engine
    }

    /// Highest header epoch announced so far.
    pub fn announced_epoch(&self) -> Option<Epoch> {
        self.announced
    }

    /// Run until `cancel` fires. Spawns the event poller at `from_block`.
    ///
    /// Tick failures are logged and retried on the next poll tick; only
    /// cancellation ends the loop.
    pub async fn run(mut self, from_block: u64, cancel: CancellationToken) {
        let config = self.engine.config().clone();
        let (mut feed, poller) =
            spawn_event_poller(self.source.clone(), from_block, &config, cancel.child_token());

        let mut ticker = tokio::time::interval(config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("[settlement] sync loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick(&mut feed, &cancel).await {
                Ok(report) => {
                    if report.epochs_committed > 0 || report.reorg_from.is_some() {
                        debug!("[settlement] tick: {:?}", report);
                    }
                }
                Err(SettlementError::Cancelled) => break,
                Err(e) => warn!(
                    "[settlement] sync tick failed ({}), state {:?}",
                    e,
                    self.engine.state()
                ),
            }
        }

        cancel.cancel();
        if let Ok(next_block) = poller.await {
            info!("[settlement] sync loop stopped, events consumed up to block {}", next_block);
        }
    }

    /// One sync step. On error the engine is marked stale.
    pub async fn tick(
        &mut self,
        feed: &mut EventFeed,
        cancel: &CancellationToken,
    ) -> SettlementResult<TickReport> {
        let mut report = TickReport::default();
        self.drain(feed, &mut report);

        let result = self.sync_headers(cancel, &mut report).await;
        if let Err(e) = &result {
            if !matches!(e, SettlementError::Cancelled) {
                self.engine.transition(SyncEvent::FetchFailed);
            }
        }
        result.map(|_| report)
    }

    fn drain(&mut self, feed: &mut EventFeed, report: &mut TickReport) {
        let max = self.engine.config().event_channel_capacity;
        for event in feed.drain(max) {
            if let Some(epoch) = event.header_epoch() {
                self.announced = Some(self.announced.map_or(epoch, |e| e.max(epoch)));
                continue;
            }
            match self.engine.apply_event(&event) {
                Ok(()) => report.events_applied += 1,
                Err(e) => {
                    report.events_skipped += 1;
                    warn!("[settlement] skipped {} event: {}", event.name(), e);
                }
            }
        }
    }

    async fn sync_headers(
        &mut self,
        cancel: &CancellationToken,
        report: &mut TickReport,
    ) -> SettlementResult<()> {
        let Some(announced) = self.announced else {
            return Ok(());
        };

        if !self.engine.state().is_initialized() {
            if !self.sync_genesis(cancel).await? {
                return Ok(());
            }
            report.epochs_committed += 1;
        }

        if let Some(epoch) = self.check_reorg(cancel).await? {
            report.reorg_from = Some(epoch);
            if !self.engine.state().is_initialized() {
                return Ok(());
            }
        }

        let chain = self.engine.chain().clone();
        let chain_last = self
            .policy
            .run("get_last_committed_header_epoch", cancel, || {
                chain.get_last_committed_header_epoch()
            })
            .await?
            .unwrap_or_default();
        let target = chain_last.min(announced);

        let max_epochs = self.engine.config().max_epochs_per_tick;
        let mut committed = 0;
        while let Some(last) = self.engine.get_last_committed_epoch() {
            if last >= target || committed >= max_epochs {
                break;
            }
            self.commit_epoch(last + 1, cancel).await?;
            committed += 1;
        }
        report.epochs_committed += committed;

        let caught_up = self.engine.get_last_committed_epoch() == Some(chain_last);
        self.engine.transition(if caught_up {
            SyncEvent::CaughtUp
        } else {
            SyncEvent::EpochMissed
        });
        Ok(())
    }

    /// Fetch and record genesis. `false` if the chain has none yet.
    async fn sync_genesis(&self, cancel: &CancellationToken) -> SettlementResult<bool> {
        let chain = self.engine.chain().clone();
        let genesis = self
            .policy
            .run("get_genesis_commit", cancel, || chain.get_genesis_commit())
            .await?;
        let Some(commit) = genesis else {
            debug!("[settlement] genesis announced but not readable yet");
            return Ok(false);
        };

        let engine = &self.engine;
        self.policy
            .run("set_genesis", cancel, || {
                engine.set_genesis(commit.header.clone(), commit.extra_data.clone())
            })
            .await?;
        Ok(true)
    }

    async fn commit_epoch(&self, epoch: Epoch, cancel: &CancellationToken) -> SettlementResult<()> {
        let chain = self.engine.chain().clone();
        let commit = self
            .policy
            .run("get_val_set_commit", cancel, || chain.get_val_set_commit(epoch))
            .await?;

        let engine = &self.engine;
        self.policy
            .run("commit_val_set_header", cancel, || {
                engine.commit_val_set_header(
                    commit.header.clone(),
                    commit.extra_data.clone(),
                    commit.proof.clone(),
                )
            })
            .await?;
        Ok(())
    }

    /// Compare the last local header with the chain's. On mismatch, find
    /// the earliest diverging epoch, invalidate it and everything after it,
    /// and resync the registry caches.
    async fn check_reorg(&self, cancel: &CancellationToken) -> SettlementResult<Option<Epoch>> {
        let (Some(first), Some(last)) = (
            self.engine.get_first_committed_epoch(),
            self.engine.get_last_committed_epoch(),
        ) else {
            return Ok(None);
        };
        let Some(actual) = self.diverging_hash(last, cancel).await? else {
            return Ok(None);
        };

        // a reorg replaces a suffix, so matching epochs form a prefix
        let (mut low, mut high) = (first, last);
        while low < high {
            let mid = low + (high - low) / 2;
            if self.diverging_hash(mid, cancel).await?.is_some() {
                high = mid;
            } else {
                low = mid + 1;
            }
        }

        let fault = SettlementError::ReorgDetected {
            epoch: last,
            expected: self.engine.get_val_set_header_hash_at(last)?,
            actual,
        };
        error!("[settlement] CRITICAL: {} (diverged from epoch {})", fault, high);

        let from = self.engine.invalidate_from(high).await?;
        self.resync_registry(from, cancel).await?;
        Ok(Some(high))
    }

    /// Chain hash for `epoch` when it differs from the local one. A header
    /// the chain no longer has reads as the zero hash.
    async fn diverging_hash(
        &self,
        epoch: Epoch,
        cancel: &CancellationToken,
    ) -> SettlementResult<Option<Hash>> {
        let expected = self.engine.get_val_set_header_hash_at(epoch)?;
        let chain = self.engine.chain().clone();
        let actual = match self
            .policy
            .run("get_val_set_header_hash_at", cancel, || {
                chain.get_val_set_header_hash_at(epoch)
            })
            .await
        {
            Ok(hash) => hash,
            Err(SettlementError::HeaderNotCommitted { .. }) => [0u8; 32],
            Err(e) => return Err(e),
        };
        Ok((actual != expected).then_some(actual))
    }

    async fn resync_registry(
        &self,
        from: Timestamp,
        cancel: &CancellationToken,
    ) -> SettlementResult<()> {
        let engine = &self.engine;
        self.policy
            .run("bootstrap_registry", cancel, || engine.bootstrap_registry(from))
            .await?;

        if let Some(latest) = engine.last_event_timestamp().filter(|ts| *ts > from) {
            self.policy
                .run("bootstrap_registry", cancel, || engine.bootstrap_registry(latest))
                .await?;
        }
        Ok(())
    }

    /// Engine state after the last tick.
    pub fn state(&self) -> SyncState {
        self.engine.state()
    }
}
