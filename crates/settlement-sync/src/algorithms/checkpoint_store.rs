//! # Checkpoint Store
//!
//! Keyed collection of [`Trace`]s with copy-on-write snapshots.
//!
//! Readers `load()` the current [`StoreSnapshot`] and never take a lock.
//! Writers are serialized by a mutex, build the next snapshot off to the
//! side and publish it with one pointer swap, so a batch of appends becomes
//! visible all at once or not at all.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash as StdHash;
use std::sync::Arc;

use crate::domain::{Checkpoint, SettlementError, SettlementResult, Trace};

/// Immutable view of every trace at one instant.
#[derive(Debug)]
pub struct StoreSnapshot<K, V> {
    traces: HashMap<K, Arc<Trace<V>>>,
}

impl<K, V> Default for StoreSnapshot<K, V> {
    fn default() -> Self {
        Self {
            traces: HashMap::new(),
        }
    }
}

impl<K: Eq + StdHash, V: Clone> StoreSnapshot<K, V> {
    /// Trace for `key`.
    pub fn trace(&self, key: &K) -> Option<&Trace<V>> {
        self.traces.get(key).map(|t| t.as_ref())
    }

    /// Value of `key` as of `at`.
    pub fn query(&self, key: &K, at: u64, hint: Option<usize>) -> SettlementResult<V> {
        self.trace(key)
            .ok_or(SettlementError::NoCheckpointBefore { at })?
            .upper_lookup(at, hint)
            .cloned()
    }

    /// Most recent value of `key`.
    pub fn query_latest(&self, key: &K) -> SettlementResult<V> {
        self.latest(key).map(|c| c.value)
    }

    /// Most recent checkpoint of `key`.
    pub fn latest(&self, key: &K) -> SettlementResult<Checkpoint<V>> {
        self.trace(key)
            .ok_or(SettlementError::EmptyHistory)?
            .latest()
            .cloned()
    }

    /// All keys with a history.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.traces.keys()
    }
}

/// Checkpoint store: one append-only trace per key.
pub struct CheckpointStore<K, V> {
    current: ArcSwap<StoreSnapshot<K, V>>,
    writer: Mutex<()>,
}

impl<K, V> Default for CheckpointStore<K, V> {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(StoreSnapshot::default()),
            writer: Mutex::new(()),
        }
    }
}

impl<K, V> CheckpointStore<K, V>
where
    K: Eq + StdHash + Clone,
    V: Clone,
{
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. Holding it pins that version for consistent multi-key reads.
    pub fn snapshot(&self) -> Arc<StoreSnapshot<K, V>> {
        self.current.load_full()
    }

    /// Append one value.
    pub fn record(&self, key: K, at: u64, value: V) -> SettlementResult<()> {
        self.record_batch([(key, at, value)])
    }

    /// Append several values and publish them as one snapshot.
    ///
    /// If any append is out of order nothing is published.
    pub fn record_batch(
        &self,
        entries: impl IntoIterator<Item = (K, u64, V)>,
    ) -> SettlementResult<()> {
        let _guard = self.writer.lock();
        let current = self.current.load_full();
        let mut traces = current.traces.clone();

        for (key, at, value) in entries {
            let trace = traces.entry(key).or_default();
            Arc::make_mut(trace).push(at, value)?;
        }

        self.current.store(Arc::new(StoreSnapshot { traces }));
        Ok(())
    }

    /// Derive the value at `at` from the latest one.
    ///
    /// Changes that land on the latest point (several events in one block)
    /// coalesce into it; anything earlier is `OutOfOrderInsertion`.
    pub fn update(&self, key: K, at: u64, f: impl FnOnce(Option<&V>) -> V) -> SettlementResult<()> {
        let _guard = self.writer.lock();
        let current = self.current.load_full();
        let mut traces = current.traces.clone();

        let trace = Arc::make_mut(traces.entry(key).or_default());
        let last = trace.latest().ok().map(|c| c.at);
        let value = f(trace.latest().ok().map(|c| &c.value));
        if last == Some(at) {
            trace.replace_latest(at, value)?;
        } else {
            trace.push(at, value)?;
        }

        self.current.store(Arc::new(StoreSnapshot { traces }));
        Ok(())
    }

    /// Value of `key` as of `at`; `hint` is an optional index from an earlier lookup.
    pub fn query(&self, key: &K, at: u64, hint: Option<usize>) -> SettlementResult<V> {
        self.current.load().query(key, at, hint)
    }

    /// Most recent value of `key`.
    pub fn query_latest(&self, key: &K) -> SettlementResult<V> {
        self.current.load().query_latest(key)
    }

    /// Index of the point answering `query(key, at)`, reusable as a hint.
    pub fn lookup_index(&self, key: &K, at: u64) -> SettlementResult<usize> {
        self.current
            .load()
            .trace(key)
            .ok_or(SettlementError::NoCheckpointBefore { at })?
            .lookup_index(at, None)
    }

    /// Drop every point of `key` at or after `at`.
    pub fn truncate_from(&self, key: &K, at: u64) -> usize {
        let _guard = self.writer.lock();
        let current = self.current.load_full();
        let Some(existing) = current.traces.get(key) else {
            return 0;
        };

        let mut trace = existing.as_ref().clone();
        let removed = trace.truncate_from(at);
        if removed > 0 {
            let mut traces = current.traces.clone();
            traces.insert(key.clone(), Arc::new(trace));
            self.current.store(Arc::new(StoreSnapshot { traces }));
        }
        removed
    }

    /// Drop every point of every key at or after `at`.
    pub fn truncate_all_from(&self, at: u64) -> usize {
        let _guard = self.writer.lock();
        let current = self.current.load_full();
        let mut traces = current.traces.clone();

        let mut removed = 0;
        for trace in traces.values_mut() {
            if trace.latest().map_or(false, |c| c.at >= at) {
                removed += Arc::make_mut(trace).truncate_from(at);
            }
        }

        if removed > 0 {
            self.current.store(Arc::new(StoreSnapshot { traces }));
        }
        removed
    }

    /// Keys with a recorded history.
    pub fn keys(&self) -> Vec<K> {
        self.current.load().keys().cloned().collect()
    }
}
