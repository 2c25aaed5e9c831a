//! # Checkpoint Trace
//!
//! Append-only `(at, value)` history with point-in-time lookup.
//!
//! ## Invariants
//!
//! - Points are strictly increasing; `push` rejects anything else.
//! - A lookup returns the latest point with `at <= τ`.
//! - Hints are advisory: a wrong hint costs a binary search, never a
//!   different answer.

use super::errors::{SettlementError, SettlementResult};
use serde::{Deserialize, Serialize};

/// One recorded point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint<V> {
    /// Epoch or timestamp the value took effect.
    pub at: u64,
    /// Recorded value.
    pub value: V,
}

/// Ordered history of one quantity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace<V> {
    points: Vec<Checkpoint<V>>,
}

impl<V> Default for Trace<V> {
    fn default() -> Self {
        Self { points: Vec::new() }
    }
}

impl<V> Trace<V> {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point strictly after the last one.
    pub fn push(&mut self, at: u64, value: V) -> SettlementResult<()> {
        if let Some(last) = self.points.last() {
            if at <= last.at {
                return Err(SettlementError::OutOfOrderInsertion { at, last: last.at });
            }
        }
        self.points.push(Checkpoint { at, value });
        Ok(())
    }

    /// Overwrite the value of the latest point, which must sit exactly at `at`.
    pub fn replace_latest(&mut self, at: u64, value: V) -> SettlementResult<()> {
        match self.points.last_mut() {
            Some(last) if last.at == at => {
                last.value = value;
                Ok(())
            }
            Some(last) => Err(SettlementError::OutOfOrderInsertion { at, last: last.at }),
            None => Err(SettlementError::EmptyHistory),
        }
    }

    /// Index of the latest point with `point.at <= at`.
    ///
    /// `hint` is checked first; if it does not satisfy the lookup it is
    /// ignored and the full history is searched.
    pub fn lookup_index(&self, at: u64, hint: Option<usize>) -> SettlementResult<usize> {
        if let Some(h) = hint {
            if self.is_exact_hint(at, h) {
                return Ok(h);
            }
        }

        // Number of points with `p.at <= at`
        let upper = self.points.partition_point(|p| p.at <= at);
        if upper == 0 {
            return Err(SettlementError::NoCheckpointBefore { at });
        }
        Ok(upper - 1)
    }

    /// Value of the latest point with `point.at <= at`.
    pub fn upper_lookup(&self, at: u64, hint: Option<usize>) -> SettlementResult<&V> {
        let idx = self.lookup_index(at, hint)?;
        Ok(&self.points[idx].value)
    }

    /// Most recent point.
    pub fn latest(&self) -> SettlementResult<&Checkpoint<V>> {
        self.points.last().ok_or(SettlementError::EmptyHistory)
    }

    /// Point at `index`.
    pub fn get(&self, index: usize) -> Option<&Checkpoint<V>> {
        self.points.get(index)
    }

    /// Drop every point with `point.at >= at`; returns how many were removed.
    pub fn truncate_from(&mut self, at: u64) -> usize {
        let keep = self.points.partition_point(|p| p.at < at);
        let removed = self.points.len() - keep;
        self.points.truncate(keep);
        removed
    }

    /// Points in order.
    pub fn iter(&self) -> impl Iterator<Item = &Checkpoint<V>> {
        self.points.iter()
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn is_exact_hint(&self, at: u64, hint: usize) -> bool {
        match self.points.get(hint) {
            Some(point) if point.at <= at => self
                .points
                .get(hint + 1)
                .map_or(true, |next| next.at > at),
            _ => false,
        }
    }
}
