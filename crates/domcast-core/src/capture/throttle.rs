//! Signature-based mutation throttling
//!
//! ## Overview
//!
//! Third-party scripts can mutate the same element in a tight loop. Every
//! child-list and attribute change is reduced to a signature:
//!
//! ```text
//! parent selectors , element selectors , attribute , added names , removed names
//! ```
//!
//! A bounded history keyed by signature counts repeats. Outside the active
//! interaction window the count grows once per batch; inside it, it resets to
//! one on every change. Once the count reaches the threshold, further
//! occurrences are throttled: only the latest one is kept and normal
//! processing is skipped. Nodes removed by throttled changes are collected so
//! they can be removed exactly once when the burst is replayed.
//!
//! ## Eviction
//!
//! Entries are kept in least-recently-seen order. Entries quiet for longer than
//! the quiet period are evicted, and the whole table is wiped if it grows past
//! its capacity.

use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info};

use crate::types::{ChangeRecord, HostNode};

/// Outcome of a history check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Process the change normally
    Process,
    /// Skip it; the latest occurrence is retained for replay
    Throttle,
}

/// Result of checking one change against the history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCheck {
    pub decision: ThrottleDecision,
    /// Removals deferred by an earlier burst that must be processed now
    pub replay_removals: Vec<HostNode>,
}

/// Nodes released from the history by eviction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Eviction {
    pub evicted: usize,
    /// Table exceeded its capacity and was cleared
    pub wiped: bool,
    /// Deferred removals held by evicted entries
    pub removals: Vec<HostNode>,
}

/// A throttled change waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottledChange {
    pub signature: String,
    pub record: ChangeRecord,
    /// Batch time of the latest occurrence
    pub time: u64,
    /// Removals deferred while the signature was throttled
    pub removals: Vec<HostNode>,
}

#[derive(Debug, Default)]
struct HistoryEntry {
    count: u32,
    batch: u64,
    last: u64,
    pending_removals: IndexSet<HostNode>,
}

/// Latest occurrence of a throttled signature.
#[derive(Debug)]
struct Pending {
    record: ChangeRecord,
    time: u64,
    /// Deferred removals of a history entry evicted while throttled
    removals: IndexSet<HostNode>,
}

/// Bounded signature history.
#[derive(Debug)]
pub struct MutationHistory {
    entries: IndexMap<String, HistoryEntry>,
    throttled: IndexMap<String, Pending>,
    threshold: u32,
    window: u64,
    quiet_period: u64,
    capacity: usize,
}

impl MutationHistory {
    pub fn new(threshold: u32, window: Duration, quiet_period: Duration, capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            throttled: IndexMap::new(),
            threshold,
            window: window.as_millis() as u64,
            quiet_period: quiet_period.as_millis() as u64,
            capacity,
        }
    }

    /// Check one change.
    ///
    /// `batch` identifies the delivering batch so repeats within one batch
    /// count once. `inactive` is true outside the active interaction window.
    /// `now` is the current time; an occurrence older than the window is
    /// processed even when its signature is throttled.
    pub fn check(
        &mut self,
        signature: &str,
        record: &ChangeRecord,
        batch: u64,
        batch_time: u64,
        now: u64,
        inactive: bool,
    ) -> HistoryCheck {
        let mut entry = self.entries.shift_remove(signature).unwrap_or_default();
        entry.last = batch_time;

        let mut replay_removals = Vec::new();
        if !inactive && entry.count >= self.threshold {
            replay_removals = entry.pending_removals.drain(..).collect();
        }

        entry.count = if inactive {
            if entry.batch == batch {
                entry.count
            } else {
                entry.count + 1
            }
        } else {
            1
        };
        entry.batch = batch;

        let decision = if entry.count >= self.threshold {
            entry.pending_removals.extend(record.removed.iter().copied());
            if now > batch_time + self.window {
                ThrottleDecision::Process
            } else {
                match self.throttled.get_mut(signature) {
                    Some(pending) => {
                        pending.record = record.clone();
                        pending.time = batch_time;
                    }
                    None => {
                        debug!(signature, count = entry.count, "Throttling mutation signature");
                        let pending = Pending {
                            record: record.clone(),
                            time: batch_time,
                            removals: IndexSet::new(),
                        };
                        self.throttled.insert(signature.to_string(), pending);
                    }
                }
                ThrottleDecision::Throttle
            }
        } else {
            ThrottleDecision::Process
        };

        self.entries.insert(signature.to_string(), entry);
        HistoryCheck {
            decision,
            replay_removals,
        }
    }

    /// Drain throttled changes, each with the removals its signature deferred.
    pub fn take_throttled(&mut self) -> Vec<ThrottledChange> {
        let throttled = std::mem::take(&mut self.throttled);
        throttled
            .into_iter()
            .map(|(signature, pending)| {
                let mut removals = pending.removals;
                if let Some(entry) = self.entries.get_mut(&signature) {
                    removals.extend(entry.pending_removals.drain(..));
                }
                ThrottledChange {
                    signature,
                    record: pending.record,
                    time: pending.time,
                    removals: removals.into_iter().collect(),
                }
            })
            .collect()
    }

    pub fn has_throttled(&self) -> bool {
        !self.throttled.is_empty()
    }

    /// Evict quiet entries and enforce the capacity ceiling.
    pub fn evict(&mut self, now: u64) -> Eviction {
        let mut eviction = Eviction::default();

        let quiet = self
            .entries
            .values()
            .take_while(|e| now.saturating_sub(e.last) > self.quiet_period)
            .count();
        let evicted: Vec<_> = self.entries.drain(..quiet).collect();
        eviction.evicted = evicted.len();
        for (signature, entry) in evicted {
            self.release(&signature, entry, &mut eviction);
        }

        if self.entries.len() > self.capacity {
            info!(entries = self.entries.len(), "Mutation history over capacity, clearing");
            let wiped: Vec<_> = self.entries.drain(..).collect();
            for (signature, entry) in wiped {
                self.release(&signature, entry, &mut eviction);
            }
            eviction.wiped = true;
        }
        eviction
    }

    /// Hand the deferred removals of a dropped entry to its pending replay,
    /// or to the caller when the signature is not throttled.
    fn release(&mut self, signature: &str, entry: HistoryEntry, eviction: &mut Eviction) {
        match self.throttled.get_mut(signature) {
            Some(pending) => pending.removals.extend(entry.pending_removals),
            None => eviction.removals.extend(entry.pending_removals),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

}
