//! Per-kind cache diagnostics
//!
//! Counters are kept per entry kind and exposed both programmatically and
//! as a human-readable report.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::EntryKind;

/// Counters kept for one entry kind
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounters {
    /// Fast-path lookups satisfied by a resident entry
    pub nhits: u64,
    /// Lookups that had to go to the loader
    pub nmisses: u64,
    /// Entries materialised, by loader call or direct install
    pub ninits: u64,
    /// Flush callbacks invoked
    pub nflushes: u64,
}

impl KindCounters {
    /// Hit rate in percent
    pub fn hit_rate(&self) -> f64 {
        let total = self.nhits + self.nmisses;
        if total == 0 {
            0.0
        } else {
            (self.nhits as f64 / total as f64) * 100.0
        }
    }
}

/// Per-kind counters for one cache
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    per_kind: [KindCounters; EntryKind::COUNT],
}

impl Diagnostics {
    pub fn record_hit(&mut self, kind: EntryKind) {
        self.per_kind[kind.id()].nhits += 1;
    }

    pub fn record_miss(&mut self, kind: EntryKind) {
        self.per_kind[kind.id()].nmisses += 1;
    }

    pub fn record_init(&mut self, kind: EntryKind) {
        self.per_kind[kind.id()].ninits += 1;
    }

    pub fn record_flush(&mut self, kind: EntryKind) {
        self.per_kind[kind.id()].nflushes += 1;
    }

    pub fn kind(&self, kind: EntryKind) -> KindCounters {
        self.per_kind[kind.id()]
    }

    pub fn snapshot(&self) -> Vec<KindSnapshot> {
        EntryKind::ALL
            .iter()
            .map(|&kind| {
                let counters = self.per_kind[kind.id()];
                KindSnapshot {
                    kind: kind.name().to_string(),
                    counters,
                    hit_rate: counters.hit_rate(),
                }
            })
            .collect()
    }
}

/// Snapshot of one kind's counters at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindSnapshot {
    /// Kind name
    pub kind: String,
    /// Raw counters
    #[serde(flatten)]
    pub counters: KindCounters,
    /// Hit rate in percent
    pub hit_rate: f64,
}

/// Human-readable diagnostic report for one cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheReport {
    /// Slot table size
    pub nslots: usize,
    /// Slots currently holding an entry
    pub occupied: usize,
    /// Outstanding protect records across all slots
    pub nprots: usize,
    /// Per-kind counters
    pub kinds: Vec<KindSnapshot>,
}

impl fmt::Display for CacheReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Metadata cache report:")?;
        writeln!(
            f,
            "  Slots: {} of {} occupied, {} outstanding protect(s)",
            self.occupied, self.nslots, self.nprots
        )?;
        for snapshot in &self.kinds {
            writeln!(
                f,
                "  {}: {} hits, {} misses ({:.1}% hit rate), {} inits, {} flushes",
                snapshot.kind,
                snapshot.counters.nhits,
                snapshot.counters.nmisses,
                snapshot.hit_rate,
                snapshot.counters.ninits,
                snapshot.counters.nflushes,
            )?;
        }
        Ok(())
    }
}
