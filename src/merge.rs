//! Folding partition reports into one global aggregate.
//!
//! Each partition only knows what it saw itself, so two partitions may both
//! count the same password as unique. The merger keeps the union of every
//! partition's unique set; a password that is already in the union when a
//! later report arrives is a collision and its classification is retracted
//! once from the global aggregate.
use std::collections::HashSet;

use log::{debug, warn};

use crate::classify::classify;
use crate::partition::LineRange;
use crate::stats::Aggregate;
use crate::worker::{PartitionReport, ScanCounters};

/// A partition that stopped on an error. Its partial counts are still merged.
#[derive(Debug)]
pub struct PartitionFailure {
    pub index: usize,
    pub range: LineRange,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub aggregate: Aggregate,
    /// Duplicate first sights removed during reconciliation.
    pub collisions: u64,
    pub counters: ScanCounters,
    pub failures: Vec<PartitionFailure>,
    /// Indices of partitions that stopped early on cancellation.
    pub cancelled_partitions: Vec<usize>,
    pub partitions: usize,
}

#[derive(Debug, Default)]
pub struct Merger {
    global: Aggregate,
    seen: HashSet<Vec<u8>>,
    collisions: u64,
    counters: ScanCounters,
    failures: Vec<PartitionFailure>,
    cancelled: Vec<usize>,
    partitions: usize,
}

impl Merger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one report in. Reports may arrive in any order.
    pub fn fold(&mut self, report: PartitionReport) {
        let PartitionReport {
            index,
            range,
            aggregate,
            unique,
            counters,
            error,
            cancelled,
        } = report;

        // Sum first so retractions never drive a bucket below zero.
        self.global.absorb(&aggregate);
        let mut collisions = 0u64;
        for pw in unique {
            if self.seen.contains(&pw) {
                self.global.apply(&classify(&pw), -1);
                collisions += 1;
            } else {
                self.seen.insert(pw);
            }
        }
        if collisions > 0 {
            debug!("partition {}: {} cross-partition collisions", index, collisions);
        }
        self.collisions += collisions;
        self.counters.absorb(&counters);
        self.partitions += 1;

        if cancelled {
            self.cancelled.push(index);
        }
        if let Some(error) = error {
            warn!("partition {} ended early, its counts are partial", index);
            self.failures.push(PartitionFailure {
                index,
                range,
                error,
            });
        }
    }

    pub fn finish(mut self) -> MergeOutcome {
        self.failures.sort_by_key(|f| f.index);
        self.cancelled.sort_unstable();
        MergeOutcome {
            aggregate: self.global,
            collisions: self.collisions,
            counters: self.counters,
            failures: self.failures,
            cancelled_partitions: self.cancelled,
            partitions: self.partitions,
        }
    }
}
