//! Per-partition scanning.
//!
//! A [`Worker`] owns one line range, a local first-sight cache, and a local
//! [`Aggregate`]. Before the spill signal trips, uniqueness is decided by the
//! cache alone; afterwards, first sights are claimed through the shared
//! [`UniquenessOracle`]. Either way the passwords this worker counted as
//! unique end up in its [`PartitionReport`] so the merger can reconcile them
//! against other partitions.
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use log::{debug, warn};

use crate::classify::{PasswordRecord, classify};
use crate::credential::{Separator, parse_credential_line};
use crate::io::LineSource;
use crate::monitor::SpillSignal;
use crate::oracle::{Claim, UniquenessOracle};
use crate::partition::LineRange;
use crate::stats::Aggregate;

/// Whether repeats of a password count once or every time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountMode {
    #[default]
    Unique,
    /// Classify every occurrence; no cache, oracle, or reconciliation.
    Occurrences,
}

/// Cooperative stop request shared by the coordinator and all workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanCounters {
    pub lines_read: u64,
    pub parse_failures: u64,
    pub cache_hits: u64,
    pub oracle_claims: u64,
    pub oracle_duplicates: u64,
    pub oracle_failures: u64,
}

impl ScanCounters {
    pub fn absorb(&mut self, o: &Self) {
        self.lines_read += o.lines_read;
        self.parse_failures += o.parse_failures;
        self.cache_hits += o.cache_hits;
        self.oracle_claims += o.oracle_claims;
        self.oracle_duplicates += o.oracle_duplicates;
        self.oracle_failures += o.oracle_failures;
    }
}

/// Everything a worker hands back at the end of its range.
#[derive(Debug)]
pub struct PartitionReport {
    pub index: usize,
    pub range: LineRange,
    pub aggregate: Aggregate,
    /// Raw passwords this partition counted as first-seen.
    pub unique: HashSet<Vec<u8>>,
    pub counters: ScanCounters,
    pub error: Option<anyhow::Error>,
    pub cancelled: bool,
}

/// Shared, read-only state every worker of a run borrows.
#[derive(Clone, Copy)]
pub struct WorkerContext<'a> {
    pub separator: Separator,
    pub mode: CountMode,
    pub spill: &'a SpillSignal,
    pub oracle: &'a dyn UniquenessOracle,
    pub cancel: &'a CancelToken,
    /// Cancel sibling workers when this one hits an I/O failure.
    pub fail_fast: bool,
}

pub struct Worker<'a> {
    ctx: WorkerContext<'a>,
    index: usize,
    range: LineRange,
    cache: HashMap<Vec<u8>, PasswordRecord>,
    /// First sights claimed through the oracle; cache keys join them at the end.
    claimed: HashSet<Vec<u8>>,
    aggregate: Aggregate,
    counters: ScanCounters,
}

impl<'a> Worker<'a> {
    pub fn new(ctx: WorkerContext<'a>, index: usize, range: LineRange) -> Self {
        Self {
            ctx,
            index,
            range,
            cache: HashMap::new(),
            claimed: HashSet::new(),
            aggregate: Aggregate::new(),
            counters: ScanCounters::default(),
        }
    }

    /// Scan this worker's range of the file at `path`.
    pub fn run(self, path: &Path, mmap_threshold: u64) -> PartitionReport {
        let range = self.range;
        match LineSource::open(path, range, mmap_threshold) {
            Ok(mut source) => {
                let display = path.display().to_string();
                let lines = std::iter::from_fn(move || {
                    let item = source.next()?;
                    let line = source.position().saturating_sub(1);
                    Some(item.map_err(|e| (e, line)))
                });
                self.scan_with(lines, |(e, line): (io::Error, u64)| {
                    anyhow!(e).context(format!("read {} at line {}", display, line))
                })
            }
            Err(e) => {
                let msg = format!("partition {} (lines {}..{})", self.index, range.start, range.end);
                self.fail(e.context(msg))
            }
        }
    }

    /// Scan an in-memory sequence of lines as if it were this worker's range.
    pub fn scan<I, L>(self, lines: I) -> PartitionReport
    where
        I: IntoIterator<Item = io::Result<L>>,
        L: AsRef<[u8]>,
    {
        self.scan_with(lines, |e: io::Error| anyhow!(e).context("read line"))
    }

    fn scan_with<I, L, E>(mut self, lines: I, wrap: impl Fn(E) -> anyhow::Error) -> PartitionReport
    where
        I: IntoIterator<Item = Result<L, E>>,
        L: AsRef<[u8]>,
    {
        let mut cancelled = false;
        let mut failure = None;
        for item in lines {
            if self.ctx.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            match item {
                Ok(line) => {
                    self.counters.lines_read += 1;
                    match parse_credential_line(line.as_ref(), self.ctx.separator) {
                        Ok(cred) => self.observe(cred.password),
                        Err(_) => self.counters.parse_failures += 1,
                    }
                }
                Err(e) => {
                    failure = Some(wrap(e));
                    break;
                }
            }
        }
        match failure {
            Some(e) => self.fail(e),
            None => self.finish(None, cancelled),
        }
    }

    /// Account for one parsed password.
    pub fn observe(&mut self, password: &[u8]) {
        self.aggregate.record_occurrence();
        if self.ctx.mode == CountMode::Occurrences {
            self.aggregate.apply(&classify(password), 1);
            return;
        }
        if let Some(rec) = self.cache.get_mut(password) {
            rec.occurrences += 1;
            self.counters.cache_hits += 1;
            return;
        }
        if !self.ctx.spill.is_set() {
            let rec = classify(password);
            self.aggregate.apply(&rec, 1);
            self.cache.insert(password.to_vec(), rec);
            return;
        }
        match self.ctx.oracle.claim(password) {
            Ok(Claim::NewlyClaimed) => {
                self.aggregate.apply(&classify(password), 1);
                self.claimed.insert(password.to_vec());
                self.counters.oracle_claims += 1;
            }
            Ok(Claim::AlreadyClaimed) => self.counters.oracle_duplicates += 1,
            Err(e) => {
                self.counters.oracle_failures += 1;
                if self.counters.oracle_failures == 1 {
                    warn!("partition {}: oracle claim failed: {}", self.index, e);
                } else {
                    debug!("partition {}: oracle claim failed: {}", self.index, e);
                }
            }
        }
    }

    fn fail(self, e: anyhow::Error) -> PartitionReport {
        debug!("partition {} stopped on error: {:#}", self.index, e);
        if self.ctx.fail_fast {
            self.ctx.cancel.cancel();
        }
        self.finish(Some(e), false)
    }

    fn finish(self, error: Option<anyhow::Error>, cancelled: bool) -> PartitionReport {
        let Self {
            index,
            range,
            cache,
            mut claimed,
            aggregate,
            counters,
            ..
        } = self;
        if counters.oracle_failures > 1 {
            warn!(
                "partition {}: {} oracle claims failed in total",
                index, counters.oracle_failures
            );
        }
        claimed.extend(cache.into_keys());
        debug!(
            "partition {} done: {} lines, {} passwords, {} unique",
            index, counters.lines_read, aggregate.total_pw, aggregate.total_unique_pw
        );
        PartitionReport {
            index,
            range,
            aggregate,
            unique: claimed,
            counters,
            error,
            cancelled,
        }
    }
}
