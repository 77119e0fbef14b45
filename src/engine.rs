//! Engine: validates a run, splits the input into line ranges, scans them on
//! a worker pool while a monitor thread watches memory, then merges the
//! partition reports into one set of statistics.
//!
//! Typical usage:
//!
//! ```no_run
//! use std::sync::Arc;
//! use pwstat::engine::{AnalysisConfig, Engine};
//! use pwstat::oracle::MemoryOracle;
//! # fn main() -> anyhow::Result<()> {
//! let mut config = AnalysisConfig::new("/path/to/credentials.txt");
//! config.workers = 4;
//! let engine = Engine::new(config, Arc::new(MemoryOracle::new()));
//! let summary = engine.run()?;
//! println!("{}", pwstat::report::render_summary(&summary));
//! # Ok(())
//! # }
//! ```
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::credential::Separator;
use crate::io::{DEFAULT_MMAP_THRESHOLD_BYTES, count_lines};
use crate::merge::{MergeOutcome, Merger};
use crate::monitor::{
    DEFAULT_POLL_INTERVAL, MemoryBudget, MemoryMonitor, MemorySampler, ProcessMemorySampler,
    SpillSignal,
};
use crate::oracle::UniquenessOracle;
use crate::partition::{LineRange, partition};
use crate::stats::StatReport;
use crate::worker::{CancelToken, CountMode, PartitionReport, Worker, WorkerContext};

/// Default local cache budget in bytes.
pub const DEFAULT_CACHE_BYTES: i64 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one worker is required")]
    NoWorkers,
    #[error("input file does not exist: {}", .0.display())]
    InputMissing(PathBuf),
    #[error("input is a directory: {}", .0.display())]
    InputIsDirectory(PathBuf),
}

/// Everything that shapes one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub input: PathBuf,
    /// First line (zero-based) to read.
    pub offset: u64,
    /// Lines to read from `offset`; `None` reads to the end of the file.
    pub limit: Option<u64>,
    pub workers: usize,
    pub budget: MemoryBudget,
    pub poll_interval: Duration,
    pub mmap_threshold: u64,
    pub separator: Separator,
    pub mode: CountMode,
    pub fail_fast: bool,
}

impl AnalysisConfig {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            offset: 0,
            limit: None,
            workers: 1,
            budget: MemoryBudget::from_bytes(DEFAULT_CACHE_BYTES),
            poll_interval: DEFAULT_POLL_INTERVAL,
            mmap_threshold: DEFAULT_MMAP_THRESHOLD_BYTES,
            separator: Separator::default(),
            mode: CountMode::default(),
            fail_fast: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if !self.input.exists() {
            return Err(ConfigError::InputMissing(self.input.clone()));
        }
        if self.input.is_dir() {
            return Err(ConfigError::InputIsDirectory(self.input.clone()));
        }
        Ok(())
    }
}

/// Result of a completed run, including partial ones.
#[derive(Debug)]
pub struct RunSummary {
    pub input: PathBuf,
    pub ranges: Vec<LineRange>,
    pub outcome: MergeOutcome,
    pub report: StatReport,
    /// Whether any worker switched to the oracle.
    pub spilled: bool,
    /// Whether the run was asked to stop before every range was scanned.
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// Runs analyses against one shared oracle.
pub struct Engine {
    config: AnalysisConfig,
    oracle: Arc<dyn UniquenessOracle>,
    cancel: CancelToken,
}

impl Engine {
    pub fn new(config: AnalysisConfig, oracle: Arc<dyn UniquenessOracle>) -> Self {
        Self {
            config,
            oracle,
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Token that stops every worker of this engine between lines.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run with the process's own memory as the spill trigger.
    pub fn run(&self) -> Result<RunSummary> {
        let sampler = ProcessMemorySampler::new().context("start memory sampler")?;
        self.run_with_sampler(sampler)
    }

    pub fn run_with_sampler<S: MemorySampler>(&self, sampler: S) -> Result<RunSummary> {
        let cfg = &self.config;
        cfg.validate()?;
        let started = Instant::now();

        let total = match cfg.limit {
            Some(limit) => limit,
            None => {
                let lines = count_lines(&cfg.input, cfg.mmap_threshold)?;
                debug!("{} has {} lines", cfg.input.display(), lines);
                lines.saturating_sub(cfg.offset)
            }
        };
        let ranges = partition(cfg.offset, total, cfg.workers);
        info!(
            "analyzing {} lines of {} from line {} with {} worker(s)",
            total,
            cfg.input.display(),
            cfg.offset,
            cfg.workers
        );
        for (i, r) in ranges.iter().enumerate() {
            debug!("partition {}: lines {}..{}", i, r.start, r.end);
        }

        let spill = SpillSignal::new();
        let monitor = match cfg.mode {
            CountMode::Unique => {
                MemoryMonitor::spawn(cfg.budget, sampler, cfg.poll_interval, spill.clone())?
            }
            CountMode::Occurrences => None,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.workers)
            .thread_name(|i| format!("pwstat-worker-{i}"))
            .build()
            .context("build worker pool")?;
        let ctx = WorkerContext {
            separator: cfg.separator,
            mode: cfg.mode,
            spill: &spill,
            oracle: &*self.oracle,
            cancel: &self.cancel,
            fail_fast: cfg.fail_fast,
        };
        let reports: Vec<PartitionReport> = pool.install(|| {
            ranges
                .par_iter()
                .enumerate()
                .map(|(i, range)| Worker::new(ctx, i, *range).run(&cfg.input, cfg.mmap_threshold))
                .collect()
        });
        if let Some(m) = monitor {
            m.stop();
        }

        let mut merger = Merger::new();
        for r in reports {
            merger.fold(r);
        }
        let outcome = merger.finish();
        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            warn!(
                "run cancelled; {} partition(s) stopped early",
                outcome.cancelled_partitions.len()
            );
        }
        info!(
            "merged {} partitions: {} passwords, {} unique, {} collisions",
            outcome.partitions,
            outcome.aggregate.total_pw,
            outcome.aggregate.total_unique_pw,
            outcome.collisions
        );

        Ok(RunSummary {
            input: cfg.input.clone(),
            ranges,
            report: StatReport::from_aggregate(&outcome.aggregate),
            outcome,
            spilled: spill.is_set(),
            cancelled,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{MemoryOracle, SqliteOracle};
    use std::collections::HashSet;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    struct Fixed(u64);

    impl MemorySampler for Fixed {
        fn sample(&mut self) -> Result<u64> {
            Ok(self.0)
        }
    }

    /// Reports nothing on the first sample and a huge reading afterwards.
    struct TripsLater(bool);

    impl MemorySampler for TripsLater {
        fn sample(&mut self) -> Result<u64> {
            let first = !self.0;
            self.0 = true;
            Ok(if first { 0 } else { u64::MAX })
        }
    }

    const SCENARIO: &str = "alice\tPassword1\nbob\tPassword1\ncarol abc\n";

    fn file_with(contents: impl AsRef<[u8]>) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_ref()).unwrap();
        f.flush().unwrap();
        f
    }

    fn run(
        f: &NamedTempFile,
        workers: usize,
        budget: MemoryBudget,
        oracle: Arc<dyn UniquenessOracle>,
    ) -> RunSummary {
        let mut cfg = AnalysisConfig::new(f.path());
        cfg.workers = workers;
        cfg.budget = budget;
        cfg.poll_interval = Duration::from_millis(1);
        Engine::new(cfg, oracle)
            .run_with_sampler(Fixed(0))
            .unwrap()
    }

    fn assert_scenario(s: &RunSummary) {
        let agg = &s.outcome.aggregate;
        assert_eq!(agg.total_pw, 2);
        assert_eq!(agg.total_unique_pw, 1);
        assert_eq!(agg.lengths.len(), 1);
        assert_eq!(agg.lengths.get(&9), Some(&1));
        assert_eq!(s.report.has_uppercase, 1.0);
        assert_eq!(s.report.has_lowercase, 1.0);
        assert_eq!(s.report.has_numbers, 1.0);
        assert_eq!(s.report.format_letters_digits, 1.0);
        assert_eq!(s.report.format_digits_letters, 0.0);
        assert_eq!(s.outcome.counters.parse_failures, 1);
    }

    #[test]
    fn validate_rejects_bad_config() {
        let f = file_with("");
        let mut cfg = AnalysisConfig::new(f.path());
        cfg.workers = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::NoWorkers)));

        let cfg = AnalysisConfig::new("/definitely/not/here.txt");
        assert!(matches!(cfg.validate(), Err(ConfigError::InputMissing(_))));

        let dir = tempfile::tempdir().unwrap();
        let cfg = AnalysisConfig::new(dir.path());
        assert!(matches!(cfg.validate(), Err(ConfigError::InputIsDirectory(_))));
    }

    #[test]
    fn scenario_single_worker() {
        let f = file_with(SCENARIO);
        let s = run(&f, 1, MemoryBudget::Unlimited, Arc::new(MemoryOracle::new()));
        assert_scenario(&s);
        assert_eq!(s.outcome.collisions, 0);
        assert!(!s.spilled);
    }

    #[test]
    fn scenario_two_workers_matches_single() {
        let f = file_with(SCENARIO);
        let one = run(&f, 1, MemoryBudget::Unlimited, Arc::new(MemoryOracle::new()));
        let two = run(&f, 2, MemoryBudget::Unlimited, Arc::new(MemoryOracle::new()));
        assert_scenario(&two);
        assert_eq!(one.outcome.aggregate, two.outcome.aggregate);
    }

    #[test]
    fn scenario_explicit_split_merges_to_same_aggregate() {
        let f = file_with(SCENARIO);
        let whole = run(&f, 1, MemoryBudget::Unlimited, Arc::new(MemoryOracle::new()));

        let oracle = MemoryOracle::new();
        let spill = SpillSignal::new();
        let cancel = CancelToken::new();
        let ctx = WorkerContext {
            separator: Separator::Tab,
            mode: CountMode::Unique,
            spill: &spill,
            oracle: &oracle,
            cancel: &cancel,
            fail_fast: false,
        };
        let parts: [&[&str]; 2] = [&["alice\tPassword1"], &["bob\tPassword1", "carol abc"]];
        let mut merger = Merger::new();
        for (i, lines) in parts.iter().enumerate() {
            let lines = lines.iter().map(|l| Ok(l.to_string()));
            merger.fold(Worker::new(ctx, i, LineRange::default()).scan(lines));
        }
        let out = merger.finish();
        assert_eq!(out.aggregate, whole.outcome.aggregate);
        assert_eq!(out.collisions, 1);
    }

    #[test]
    fn empty_input_yields_zeros() {
        let f = file_with("");
        let s = run(&f, 4, MemoryBudget::Unlimited, Arc::new(MemoryOracle::new()));
        assert_eq!(s.outcome.aggregate.total_pw, 0);
        assert_eq!(s.outcome.aggregate.total_unique_pw, 0);
        assert_eq!(s.report.unique_passwords_percent, 0.0);
        assert_eq!(s.report.has_letters, 0.0);
        assert!(s.report.password_lengths.is_empty());
    }

    #[test]
    fn always_spill_uses_sqlite_oracle() {
        let f = file_with(SCENARIO);
        let oracle = Arc::new(SqliteOracle::open_in_memory().unwrap());
        let s = run(&f, 2, MemoryBudget::AlwaysSpill, oracle.clone());
        assert!(s.spilled);
        assert_scenario(&s);
        assert_eq!(oracle.len().unwrap(), 1);
    }

    #[test]
    fn spill_during_run_keeps_counts_exact() {
        let contents: String = (0..20_000)
            .map(|i| format!("user{i}\tpw{}\n", i % 700))
            .collect();
        let f = file_with(&contents);
        let mut cfg = AnalysisConfig::new(f.path());
        cfg.workers = 4;
        cfg.budget = MemoryBudget::Bytes(1);
        cfg.poll_interval = Duration::from_millis(1);
        let s = Engine::new(cfg, Arc::new(MemoryOracle::new()))
            .run_with_sampler(TripsLater(false))
            .unwrap();
        assert!(s.spilled);
        let c = &s.outcome.counters;
        assert!(c.oracle_claims + c.oracle_duplicates > 0);
        assert_eq!(s.outcome.aggregate.total_pw, 20_000);
        assert_eq!(s.outcome.aggregate.total_unique_pw, 700);
    }

    #[test]
    fn cached_and_claimed_copies_reconcile_to_one() {
        let oracle = MemoryOracle::new();
        let spill = SpillSignal::new();
        let cancel = CancelToken::new();
        let ctx = WorkerContext {
            separator: Separator::Tab,
            mode: CountMode::Unique,
            spill: &spill,
            oracle: &oracle,
            cancel: &cancel,
            fail_fast: false,
        };
        let before = Worker::new(ctx, 0, LineRange::default()).scan([io::Result::Ok("a\tX1x")]);
        assert_eq!(before.counters.oracle_claims, 0);
        spill.trip();
        let after = Worker::new(ctx, 1, LineRange::default()).scan([io::Result::Ok("b\tX1x")]);
        assert_eq!(after.counters.oracle_claims, 1);

        let mut merger = Merger::new();
        merger.fold(after);
        merger.fold(before);
        let out = merger.finish();
        assert_eq!(out.aggregate.total_pw, 2);
        assert_eq!(out.aggregate.total_unique_pw, 1);
        assert_eq!(out.aggregate.lengths.get(&3), Some(&1));
        assert_eq!(out.collisions, 1);
    }

    #[test]
    fn invalid_utf8_passwords_are_distinct() {
        let f = file_with(b"a\tpa\xffss\nb\tpa\xfess\nc\tpa\xffss\n");
        for (workers, budget) in [(1, MemoryBudget::Unlimited), (3, MemoryBudget::AlwaysSpill)] {
            let s = run(&f, workers, budget, Arc::new(MemoryOracle::new()));
            let agg = &s.outcome.aggregate;
            assert_eq!(agg.total_pw, 3);
            assert_eq!(agg.total_unique_pw, 2);
            assert_eq!(agg.lengths.len(), 1);
            assert_eq!(agg.lengths.get(&5), Some(&2));
        }
    }

    #[test]
    fn offset_and_limit_select_a_window() {
        let f = file_with("a\tone\nb\ttwo\nc\tthree\nd\tfour\n");
        let mut cfg = AnalysisConfig::new(f.path());
        cfg.offset = 1;
        cfg.limit = Some(2);
        cfg.workers = 2;
        cfg.budget = MemoryBudget::Unlimited;
        let s = Engine::new(cfg, Arc::new(MemoryOracle::new()))
            .run_with_sampler(Fixed(0))
            .unwrap();
        assert_eq!(s.outcome.aggregate.total_pw, 2);
        assert_eq!(s.ranges, vec![LineRange { start: 1, end: 2 }, LineRange { start: 2, end: 3 }]);
    }

    #[test]
    fn occurrences_mode_counts_repeats() {
        let f = file_with(SCENARIO);
        let mut cfg = AnalysisConfig::new(f.path());
        cfg.mode = CountMode::Occurrences;
        let s = Engine::new(cfg, Arc::new(MemoryOracle::new()))
            .run_with_sampler(Fixed(u64::MAX))
            .unwrap();
        assert_eq!(s.outcome.aggregate.total_pw, 2);
        assert_eq!(s.outcome.aggregate.total_unique_pw, 2);
        assert!(!s.spilled);
    }

    #[test]
    fn cancelled_before_start_scans_nothing() {
        let f = file_with(SCENARIO);
        let mut cfg = AnalysisConfig::new(f.path());
        cfg.workers = 2;
        cfg.budget = MemoryBudget::Unlimited;
        let engine = Engine::new(cfg, Arc::new(MemoryOracle::new()));
        engine.cancel_token().cancel();
        let s = engine.run_with_sampler(Fixed(0)).unwrap();
        assert!(s.cancelled);
        assert_eq!(s.outcome.cancelled_partitions, vec![0, 1]);
        assert_eq!(s.outcome.aggregate.total_pw, 0);
    }

    mod proptest_engine {
        use super::*;
        use proptest::prelude::*;

        fn corpus() -> impl Strategy<Value = Vec<String>> {
            proptest::collection::vec("[a-c1-2!]{1,4}", 0..60)
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(24))]

            /// Totals do not depend on worker count or spill path.
            #[test]
            fn totals_independent_of_workers_and_budget(
                passwords in corpus(),
                workers in prop::sample::select(vec![1usize, 2, 4, 8]),
                spill in any::<bool>(),
            ) {
                let contents: String = passwords
                    .iter()
                    .enumerate()
                    .map(|(i, pw)| format!("user{i}\t{pw}\n"))
                    .collect();
                let f = file_with(&contents);
                let budget = if spill { MemoryBudget::AlwaysSpill } else { MemoryBudget::Unlimited };
                let s = run(&f, workers, budget, Arc::new(MemoryOracle::new()));
                let distinct: HashSet<&String> = passwords.iter().collect();
                let agg = &s.outcome.aggregate;
                prop_assert_eq!(agg.total_pw, passwords.len() as u64);
                prop_assert_eq!(agg.total_unique_pw, distinct.len() as i64);
                prop_assert_eq!(agg.lengths.values().sum::<i64>(), distinct.len() as i64);
                prop_assert!(agg.lengths.values().all(|&n| n > 0));
            }
        }
    }
}
