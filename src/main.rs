//! CLI entrypoint for `pwstat`.
//!
//! Parses command-line arguments, validates the run configuration, opens the
//! uniqueness oracle, runs the partitioned analysis through the library
//! engine, prints a terminal summary, and optionally writes JSON/CSV exports.
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use log::{LevelFilter, error, info, warn};
use pwstat::{
    credential::Separator,
    engine::{AnalysisConfig, DEFAULT_CACHE_BYTES, Engine},
    export::{write_lengths_csv, write_stats_json},
    io::DEFAULT_MMAP_THRESHOLD_BYTES,
    monitor::MemoryBudget,
    oracle::{MemoryOracle, SqliteOracle, UniquenessOracle},
    report::render_summary,
    worker::CountMode,
};
use tempfile::TempDir;

#[derive(Parser, Debug)]
#[command(
    name = "pwstat",
    version,
    about = "Unique password composition statistics for large credential dumps"
)]
struct Args {
    /// Credential file, one `username<TAB>password` per line
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// First line to read (zero-based)
    #[arg(long = "offset", default_value_t = 0)]
    offset: u64,

    /// Number of lines to read from the offset. Defaults to the rest of the file.
    #[arg(short = 'l', long = "limit")]
    limit: Option<u64>,

    /// Number of worker threads (one partition each)
    #[arg(short = 't', long = "threads", default_value_t = 1)]
    threads: usize,

    /// Memory budget in bytes before workers spill to the oracle. 0 always spills, negative never does.
    #[arg(
        short = 'c',
        long = "cache-bytes",
        default_value_t = DEFAULT_CACHE_BYTES,
        allow_negative_numbers = true
    )]
    cache_bytes: i64,

    /// Memory sampling interval in milliseconds
    #[arg(long = "poll-ms", default_value_t = 5000)]
    poll_ms: u64,

    /// Count every occurrence instead of unique passwords
    #[arg(long = "all-occurrences")]
    all_occurrences: bool,

    /// Claim store used after spilling
    #[arg(long = "oracle", value_enum, default_value_t = OracleKind::Sqlite)]
    oracle: OracleKind,

    /// SQLite claim store path. Defaults to a temporary file removed on exit.
    #[arg(long = "oracle-db")]
    oracle_db: Option<PathBuf>,

    /// Keep claims already present in --oracle-db instead of clearing them
    #[arg(long = "keep-oracle", requires = "oracle_db")]
    keep_oracle: bool,

    /// How long a claim may wait on a locked store, in milliseconds
    #[arg(long = "oracle-timeout-ms", default_value_t = 5000)]
    oracle_timeout_ms: u64,

    /// Field separator between username and password
    #[arg(long = "separator", value_enum, default_value_t = Separator::Tab)]
    separator: Separator,

    /// Stop all workers as soon as one partition hits a read error
    #[arg(long = "fail-fast")]
    fail_fast: bool,

    /// Override mmap threshold in bytes. If zero, disable mmap.
    #[arg(long = "mmap-threshold", default_value_t = DEFAULT_MMAP_THRESHOLD_BYTES)]
    mmap_threshold: u64,

    /// Path to the output directory
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Write the JSON statistics to this exact path
    #[arg(long = "stats-file")]
    stats_file: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Control color output (auto, always, never)
    #[arg(long = "color", value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    /// Suppress summary output (still writes exports if requested)
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OracleKind {
    Sqlite,
    Memory,
}

const ASCII_TITLE: &str = r#"
                        _        _
  _ ____      _____ ___| |_ __ _| |_
 | '_ \ \ /\ / / __|/ __| __/ _` | __|
 | |_) \ V  V /\__ \ (__| || (_| | |_
 | .__/ \_/\_/ |___/\___|\__\__,_|\__|
 |_|
"#;

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .try_init();
}

fn build_config(args: &Args) -> AnalysisConfig {
    let mut cfg = AnalysisConfig::new(&args.input);
    cfg.offset = args.offset;
    cfg.limit = args.limit;
    cfg.workers = args.threads;
    cfg.budget = MemoryBudget::from_bytes(args.cache_bytes);
    cfg.poll_interval = Duration::from_millis(args.poll_ms.max(1));
    cfg.mmap_threshold = if args.mmap_threshold == 0 {
        u64::MAX
    } else {
        args.mmap_threshold
    };
    cfg.separator = args.separator;
    cfg.mode = if args.all_occurrences {
        CountMode::Occurrences
    } else {
        CountMode::Unique
    };
    cfg.fail_fast = args.fail_fast;
    cfg
}

/// Open the claim store. The returned `TempDir`, if any, owns the store's
/// files and must outlive the oracle.
fn open_oracle(args: &Args) -> Result<(Arc<dyn UniquenessOracle>, Option<TempDir>)> {
    if args.oracle == OracleKind::Memory {
        return Ok((Arc::new(MemoryOracle::new()), None));
    }
    let timeout = Duration::from_millis(args.oracle_timeout_ms);
    match &args.oracle_db {
        Some(path) => {
            let opened = if args.keep_oracle {
                SqliteOracle::open(path, timeout)
            } else {
                SqliteOracle::open_fresh(path, timeout)
            };
            let oracle = opened.with_context(|| format!("open oracle {}", path.display()))?;
            Ok((Arc::new(oracle), None))
        }
        None => {
            let dir = tempfile::Builder::new()
                .prefix("pwstat-oracle-")
                .tempdir()
                .context("create oracle directory")?;
            let path = dir.path().join("claims.sqlite");
            let oracle = SqliteOracle::open(&path, timeout)
                .with_context(|| format!("open oracle {}", path.display()))?;
            Ok((Arc::new(oracle), Some(dir)))
        }
    }
}

fn install_interrupt_handler(engine: &Engine) {
    let cancel = engine.cancel_token();
    let installed = ctrlc::set_handler(move || {
        if !cancel.is_cancelled() {
            warn!("interrupt received, stopping workers");
        }
        cancel.cancel();
    });
    if let Err(e) = installed {
        warn!("failed to install Ctrl-C handler: {}", e);
    }
}

fn write_outputs(args: &Args, summary: &pwstat::engine::RunSummary) -> i32 {
    if let Some(path) = &args.stats_file {
        if let Err(e) = write_stats_json(&summary.report, path) {
            error!("failed to write {}: {:#}", path.display(), e);
            return 5;
        }
        info!("wrote {}", path.display());
    }
    if let Some(outdir) = &args.output {
        if let Err(e) = fs::create_dir_all(outdir) {
            error!(
                "failed to create output directory {}: {}",
                outdir.display(),
                e
            );
            return 4;
        }
        let ts = chrono::Local::now().format("%Y.%m.%d_%H.%M.%S");
        let json = outdir.join(format!("pwstat_stats_{}.json", ts));
        let csv = outdir.join(format!("pwstat_lengths_{}.csv", ts));
        if let Err(e) = write_stats_json(&summary.report, &json) {
            error!("failed to write {}: {:#}", json.display(), e);
            return 5;
        }
        if let Err(e) = write_lengths_csv(&summary.outcome.aggregate, &csv) {
            error!("failed to write {}: {:#}", csv.display(), e);
            return 6;
        }
        info!("wrote {} and {}", json.display(), csv.display());
    }
    0
}

fn run(args: Args) -> i32 {
    let config = build_config(&args);
    if let Err(e) = config.validate() {
        error!("{}", e);
        return 2;
    }
    let (oracle, _oracle_dir) = match open_oracle(&args) {
        Ok(o) => o,
        Err(e) => {
            error!("failed to open uniqueness oracle: {:#}", e);
            return 3;
        }
    };
    let engine = Engine::new(config, oracle);
    install_interrupt_handler(&engine);

    let summary = match engine.run() {
        Ok(s) => s,
        Err(e) => {
            error!("analysis failed: {:#}", e);
            return 3;
        }
    };
    for f in &summary.outcome.failures {
        error!(
            "partition {} (lines {}..{}) incomplete: {:#}",
            f.index, f.range.start, f.range.end, f.error
        );
    }

    if !args.quiet {
        // Print banner and summary
        println!("{}", ASCII_TITLE.bold().green());
        println!("{}", render_summary(&summary));
    }
    write_outputs(&args, &summary)
}

fn main() {
    let args = Args::parse();
    init_logger(args.verbose);
    // Configure color policy
    match args.color {
        ColorChoice::Always => {
            colored::control::set_override(true);
        }
        ColorChoice::Never => {
            colored::control::set_override(false);
        }
        ColorChoice::Auto => {}
    }
    let code = run(args);
    std::process::exit(code);
}

