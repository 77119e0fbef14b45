//! Memory pressure monitoring and the one-way spill signal.
//!
//! A [`MemoryMonitor`] thread samples process memory on an interval and trips
//! the shared [`SpillSignal`] once the configured budget is reached. The
//! signal is a latch: once tripped it stays tripped for the rest of the run,
//! and workers switch from their local caches to the uniqueness oracle.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How much memory the local caches may use before spilling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBudget {
    /// Never cache locally; every first sight goes to the oracle.
    AlwaysSpill,
    /// Never spill.
    Unlimited,
    /// Spill once sampled usage reaches this many bytes.
    Bytes(u64),
}

impl MemoryBudget {
    /// `0` always spills, negative never spills.
    pub fn from_bytes(bytes: i64) -> Self {
        match bytes {
            0 => Self::AlwaysSpill,
            b if b < 0 => Self::Unlimited,
            b => Self::Bytes(b.unsigned_abs()),
        }
    }
}

/// Shared, monotonic "use the oracle" flag.
#[derive(Debug, Clone, Default)]
pub struct SpillSignal(Arc<AtomicBool>);

impl SpillSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that starts out tripped.
    pub fn tripped() -> Self {
        let s = Self::new();
        s.trip();
        s
    }

    /// Trip the latch. Returns true only for the call that flipped it.
    pub fn trip(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Source of "bytes in use" readings.
pub trait MemorySampler: Send + 'static {
    fn sample(&mut self) -> Result<u64>;
}

/// Resident memory of the current process, read through `sysinfo`.
pub struct ProcessMemorySampler {
    sys: System,
    pid: Pid,
}

impl ProcessMemorySampler {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("current pid: {e}"))?;
        Ok(Self {
            sys: System::new(),
            pid,
        })
    }
}

impl MemorySampler for ProcessMemorySampler {
    fn sample(&mut self) -> Result<u64> {
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.sys
            .process(self.pid)
            .map(|p| p.memory())
            .with_context(|| format!("process {} not visible to sysinfo", self.pid))
    }
}

/// Handle to a running monitor thread. Stops and joins the thread on drop.
pub struct MonitorHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the thread out of its timed wait.
        self.stop.take();
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                warn!("memory monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct MemoryMonitor;

impl MemoryMonitor {
    /// Start monitoring for `budget`. `AlwaysSpill` trips the signal
    /// immediately and `Unlimited` starts nothing; both return `None`.
    pub fn spawn<S: MemorySampler>(
        budget: MemoryBudget,
        mut sampler: S,
        interval: Duration,
        signal: SpillSignal,
    ) -> Result<Option<MonitorHandle>> {
        let limit = match budget {
            MemoryBudget::AlwaysSpill => {
                info!("zero cache budget, all first sights go to the oracle");
                signal.trip();
                return Ok(None);
            }
            MemoryBudget::Unlimited => return Ok(None),
            MemoryBudget::Bytes(b) => b,
        };
        let (tx, rx) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("pwstat-memory-monitor".into())
            .spawn(move || {
                loop {
                    match sampler.sample() {
                        Ok(used) => {
                            debug!("memory in use: {} MB", used / 1_000_000);
                            if used >= limit {
                                if signal.trip() {
                                    info!(
                                        "memory {} bytes >= budget {} bytes, spilling to oracle",
                                        used, limit
                                    );
                                }
                                return;
                            }
                        }
                        Err(e) => warn!("memory sample failed: {:#}", e),
                    }
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            })
            .context("spawn memory monitor thread")?;
        Ok(Some(MonitorHandle {
            stop: Some(tx),
            thread: Some(thread),
        }))
    }
}
