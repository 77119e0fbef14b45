//! Uniqueness oracle: an atomic insert-if-absent keyspace shared by workers
//! once they have spilled out of their in-memory caches.
//!
//! Exactly one concurrent caller of [`UniquenessOracle::claim`] for a given key
//! observes [`Claim::NewlyClaimed`]. [`SqliteOracle`] gets that from a primary
//! key constraint; [`MemoryOracle`] from a mutex-guarded set.
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use log::debug;
use rusqlite::{Connection, ErrorCode, params};

/// Default time a claim may wait on a locked store before failing.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(5);

const CLAIMS_TABLE: &str = "pwstat_claims";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    NewlyClaimed,
    AlreadyClaimed,
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("claim store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("claim store busy for longer than {0:?}")]
    Timeout(Duration),
    #[error("claim store lock poisoned")]
    Poisoned,
}

pub trait UniquenessOracle: Send + Sync {
    /// Claim `key`, the raw password bytes.
    fn claim(&self, key: &[u8]) -> Result<Claim, OracleError>;
}

/// Persistent claim store backed by SQLite.
pub struct SqliteOracle {
    conn: Mutex<Connection>,
    timeout: Duration,
}

impl SqliteOracle {
    /// Open (creating if needed) a claim store at `path`. Existing claims are
    /// kept, so a second run against the same file sees them as taken.
    pub fn open<P: AsRef<Path>>(path: P, timeout: Duration) -> Result<Self, OracleError> {
        let conn = Connection::open(path.as_ref())?;
        // journal_mode returns a row, so it cannot go through execute_batch.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        Self::init(conn, timeout)
    }

    /// Open the store at `path` and drop any claims left by earlier runs.
    pub fn open_fresh<P: AsRef<Path>>(path: P, timeout: Duration) -> Result<Self, OracleError> {
        let oracle = Self::open(path, timeout)?;
        oracle.clear()?;
        Ok(oracle)
    }

    pub fn open_in_memory() -> Result<Self, OracleError> {
        Self::init(Connection::open_in_memory()?, DEFAULT_ORACLE_TIMEOUT)
    }

    fn init(conn: Connection, timeout: Duration) -> Result<Self, OracleError> {
        conn.busy_timeout(timeout)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {CLAIMS_TABLE} (pw BLOB PRIMARY KEY NOT NULL) WITHOUT ROWID;"
        ))?;
        Ok(Self {
            conn: Mutex::new(conn),
            timeout,
        })
    }

    pub fn clear(&self) -> Result<(), OracleError> {
        let conn = self.conn.lock().map_err(|_| OracleError::Poisoned)?;
        let removed = conn.execute(&format!("DELETE FROM {CLAIMS_TABLE}"), [])?;
        debug!("cleared {} stale claims", removed);
        Ok(())
    }

    /// Number of claimed keys.
    pub fn len(&self) -> Result<u64, OracleError> {
        let conn = self.conn.lock().map_err(|_| OracleError::Poisoned)?;
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {CLAIMS_TABLE}"), [], |r| {
            r.get(0)
        })?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    pub fn is_empty(&self) -> Result<bool, OracleError> {
        Ok(self.len()? == 0)
    }
}

impl UniquenessOracle for SqliteOracle {
    fn claim(&self, key: &[u8]) -> Result<Claim, OracleError> {
        let conn = self.conn.lock().map_err(|_| OracleError::Poisoned)?;
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT OR IGNORE INTO {CLAIMS_TABLE} (pw) VALUES (?1)"
        ))?;
        match stmt.execute(params![key]) {
            Ok(1) => Ok(Claim::NewlyClaimed),
            Ok(_) => Ok(Claim::AlreadyClaimed),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                Err(OracleError::Timeout(self.timeout))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process claim set. Useful for tests and for runs where the spilled
/// keyspace is expected to fit in memory anyway.
#[derive(Debug, Default)]
pub struct MemoryOracle {
    claimed: Mutex<HashSet<Vec<u8>>>,
}

impl MemoryOracle {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UniquenessOracle for MemoryOracle {
    fn claim(&self, key: &[u8]) -> Result<Claim, OracleError> {
        let mut claimed = self.claimed.lock().map_err(|_| OracleError::Poisoned)?;
        if claimed.insert(key.to_vec()) {
            Ok(Claim::NewlyClaimed)
        } else {
            Ok(Claim::AlreadyClaimed)
        }
    }
}
