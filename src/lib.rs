pub mod classify;
pub mod credential;
pub mod engine;
pub mod export;
pub mod io;
pub mod merge;
pub mod monitor;
pub mod oracle;
pub mod partition;
pub mod report;
pub mod stats;
pub mod worker;

pub mod prelude {
    pub use crate::classify::{PasswordRecord, classify};
    pub use crate::engine::{AnalysisConfig, Engine, RunSummary};
    pub use crate::oracle::{Claim, MemoryOracle, SqliteOracle, UniquenessOracle};
    pub use crate::stats::{Aggregate, StatReport};
}
