//! StrataDB: a small single-node relational engine storing each table as
//! one binary file, with a pessimistic FIFO lock manager and shadow-file
//! transaction isolation.

use std::path::PathBuf;
use std::time::Duration;

pub mod error;
pub mod format;
pub mod lock;
pub mod operation;
pub mod shadow;
pub mod sql;
pub mod storage;
pub mod txn;
pub mod types;

pub use error::{Error, Result};
pub use storage::StorageEngine;
pub use txn::TransactionManager;

/// Engine-wide configuration. There is no config file format — the binary
/// constructs this from defaults overridden by CLI flags (`--data-dir`),
/// matching the teacher's `Config`.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding table files and transaction shadows. Created on
    /// first write; never cleaned by the core.
    pub data_dir: PathBuf,
    /// How long `RequestAndWait` blocks for a lock before failing
    /// `LockTimeout`.
    pub lock_timeout: Duration,
    /// Polling cadence used while a lock request waits to be granted.
    pub lock_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./db"),
            lock_timeout: Duration::from_secs(60),
            lock_poll_interval: lock::POLL_INTERVAL,
        }
    }
}

/// Construct a ready-to-use [`TransactionManager`] from `config`, sweeping
/// any shadow files left behind by a prior crash before the first
/// transaction begins.
pub fn open(config: Config) -> Result<TransactionManager> {
    shadow::sweep_orphaned_shadows(&config.data_dir)?;
    let storage = StorageEngine::new(config.data_dir)?;
    Ok(TransactionManager::with_poll_interval(
        storage,
        config.lock_timeout,
        config.lock_poll_interval,
    ))
}

