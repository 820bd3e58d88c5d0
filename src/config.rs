//! Historian configuration.
//!
//! Every option can be changed at runtime through the matching `Historian::set_*`
//! method. Size limits are in megabytes and timeouts in milliseconds; a value of zero
//! or below disables the feature it controls.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorianConfig {
    /// Directory that holds the backing database files.
    pub directory: PathBuf,

    /// File name prefix, as in `<base_name>_<epoch-ms>.<suffix>`.
    pub base_name: String,

    /// File extension without the dot.
    pub suffix: String,

    /// Size at which the writable file is rotated.
    /// Default: 100 MB
    pub file_size_limit_mb: i64,

    /// Aggregate size at which the oldest files are deleted.
    /// Default: disabled
    pub total_size_limit_mb: i64,

    /// Write batching window. Zero makes every write its own transaction.
    /// Default: 1000 ms
    pub transaction_timeout_ms: i64,

    /// Non-writable files unused for this long are closed.
    /// Default: 60 s
    pub idle_timeout_ms: i64,

    /// Rotation/retention check interval when batching is disabled (0 = after every write).
    /// Default: 10 s
    pub rotation_check_interval_ms: u64,

    /// Lifetime of cached neighbour-search results.
    /// Default: 500 ms
    pub find_cache_ttl_ms: u64,

    /// Most rows a single range read returns.
    /// Default: 100 000
    pub max_read_points: usize,

    /// Capacity of the deferred log queue.
    /// Default: 1024
    pub log_queue_capacity: usize,

    /// Reconcile the catalog when files are added or removed externally.
    /// Default: true
    pub watch_directory: bool,

    /// Quiet period required after a filesystem notification before reconciling.
    /// Default: 500 ms
    pub watch_debounce_ms: u64,

    /// Prepared statements kept per open connection.
    /// Default: 64
    pub prepared_statement_capacity: usize,
}

impl Default for HistorianConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./history"),
            base_name: "history".to_string(),
            suffix: "db".to_string(),
            file_size_limit_mb: 100,
            total_size_limit_mb: 0,
            transaction_timeout_ms: 1000,
            idle_timeout_ms: 60_000,
            rotation_check_interval_ms: 10_000,
            find_cache_ttl_ms: 500,
            max_read_points: 100_000,
            log_queue_capacity: crate::log_sink::DEFAULT_DEFERRED_CAPACITY,
            watch_directory: true,
            watch_debounce_ms: 500,
            prepared_statement_capacity: 64,
        }
    }
}

impl HistorianConfig {
    /// Default configuration rooted at `directory`.
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(Error::Config("directory is empty".into()));
        }
        validate_name_part("base_name", &self.base_name)?;
        validate_name_part("suffix", &self.suffix)?;
        if self.suffix.contains('.') {
            return Err(Error::Config(format!("suffix {:?} contains '.'", self.suffix)));
        }
        Ok(())
    }

    pub fn file_size_limit_bytes(&self) -> Option<u64> {
        mb_to_bytes(self.file_size_limit_mb)
    }

    pub fn total_size_limit_bytes(&self) -> Option<u64> {
        mb_to_bytes(self.total_size_limit_mb)
    }

    /// Batching window, or `None` when every write commits on its own.
    pub fn transaction_timeout(&self) -> Option<i64> {
        (self.transaction_timeout_ms > 0).then_some(self.transaction_timeout_ms)
    }

    /// Idle-close threshold, or `None` when auto close is disabled.
    pub fn idle_timeout(&self) -> Option<i64> {
        (self.idle_timeout_ms > 0).then_some(self.idle_timeout_ms)
    }
}

fn validate_name_part(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Config(format!("{field} is empty")));
    }
    if value.contains(['/', '\\']) {
        return Err(Error::Config(format!("{field} {value:?} contains a path separator")));
    }
    Ok(())
}

fn mb_to_bytes(mb: i64) -> Option<u64> {
    (mb > 0).then(|| (mb as u64).saturating_mul(BYTES_PER_MB))
}
