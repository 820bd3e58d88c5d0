//! File catalog: the ordered set of backing files.
//!
//! Files are keyed by their creation timestamp (ms). The greatest key is the only
//! writable file; older files are read-mostly and may be closed when idle or
//! deleted by retention.
//!
//! # Placement
//!
//! A timestamp `t` belongs to the file with the greatest key `<= t`. Reads start
//! there and continue towards the tail, since a file only holds data written after
//! it was created. A series may be absent from any given file, so this is a
//! candidate set, not a guarantee.

mod retention;
mod stats;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::store::naming::{discover_files, file_path, parse_file_name, ParsedName};
use crate::store::BackingFile;

pub use retention::{plan_retention, RetentionCandidate, RetentionPlan};
pub use stats::MaintenanceStats;

/// Snapshot of one catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub key: i64,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub is_open: bool,
}

/// Limits applied by [`FileCatalog::check_rotation_and_retention`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeLimits {
    pub file_size_limit: Option<u64>,
    pub total_size_limit: Option<u64>,
    /// Read-protection window for retention, normally the idle-close timeout.
    pub protect_window_ms: Option<i64>,
}

#[derive(Debug)]
pub struct FileCatalog {
    dir: PathBuf,
    base_name: String,
    suffix: String,
    statement_capacity: usize,
    files: BTreeMap<i64, BackingFile>,
}

impl FileCatalog {
    pub fn new(
        dir: impl Into<PathBuf>,
        base_name: impl Into<String>,
        suffix: impl Into<String>,
        statement_capacity: usize,
    ) -> Self {
        Self {
            dir: dir.into(),
            base_name: base_name.into(),
            suffix: suffix.into(),
            statement_capacity,
            files: BTreeMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn statement_capacity(&self) -> usize {
        self.statement_capacity
    }

    pub fn set_statement_capacity(&mut self, capacity: usize) {
        self.statement_capacity = capacity;
    }

    /// Does `name` (a bare file name) look like one of this catalog's files?
    pub fn matches_file_name(&self, name: &str) -> bool {
        !matches!(
            parse_file_name(name, &self.base_name, &self.suffix),
            ParsedName::Foreign
        )
    }

    pub fn is_initialized(&self) -> bool {
        !self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Load existing files from the directory, creating one if none exist.
    ///
    /// # Errors
    ///
    /// - `Error::Config`: the directory cannot be created or listed
    /// - `Error::Sqlite`: the first file cannot be created
    pub fn ensure_initialized(&mut self, now_ms: i64) -> Result<MaintenanceStats> {
        let mut stats = MaintenanceStats::new();
        if self.is_initialized() {
            return Ok(stats);
        }

        std::fs::create_dir_all(&self.dir).map_err(|err| {
            Error::Config(format!("cannot create directory {}: {err}", self.dir.display()))
        })?;
        let discovery = discover_files(&self.dir, &self.base_name, &self.suffix)
            .map_err(|err| Error::Config(err.to_string()))?;

        for path in discovery.malformed {
            stats.record_warning(format!("skipping file with malformed name {}", path.display()));
            stats.skipped.push(path);
        }
        for (key, path) in discovery.files {
            self.files.insert(key, BackingFile::new(key, path));
            stats.loaded_count += 1;
        }

        if self.files.is_empty() {
            stats.created = Some(self.create_file(now_ms)?);
        }
        Ok(stats)
    }

    /// Create a new tail file keyed by `now_ms` (or just past the current tail).
    pub fn create_file(&mut self, now_ms: i64) -> Result<i64> {
        let key = match self.tail_key() {
            Some(tail) if tail >= now_ms => tail.saturating_add(1),
            _ => now_ms,
        };
        let path = file_path(&self.dir, &self.base_name, key, &self.suffix);
        let mut file = BackingFile::new(key, path);
        // Writing the header materialises the file so other processes can discover it.
        file.open(now_ms, self.statement_capacity)?
            .execute_batch("PRAGMA user_version = 1;")?;
        log::info!("created history file {}", file.path().display());
        self.files.insert(key, file);
        Ok(key)
    }

    pub fn keys(&self) -> Vec<i64> {
        self.files.keys().copied().collect()
    }

    pub fn oldest_key(&self) -> Option<i64> {
        self.files.keys().next().copied()
    }

    pub fn tail_key(&self) -> Option<i64> {
        self.files.keys().next_back().copied()
    }

    /// The file new writes go to: always the greatest key.
    pub fn current_writable(&self) -> Option<&BackingFile> {
        self.files.values().next_back()
    }

    pub fn current_writable_mut(&mut self) -> Option<&mut BackingFile> {
        self.files.values_mut().next_back()
    }

    pub fn get(&self, key: i64) -> Option<&BackingFile> {
        self.files.get(&key)
    }

    pub fn get_mut(&mut self, key: i64) -> Option<&mut BackingFile> {
        self.files.get_mut(&key)
    }

    /// Key of the file that could contain `t`: the greatest key `<= t`.
    pub fn file_for(&self, t: i64) -> Option<i64> {
        self.files.range(..=t).next_back().map(|(key, _)| *key)
    }

    /// Keys of files that may hold data at or after `start`, oldest first.
    ///
    /// Begins at [`file_for`](Self::file_for)`(start)`, or at the oldest file when
    /// `start` precedes every key, and runs to the tail.
    pub fn candidate_keys(&self, start: i64) -> Vec<i64> {
        let Some(first) = self.file_for(start).or_else(|| self.oldest_key()) else {
            return Vec::new();
        };
        self.files.range(first..).map(|(key, _)| *key).collect()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.files
            .values()
            .map(|f| f.size_bytes().unwrap_or(0))
            .sum()
    }

    pub fn files(&self) -> Vec<FileInfo> {
        self.files
            .values()
            .map(|f| FileInfo {
                key: f.key(),
                path: f.path().to_path_buf(),
                size_bytes: f.size_bytes().unwrap_or(0),
                is_open: f.is_open(),
            })
            .collect()
    }

    /// Rotate when the tail is too large, then apply retention. Never fails; problems
    /// are recorded in the returned stats and retried on the next check.
    pub fn check_rotation_and_retention(&mut self, now_ms: i64, limits: SizeLimits) -> MaintenanceStats {
        let mut stats = MaintenanceStats::new();

        if let Some(limit) = limits.file_size_limit {
            match self.rotate_if_full(now_ms, limit) {
                Ok(rotated) => stats.rotated_to = rotated,
                Err(err) => stats.record_error(format!("rotation failed: {err}")),
            }
        }

        if let Some(limit) = limits.total_size_limit {
            self.apply_retention(now_ms, limit, limits.protect_window_ms, &mut stats);
        }

        stats
    }

    fn rotate_if_full(&mut self, now_ms: i64, limit: u64) -> Result<Option<i64>> {
        let Some(tail) = self.current_writable() else {
            return Err(Error::Consistency("catalog has no writable file".into()));
        };
        if tail.in_transaction() {
            return Ok(None);
        }
        let size = tail.size_bytes()?;
        if size < limit {
            return Ok(None);
        }
        let previous = tail.key();
        let key = self.create_file(now_ms)?;
        log::info!("rotated history file {previous} ({size} bytes) -> {key}");
        Ok(Some(key))
    }

    fn apply_retention(
        &mut self,
        now_ms: i64,
        limit: u64,
        protect_window_ms: Option<i64>,
        stats: &mut MaintenanceStats,
    ) {
        let mut candidates = Vec::with_capacity(self.files.len());
        for file in self.files.values() {
            match file.size_bytes() {
                Ok(size_bytes) => candidates.push(RetentionCandidate {
                    key: file.key(),
                    size_bytes,
                    last_read: file.last_read(),
                }),
                Err(err) => {
                    stats.record_error(format!("retention skipped: {err}"));
                    return;
                }
            }
        }

        let plan = plan_retention(&candidates, limit, now_ms, protect_window_ms);
        for key in plan.deferred {
            stats.record_warning(format!(
                "retention deferred for history file {key}: read within the idle window"
            ));
            stats.deferred.push(key);
        }
        for key in plan.delete {
            let Some(file) = self.files.remove(&key) else {
                continue;
            };
            let size = candidates
                .iter()
                .find(|c| c.key == key)
                .map_or(0, |c| c.size_bytes);
            let path = file.path().to_path_buf();
            match file.delete() {
                Ok(()) => {
                    log::info!("retention deleted {} ({size} bytes)", path.display());
                    stats.record_deletion(key, size);
                }
                Err(err) => {
                    // Keep the entry so the next check retries it.
                    self.files.insert(key, BackingFile::new(key, path));
                    stats.record_error(format!("retention failed: {err}"));
                    break;
                }
            }
        }
    }

    /// Close non-writable files that have not been touched for `idle_timeout_ms`.
    pub fn close_idle_files(&mut self, now_ms: i64, idle_timeout_ms: Option<i64>) -> MaintenanceStats {
        let mut stats = MaintenanceStats::new();
        let Some(timeout) = idle_timeout_ms else {
            return stats;
        };
        let tail = self.tail_key();
        for file in self.files.values_mut() {
            if Some(file.key()) == tail || !file.is_open() || file.in_transaction() {
                continue;
            }
            if now_ms.saturating_sub(file.last_access()) <= timeout {
                continue;
            }
            match file.close() {
                Ok(()) => stats.closed_idle.push(file.key()),
                Err(err) => stats.record_error(format!("idle close failed: {err}")),
            }
        }
        stats
    }

    /// Add files that appeared in the directory and drop entries whose file vanished.
    pub fn reconcile(&mut self, now_ms: i64, warn_on_conflict: bool) -> MaintenanceStats {
        let mut stats = MaintenanceStats::new();
        let discovery = match discover_files(&self.dir, &self.base_name, &self.suffix) {
            Ok(discovery) => discovery,
            Err(err) => {
                stats.record_error(format!("reconcile failed: {err}"));
                return stats;
            }
        };
        for path in discovery.malformed {
            stats.skipped.push(path);
        }

        let previous_tail = self.tail_key();
        let present: Vec<i64> = discovery.files.iter().map(|(key, _)| *key).collect();

        let vanished: Vec<i64> = self
            .files
            .keys()
            .copied()
            .filter(|key| present.binary_search(key).is_err())
            .collect();
        for key in vanished {
            if let Some(mut file) = self.files.remove(&key) {
                if file.in_transaction() {
                    stats.record_warning(format!(
                        "history file {} vanished with an open transaction",
                        file.path().display()
                    ));
                }
                if let Err(err) = file.close() {
                    stats.record_warning(format!("closing vanished file: {err}"));
                }
                log::info!("history file {} removed externally", file.path().display());
                stats.removed.push(key);
            }
        }

        for (key, path) in discovery.files {
            if self.files.contains_key(&key) {
                continue;
            }
            if warn_on_conflict && previous_tail.is_some_and(|tail| key > tail) {
                stats.record_warning(format!(
                    "external file {} supersedes the writable file",
                    path.display()
                ));
            }
            log::info!("history file {} added externally", path.display());
            self.files.insert(key, BackingFile::new(key, path));
            stats.added.push(key);
        }

        if self.files.is_empty() {
            match self.create_file(now_ms) {
                Ok(key) => stats.created = Some(key),
                Err(err) => stats.record_error(format!("cannot recreate writable file: {err}")),
            }
        }
        stats
    }

    /// Close every open connection, leaving the catalog entries in place.
    pub fn close_all(&mut self) -> MaintenanceStats {
        let mut stats = MaintenanceStats::new();
        for file in self.files.values_mut() {
            if let Err(err) = file.close() {
                stats.record_error(format!("close failed: {err}"));
            }
        }
        stats
    }
}
