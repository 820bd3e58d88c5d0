//! Statistics for catalog maintenance passes.

use std::path::PathBuf;

/// Outcome of one catalog maintenance pass (init, rotation/retention, idle close or
/// reconcile). Failures are recorded here instead of aborting the pass.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceStats {
    /// Files loaded from the directory on initialization.
    pub loaded_count: usize,

    /// Key of a file created because the catalog was empty.
    pub created: Option<i64>,

    /// Key of the file created by rotation.
    pub rotated_to: Option<i64>,

    /// Keys of files deleted by retention, oldest first.
    pub deleted: Vec<i64>,

    /// Keys spared by retention because they were read recently.
    pub deferred: Vec<i64>,

    /// Bytes released by retention.
    pub bytes_freed: u64,

    /// Keys whose connection was closed for being idle.
    pub closed_idle: Vec<i64>,

    /// Keys discovered by reconcile.
    pub added: Vec<i64>,

    /// Keys dropped by reconcile because their file vanished.
    pub removed: Vec<i64>,

    /// Files with a matching prefix/suffix but an unparseable key.
    pub skipped: Vec<PathBuf>,

    pub warnings: Vec<String>,

    pub errors: Vec<String>,
}

impl MaintenanceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn record_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn record_deletion(&mut self, key: i64, size_bytes: u64) {
        self.deleted.push(key);
        self.bytes_freed += size_bytes;
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// True when the catalog changed shape (files added, created or removed).
    pub fn changed_files(&self) -> bool {
        self.created.is_some()
            || self.rotated_to.is_some()
            || !self.deleted.is_empty()
            || !self.added.is_empty()
            || !self.removed.is_empty()
    }

    pub fn merge(&mut self, other: MaintenanceStats) {
        self.loaded_count += other.loaded_count;
        self.created = self.created.or(other.created);
        self.rotated_to = self.rotated_to.or(other.rotated_to);
        self.deleted.extend(other.deleted);
        self.deferred.extend(other.deferred);
        self.bytes_freed += other.bytes_freed;
        self.closed_idle.extend(other.closed_idle);
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.skipped.extend(other.skipped);
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }

    pub fn summary(&self) -> String {
        format!(
            "Rotated: {}, Deleted: {}, Deferred: {}, Freed: {} bytes, Closed: {}, Added: {}, Removed: {}, Errors: {}",
            self.rotated_to.map_or(0, |_| 1),
            self.deleted.len(),
            self.deferred.len(),
            self.bytes_freed,
            self.closed_idle.len(),
            self.added.len(),
            self.removed.len(),
            self.errors.len()
        )
    }
}
