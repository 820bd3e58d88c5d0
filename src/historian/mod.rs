//! The historian: data point and event history over a rotating file catalog.
//!
//! # Execution model
//!
//! A `Historian` is driven from a single thread. Nothing blocks in the background:
//! the batching-transaction timer, the coarse rotation timer, the idle-close timer
//! and directory notifications are all serviced at the start of every public call
//! and by [`Historian::tick`], which a host should call periodically. Failures from
//! that servicing land in a bounded deferred queue and are handed to the caller's
//! [`LogSink`] with the next call.
//!
//! # Example
//!
//! ```no_run
//! use historian::{DataPoint, Historian, HistorianConfig, LogSink, Value};
//!
//! let mut historian = Historian::new(HistorianConfig::with_directory("./history"));
//! let mut log = LogSink::new();
//!
//! historian.write("Boiler.Temperature", &DataPoint::new(1_700_000_000_000, Value::Float(71.5), 0), &mut log);
//! historian.flush(&mut log);
//! let count = historian.count_in_range("Boiler.Temperature", 1_700_000_000_000, None, &mut log);
//! for entry in log.drain() {
//!     eprintln!("{:?} {}", entry.severity, entry.message);
//! }
//! ```

mod data;
mod event;
mod find_cache;

use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::{FileCatalog, FileInfo, MaintenanceStats, SizeLimits};
use crate::clock::{Clock, SystemClock};
use crate::config::HistorianConfig;
use crate::error::{Error, Result};
use crate::log_sink::{Category, DeferredLog, LogEntry, LogSink, LogTarget, Severity};
use crate::store::naming::is_series_table;
use crate::store::{Database, StatementCache};
#[cfg(feature = "watch")]
use crate::watcher::DirectoryWatcher;

use find_cache::FindCache;

/// Which neighbour a search looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchDirection {
    /// Closest timestamp strictly greater than the probe.
    Above,
    /// Closest timestamp strictly less than the probe.
    Below,
}

#[derive(Debug, Clone, Copy)]
struct OpenTransaction {
    file_key: i64,
    deadline: i64,
}

pub struct Historian {
    config: HistorianConfig,
    clock: Arc<dyn Clock>,
    catalog: FileCatalog,
    deferred: DeferredLog,
    open_txn: Option<OpenTransaction>,
    next_rotation_check: i64,
    next_idle_check: i64,
    find_cache: FindCache,
    #[cfg(feature = "watch")]
    watcher: Option<DirectoryWatcher>,
}

impl Historian {
    /// Create a historian on the system clock. No file is touched until the first call.
    pub fn new(config: HistorianConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    pub fn with_clock(config: HistorianConfig, clock: impl Clock) -> Self {
        let catalog = catalog_for(&config);
        Self {
            deferred: DeferredLog::new(config.log_queue_capacity),
            config,
            clock: Arc::new(clock),
            catalog,
            open_txn: None,
            next_rotation_check: i64::MIN,
            next_idle_check: i64::MIN,
            find_cache: FindCache::default(),
            #[cfg(feature = "watch")]
            watcher: None,
        }
    }

    pub fn config(&self) -> &HistorianConfig {
        &self.config
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Load or create the catalog. Every other call does this on demand.
    pub fn open(&mut self, sink: &mut LogSink) -> bool {
        self.begin_call(sink).is_some()
    }

    /// Service timers and directory notifications. Problems are deferred to the next call.
    pub fn tick(&mut self) {
        let now = self.now_ms();
        self.service_timers(now);
    }

    /// Commit any open batching transaction now and run the rotation/retention check.
    pub fn flush(&mut self, sink: &mut LogSink) -> bool {
        let Some(now) = self.begin_call(sink) else {
            return false;
        };
        let mut ok = true;
        if self.open_txn.is_some() {
            if let Err(err) = self.commit_open_transaction() {
                report(sink, now, &err, "commit failed");
                ok = false;
            }
        }
        let stats = self.run_rotation_check(now);
        ok &= !stats.has_errors();
        report_stats(sink, now, &stats);
        ok
    }

    /// Flush and close every file. The historian reopens lazily if used again.
    pub fn shutdown(&mut self, sink: &mut LogSink) -> bool {
        let now = self.now_ms();
        self.deferred.drain_into(sink, now);
        let mut ok = true;
        if self.open_txn.is_some() {
            if let Err(err) = self.commit_open_transaction() {
                report(sink, now, &err, "commit failed");
                ok = false;
            }
        }
        let stats = self.catalog.close_all();
        ok &= !stats.has_errors();
        report_stats(sink, now, &stats);
        #[cfg(feature = "watch")]
        {
            self.watcher = None;
        }
        ok
    }

    /// Snapshot of the catalog, oldest file first.
    pub fn files(&self) -> Vec<FileInfo> {
        self.catalog.files()
    }

    /// Names of every series stored in any file.
    pub fn series_names(&mut self, sink: &mut LogSink) -> Option<Vec<String>> {
        let now = self.begin_call(sink)?;
        let capacity = self.catalog.statement_capacity();
        let mut names = std::collections::BTreeSet::new();
        for key in self.catalog.keys() {
            let Some(file) = self.catalog.get_mut(key) else {
                continue;
            };
            let listed = file.open(now, capacity).and_then(Database::table_names);
            match listed {
                Ok(tables) => names.extend(tables.into_iter().filter(|t| is_series_table(t))),
                Err(err) => {
                    report(sink, now, &err, "listing series failed");
                    return None;
                }
            }
        }
        Some(names.into_iter().collect())
    }

    /// Re-scan the directory and reconcile the catalog with it.
    pub fn reconcile(&mut self, warn_on_conflict: bool, sink: &mut LogSink) -> bool {
        let Some(now) = self.begin_call(sink) else {
            return false;
        };
        let stats = self.reconcile_now(now, warn_on_conflict);
        report_stats(sink, now, &stats);
        !stats.has_errors()
    }

    // ------------------------------------------------------------------
    // Runtime configuration
    // ------------------------------------------------------------------

    /// Move to a new database directory: commit, close everything, reload there.
    pub fn set_directory(&mut self, directory: impl Into<PathBuf>, sink: &mut LogSink) -> bool {
        let mut config = self.config.clone();
        config.directory = directory.into();
        self.set_config(config, sink)
    }

    pub fn set_file_size_limit_mb(&mut self, mb: i64) {
        self.config.file_size_limit_mb = mb;
    }

    pub fn set_total_size_limit_mb(&mut self, mb: i64) {
        self.config.total_size_limit_mb = mb;
    }

    /// Change the batching window. Disabling batching commits the open transaction
    /// on the next call.
    pub fn set_transaction_timeout_ms(&mut self, ms: i64) {
        self.config.transaction_timeout_ms = ms;
        if let Some(txn) = self.open_txn.as_mut() {
            txn.deadline = if ms > 0 {
                txn.deadline.min(self.clock.now_ms().saturating_add(ms))
            } else {
                i64::MIN
            };
        }
    }

    pub fn set_idle_timeout_ms(&mut self, ms: i64) {
        self.config.idle_timeout_ms = ms;
        self.next_idle_check = i64::MIN;
    }

    /// Replace the whole configuration. A changed directory or file naming reloads
    /// the catalog; failure leaves the historian on its previous configuration.
    pub fn set_config(&mut self, config: HistorianConfig, sink: &mut LogSink) -> bool {
        let now = self.now_ms();
        self.deferred.drain_into(sink, now);
        if let Err(err) = config.validate() {
            report(sink, now, &err, "configuration rejected");
            return false;
        }

        let relocate = config.directory != self.config.directory
            || config.base_name != self.config.base_name
            || config.suffix != self.config.suffix;
        if !relocate {
            self.catalog
                .set_statement_capacity(config.prepared_statement_capacity);
            self.deferred.set_capacity(config.log_queue_capacity);
            self.config = config;
            return true;
        }

        let mut next = catalog_for(&config);
        match next.ensure_initialized(now) {
            Ok(stats) => report_stats(sink, now, &stats),
            Err(err) => {
                report(sink, now, &err, "cannot switch history directory");
                return false;
            }
        }

        if self.open_txn.is_some() {
            if let Err(err) = self.commit_open_transaction() {
                report(sink, now, &err, "commit before directory change failed");
            }
        }
        let stats = self.catalog.close_all();
        report_stats(sink, now, &stats);

        self.catalog = next;
        self.deferred.set_capacity(config.log_queue_capacity);
        self.config = config;
        self.find_cache.clear();
        self.next_rotation_check = i64::MIN;
        #[cfg(feature = "watch")]
        {
            self.watcher = None;
        }
        self.start_watcher(now, sink);
        true
    }

    // ------------------------------------------------------------------
    // Call plumbing
    // ------------------------------------------------------------------

    /// Start of every public call: service timers, flush deferred logs, make sure
    /// the catalog is initialized. Returns the call's timestamp.
    fn begin_call(&mut self, sink: &mut LogSink) -> Option<i64> {
        let now = self.now_ms();
        self.service_timers(now);
        self.deferred.drain_into(sink, now);

        if !self.catalog.is_initialized() {
            match self.catalog.ensure_initialized(now) {
                Ok(stats) => report_stats(sink, now, &stats),
                Err(err) => {
                    report(sink, now, &err, "cannot open history directory");
                    return None;
                }
            }
            self.start_watcher(now, sink);
        }
        Some(now)
    }

    #[cfg(feature = "watch")]
    fn start_watcher(&mut self, now: i64, sink: &mut LogSink) {
        if !self.config.watch_directory || self.watcher.is_some() {
            return;
        }
        match DirectoryWatcher::new(self.catalog.dir(), self.config.watch_debounce_ms) {
            Ok(watcher) => self.watcher = Some(watcher),
            Err(err) => sink.push(LogEntry::new(
                Severity::Warning,
                Category::Configuration,
                now,
                format!("directory watching disabled: {err}"),
            )),
        }
    }

    #[cfg(not(feature = "watch"))]
    fn start_watcher(&mut self, _now: i64, _sink: &mut LogSink) {}

    fn service_timers(&mut self, now: i64) {
        if !self.catalog.is_initialized() {
            return;
        }

        if let Some(txn) = self.open_txn {
            if now >= txn.deadline {
                if let Err(err) = self.commit_open_transaction() {
                    report(&mut self.deferred, now, &err, "batched commit failed");
                }
                let stats = self.run_rotation_check(now);
                report_stats(&mut self.deferred, now, &stats);
            }
        } else if self.config.transaction_timeout().is_none() && now >= self.next_rotation_check {
            let stats = self.run_rotation_check(now);
            report_stats(&mut self.deferred, now, &stats);
        }

        if let Some(timeout) = self.config.idle_timeout() {
            if now >= self.next_idle_check {
                let stats = self.catalog.close_idle_files(now, Some(timeout));
                report_stats(&mut self.deferred, now, &stats);
                self.next_idle_check = now.saturating_add((timeout / 2).max(1));
            }
        }

        self.poll_watcher(now);
    }

    #[cfg(feature = "watch")]
    fn poll_watcher(&mut self, now: i64) {
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        let catalog = &self.catalog;
        let poll = watcher.poll(now, |name| catalog.matches_file_name(name));
        for error in poll.errors {
            self.deferred
                .push(LogEntry::new(Severity::Warning, Category::Lifecycle, now, error));
        }
        if poll.reconcile_due {
            let stats = self.reconcile_now(now, true);
            report_stats(&mut self.deferred, now, &stats);
        }
    }

    #[cfg(not(feature = "watch"))]
    fn poll_watcher(&mut self, _now: i64) {}

    fn size_limits(&self) -> SizeLimits {
        SizeLimits {
            file_size_limit: self.config.file_size_limit_bytes(),
            total_size_limit: self.config.total_size_limit_bytes(),
            protect_window_ms: self.config.idle_timeout(),
        }
    }

    fn run_rotation_check(&mut self, now: i64) -> MaintenanceStats {
        let stats = self.catalog.check_rotation_and_retention(now, self.size_limits());
        if stats.changed_files() {
            log::debug!("maintenance: {}", stats.summary());
        }
        self.find_cache.clear();
        let interval = i64::try_from(self.config.rotation_check_interval_ms).unwrap_or(i64::MAX);
        self.next_rotation_check = now.saturating_add(interval);
        stats
    }

    fn reconcile_now(&mut self, now: i64, warn_on_conflict: bool) -> MaintenanceStats {
        let stats = self.catalog.reconcile(now, warn_on_conflict);
        if let Some(txn) = self.open_txn {
            if self.catalog.get(txn.file_key).is_none() {
                self.open_txn = None;
            }
        }
        if stats.changed_files() {
            self.find_cache.clear();
        }
        stats
    }

    /// Key of the writable file, with a batching transaction opened on it if enabled.
    fn begin_write(&mut self, now: i64) -> Result<i64> {
        let tail = self
            .catalog
            .tail_key()
            .ok_or_else(|| Error::Consistency("catalog has no writable file".into()))?;

        let Some(timeout) = self.config.transaction_timeout() else {
            if self.open_txn.is_some() {
                self.commit_open_transaction()?;
            }
            return Ok(tail);
        };

        if self.open_txn.is_some_and(|txn| txn.file_key != tail) {
            self.commit_open_transaction()?;
        }
        if self.open_txn.is_none() {
            let capacity = self.catalog.statement_capacity();
            let file = self
                .catalog
                .get_mut(tail)
                .ok_or_else(|| Error::Consistency(format!("writable file {tail} missing")))?;
            let (db, _) = file.for_write(now, capacity)?;
            if !db.in_transaction() {
                db.begin()?;
            }
            self.open_txn = Some(OpenTransaction {
                file_key: tail,
                deadline: now.saturating_add(timeout),
            });
        }
        Ok(tail)
    }

    /// Commit the batching transaction on the file it was opened against.
    fn commit_open_transaction(&mut self) -> Result<()> {
        let Some(txn) = self.open_txn.take() else {
            return Ok(());
        };
        let Some(file) = self.catalog.get_mut(txn.file_key) else {
            return Err(Error::Consistency(format!(
                "history file {} left the catalog with an open transaction",
                txn.file_key
            )));
        };
        let Some(db) = file.database() else {
            return Ok(());
        };
        if !db.in_transaction() {
            return Ok(());
        }
        if let Err(err) = db.commit() {
            if let Err(rollback) = file.abandon_transaction() {
                log::warn!("rollback after failed commit on {} failed: {rollback}", file.path().display());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Post-write hook when batching is disabled: coarse rotation check.
    fn after_write(&mut self, now: i64, sink: &mut LogSink) {
        if self.config.transaction_timeout().is_some() {
            return;
        }
        if now >= self.next_rotation_check || self.config.rotation_check_interval_ms == 0 {
            let stats = self.run_rotation_check(now);
            report_stats(sink, now, &stats);
        }
    }

    /// Run `f` against an already-cataloged file opened for reading.
    fn with_read<T>(
        &mut self,
        key: i64,
        now: i64,
        f: impl FnOnce(&Database, &mut StatementCache) -> Result<T>,
    ) -> Result<T> {
        let capacity = self.catalog.statement_capacity();
        let file = self
            .catalog
            .get_mut(key)
            .ok_or_else(|| Error::Consistency(format!("history file {key} left the catalog")))?;
        let (db, cache) = file.for_read(now, capacity)?;
        f(db, cache)
    }

    /// Like `with_read`, but the file is not marked as read, so retention is unaffected.
    fn with_file<T>(
        &mut self,
        key: i64,
        now: i64,
        f: impl FnOnce(&Database, &mut StatementCache) -> Result<T>,
    ) -> Result<T> {
        let capacity = self.catalog.statement_capacity();
        let file = self
            .catalog
            .get_mut(key)
            .ok_or_else(|| Error::Consistency(format!("history file {key} left the catalog")))?;
        let (db, cache) = file.for_write(now, capacity)?;
        f(db, cache)
    }

    /// Run `f` against the writable file inside the current write transaction.
    fn with_write<T>(
        &mut self,
        now: i64,
        f: impl FnOnce(&Database, &mut StatementCache) -> Result<T>,
    ) -> Result<T> {
        let key = self.begin_write(now)?;
        let capacity = self.catalog.statement_capacity();
        let file = self
            .catalog
            .get_mut(key)
            .ok_or_else(|| Error::Consistency(format!("writable file {key} missing")))?;
        let (db, cache) = file.for_write(now, capacity)?;
        f(db, cache)
    }

    /// Log a failed read and collapse it to `None`.
    fn finish<T>(&self, result: Result<T>, sink: &mut LogSink, now: i64, id: &str, what: &str) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                report(sink, now, &err, &format!("{what} of {id:?} failed"));
                None
            }
        }
    }

    /// Test hook: is a batching transaction open?
    pub fn has_open_transaction(&self) -> bool {
        self.open_txn.is_some()
    }
}

impl Drop for Historian {
    fn drop(&mut self) {
        if let Err(err) = self.commit_open_transaction() {
            log::warn!("commit on drop failed: {err}");
        }
        for error in self.catalog.close_all().errors {
            log::warn!("{error}");
        }
    }
}

fn catalog_for(config: &HistorianConfig) -> FileCatalog {
    FileCatalog::new(
        &config.directory,
        &config.base_name,
        &config.suffix,
        config.prepared_statement_capacity,
    )
}

/// Append `err` with some context to `target`.
fn report(target: &mut impl LogTarget, now: i64, err: &Error, context: &str) {
    target.log(LogEntry::new(
        Severity::Error,
        err.category(),
        now,
        format!("{context}: {err}"),
    ));
}

fn report_stats(target: &mut impl LogTarget, now: i64, stats: &MaintenanceStats) {
    let mut info = |message: String| {
        target.log(LogEntry::new(Severity::Info, Category::Lifecycle, now, message));
    };
    if let Some(key) = stats.created {
        info(format!("created history file {key}"));
    }
    if let Some(key) = stats.rotated_to {
        info(format!("rotated to history file {key}"));
    }
    for key in &stats.deleted {
        info(format!("retention deleted history file {key}"));
    }
    for key in &stats.added {
        info(format!("history file {key} appeared in the directory"));
    }
    for key in &stats.removed {
        info(format!("history file {key} disappeared from the directory"));
    }
    for key in &stats.closed_idle {
        target.log(LogEntry::new(
            Severity::Debug,
            Category::Lifecycle,
            now,
            format!("closed idle history file {key}"),
        ));
    }
    for warning in &stats.warnings {
        target.log(LogEntry::new(Severity::Warning, Category::Lifecycle, now, warning.clone()));
    }
    for error in &stats.errors {
        target.log(LogEntry::new(Severity::Error, Category::Driver, now, error.clone()));
    }
}
