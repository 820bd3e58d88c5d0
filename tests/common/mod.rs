#![allow(dead_code)]

use std::path::Path;

use historian::{DataPoint, FileCatalog, Historian, HistorianConfig, LogSink, ManualClock, Value};
use tempfile::{tempdir, TempDir};

pub const T0: i64 = 1_700_000_000_000;

/// A historian on a scratch directory and a manual clock.
///
/// Field order matters: the historian must close its files before the directory
/// is removed.
pub struct Harness {
    pub historian: Historian,
    pub log: LogSink,
    pub clock: ManualClock,
    pub dir: TempDir,
}

impl Harness {
    /// Auto-commit writes, no watcher.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut HistorianConfig)) -> Self {
        let dir = tempdir().expect("tempdir");
        let mut config = HistorianConfig::with_directory(dir.path());
        config.transaction_timeout_ms = 0;
        config.watch_directory = false;
        adjust(&mut config);
        let clock = ManualClock::new(T0);
        let historian = Historian::with_clock(config, clock.clone());
        Self {
            historian,
            log: LogSink::new(),
            clock,
            dir,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Move the clock to `t` and write one point stamped `t`.
    pub fn write_at(&mut self, series: &str, t: i64, value: Value) -> bool {
        self.clock.set(t);
        self.historian
            .write(series, &DataPoint::new(t, value, 0), &mut self.log)
    }

    /// Start a new writable file keyed `key`, the way another process would.
    pub fn start_file_at(&mut self, key: i64) {
        assert!(self.historian.flush(&mut self.log), "flush: {:?}", self.log.entries());
        self.clock.set(key);
        let mut outside = FileCatalog::new(self.path(), "history", "db", 8);
        outside.ensure_initialized(key).expect("load outside catalog");
        assert_eq!(outside.create_file(key).expect("create file"), key);
        outside.close_all();
        assert!(self.historian.reconcile(false, &mut self.log));
    }

    pub fn assert_clean(&self) {
        assert!(!self.log.has_errors(), "unexpected errors: {:?}", self.log.entries());
    }
}
