//! Directory watcher.
//!
//! Filesystem notifications arrive on `notify`'s own thread and are queued on a
//! channel; the historian drains the channel from its regular calls, so the
//! reconcile itself runs on the caller's thread. Writes to a database touch its
//! journal many times, so only create/remove/rename events on catalog file names
//! count, and a reconcile fires once the directory has been quiet for the debounce
//! period.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, TryRecvError};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{Error, Result};

/// Trailing-edge debounce over millisecond timestamps.
#[derive(Debug, Clone)]
pub struct Debouncer {
    quiet_ms: i64,
    last_event: Option<i64>,
}

impl Debouncer {
    pub fn new(quiet_ms: u64) -> Self {
        Self {
            quiet_ms: i64::try_from(quiet_ms).unwrap_or(i64::MAX),
            last_event: None,
        }
    }

    pub fn record(&mut self, now_ms: i64) {
        self.last_event = Some(now_ms);
    }

    pub fn is_pending(&self) -> bool {
        self.last_event.is_some()
    }

    /// True once, when the quiet period after the latest event has elapsed.
    pub fn fire(&mut self, now_ms: i64) -> bool {
        match self.last_event {
            Some(at) if now_ms.saturating_sub(at) >= self.quiet_ms => {
                self.last_event = None;
                true
            }
            _ => false,
        }
    }
}

/// Result of draining pending notifications.
#[derive(Debug, Default)]
pub struct WatchPoll {
    /// The catalog should be reconciled now.
    pub reconcile_due: bool,
    pub errors: Vec<String>,
}

pub struct DirectoryWatcher {
    dir: PathBuf,
    // Dropping the watcher stops notifications.
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
    debouncer: Debouncer,
}

impl DirectoryWatcher {
    pub fn new(dir: &Path, debounce_ms: u64) -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            // The receiver is gone only when the historian itself was dropped.
            let _ = tx.send(res);
        })
        .map_err(|err| Error::Config(format!("cannot watch {}: {err}", dir.display())))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|err| Error::Config(format!("cannot watch {}: {err}", dir.display())))?;
        log::debug!("watching {}", dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            _watcher: watcher,
            events: rx,
            debouncer: Debouncer::new(debounce_ms),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drain queued notifications. `is_catalog_file` filters bare file names.
    pub fn poll(&mut self, now_ms: i64, is_catalog_file: impl Fn(&str) -> bool) -> WatchPoll {
        let mut poll = WatchPoll::default();
        loop {
            match self.events.try_recv() {
                Ok(Ok(event)) => {
                    if is_relevant(&event, &is_catalog_file) {
                        self.debouncer.record(now_ms);
                    }
                }
                Ok(Err(err)) => poll.errors.push(format!("watch error on {}: {err}", self.dir.display())),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    poll.errors.push(format!("watcher for {} disconnected", self.dir.display()));
                    break;
                }
            }
        }
        poll.reconcile_due = self.debouncer.fire(now_ms);
        poll
    }
}

fn is_relevant(event: &Event, is_catalog_file: &impl Fn(&str) -> bool) -> bool {
    let kind_matters = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    );
    kind_matters
        && event.paths.iter().any(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(is_catalog_file)
        })
}
