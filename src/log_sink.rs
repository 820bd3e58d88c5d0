//! Caller-owned log queues.
//!
//! Every public historian call takes a `&mut LogSink` and appends what went wrong
//! (or anything worth surfacing) instead of returning an error. Failures raised by
//! timers or the directory watcher have no caller at hand, so they are parked in a
//! bounded [`DeferredLog`] and moved into the sink of the next public call.

use std::collections::VecDeque;
use std::fmt;

/// Default capacity of the deferred log queue.
pub const DEFAULT_DEFERRED_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    fn level(self) -> log::Level {
        match self {
            Severity::Debug => log::Level::Debug,
            Severity::Info => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error => log::Level::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Configuration,
    Schema,
    Driver,
    Consistency,
    Lifecycle,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Configuration => "configuration",
            Category::Schema => "schema",
            Category::Driver => "driver",
            Category::Consistency => "consistency",
            Category::Lifecycle => "lifecycle",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub message: String,
    pub severity: Severity,
    pub category: Category,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: i64,
}

impl LogEntry {
    pub fn new(
        severity: Severity,
        category: Category,
        timestamp: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            severity,
            category,
            timestamp,
        }
    }

    fn emit(&self) {
        log::log!(
            target: "historian",
            self.severity.level(),
            "[{}] {}",
            self.category,
            self.message
        );
    }
}

/// Anything log entries can be appended to.
pub trait LogTarget {
    fn log(&mut self, entry: LogEntry);
}

/// Append-only queue handed to every public call. The caller drains it.
#[derive(Debug, Default)]
pub struct LogSink {
    entries: Vec<LogEntry>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and mirror it to the `log` facade.
    pub fn push(&mut self, entry: LogEntry) {
        entry.emit();
        self.entries.push(entry);
    }

    /// Append without mirroring; used when moving entries that were already emitted.
    fn push_quiet(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, LogEntry> {
        self.entries.drain(..)
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|e| e.severity == severity).count()
    }
}

/// Bounded queue for entries produced outside of a public call.
///
/// When full, the oldest entry is discarded and counted. The count is reported as a
/// single warning ahead of the surviving entries on the next drain.
#[derive(Debug)]
pub struct DeferredLog {
    queue: VecDeque<LogEntry>,
    capacity: usize,
    dropped: u64,
}

impl DeferredLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity.min(DEFAULT_DEFERRED_CAPACITY)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        entry.emit();
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
        }
        self.queue.push_back(entry);
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.queue.len() > self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.dropped == 0
    }

    /// Move everything into `sink`, oldest first.
    pub fn drain_into(&mut self, sink: &mut LogSink, now_ms: i64) {
        if self.dropped > 0 {
            sink.push(LogEntry::new(
                Severity::Warning,
                Category::Lifecycle,
                now_ms,
                format!("{} deferred log entries dropped", self.dropped),
            ));
            self.dropped = 0;
        }
        for entry in self.queue.drain(..) {
            sink.push_quiet(entry);
        }
    }
}

impl LogTarget for LogSink {
    fn log(&mut self, entry: LogEntry) {
        self.push(entry);
    }
}

impl LogTarget for DeferredLog {
    fn log(&mut self, entry: LogEntry) {
        self.push(entry);
    }
}

impl Default for DeferredLog {
    fn default() -> Self {
        Self::new(DEFAULT_DEFERRED_CAPACITY)
    }
}
