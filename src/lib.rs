//! Time-series and event historian over a directory of rotating SQLite files.
//!
//! Writes go to the newest file; once it grows past a size limit a new one is
//! started, and the oldest files are deleted when the directory exceeds its total
//! budget. Reads stitch results across files in time order.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod historian;
pub mod interface;
pub mod log_sink;
pub mod store;
pub mod value;
#[cfg(feature = "watch")]
pub mod watcher;

pub use catalog::{FileCatalog, FileInfo, MaintenanceStats, SizeLimits};
pub use clock::{Clock, ManualClock, QuantaClock, SystemClock};
pub use config::HistorianConfig;
pub use error::{Error, Result};
pub use historian::{Historian, SearchDirection};
pub use interface::HistoryBackend;
pub use log_sink::{Category, DeferredLog, LogEntry, LogSink, Severity};
pub use value::{DataPoint, EventPoint, FieldSpec, FieldType, StorageType, Value, QUALITY_NO_DATA};
