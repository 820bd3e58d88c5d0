//! Backing store: SQLite files, their naming, schema and statement caches.

pub mod driver;
mod file;
pub mod naming;
pub mod schema;
pub mod statements;

pub use driver::Database;
pub use file::BackingFile;
pub use statements::{StatementCache, StatementKind};
