//! Backing store driver: one SQLite connection per physical file.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::error::{Error, Result};
use crate::store::naming::quote_ident;

/// Open connection to one backing file.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path, statement_capacity: usize) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn =
            Connection::open_with_flags(path, flags).map_err(|err| Error::sqlite(path, err))?;
        conn.set_prepared_statement_cache_capacity(statement_capacity);
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| Error::sqlite(path, err))?;
        log::debug!("opened {}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Wrap a driver error with this file's path.
    pub fn err(&self, source: rusqlite::Error) -> Error {
        Error::sqlite(&self.path, source)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(|err| self.err(err))
    }

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    pub fn begin(&self) -> Result<()> {
        self.execute_batch("BEGIN")
    }

    pub fn commit(&self) -> Result<()> {
        self.execute_batch("COMMIT")
    }

    pub fn rollback(&self) -> Result<()> {
        self.execute_batch("ROLLBACK")
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        self.conn
            .prepare_cached("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .and_then(|mut stmt| stmt.query_row([table], |_| Ok(())).optional())
            .map(|found| found.is_some())
            .map_err(|err| self.err(err))
    }

    /// Every table name in the metadata catalog, sorted.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .map_err(|err| self.err(err))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|err| self.err(err))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|err| self.err(err))
    }

    /// Column names of `table` in declaration order.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        let mut stmt = self.conn.prepare(&sql).map_err(|err| self.err(err))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|err| self.err(err))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|err| self.err(err))
    }

    /// Close the connection, rolling back any open transaction.
    pub fn close(self) -> Result<()> {
        let path = self.path;
        self.conn.flush_prepared_statement_cache();
        match self.conn.close() {
            Ok(()) => {
                log::debug!("closed {}", path.display());
                Ok(())
            }
            Err((_conn, err)) => Err(Error::sqlite(path, err)),
        }
    }
}
