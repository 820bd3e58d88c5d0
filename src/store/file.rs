//! Backing file descriptor.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::store::driver::Database;
use crate::store::statements::StatementCache;

/// One physical database file in the catalog.
///
/// The connection is opened lazily on first access and owned exclusively by this
/// descriptor together with its statement cache; closing drops both.
#[derive(Debug)]
pub struct BackingFile {
    key: i64,
    path: PathBuf,
    db: Option<Database>,
    statements: StatementCache,
    /// Last open/read/write access (ms), drives idle close.
    last_access: i64,
    /// Last read access (ms), protects the file from retention.
    last_read: Option<i64>,
}

impl BackingFile {
    pub fn new(key: i64, path: PathBuf) -> Self {
        Self {
            key,
            path,
            db: None,
            statements: StatementCache::new(),
            last_access: i64::MIN,
            last_read: None,
        }
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.db.is_some()
    }

    pub fn in_transaction(&self) -> bool {
        self.db.as_ref().is_some_and(Database::in_transaction)
    }

    pub fn last_access(&self) -> i64 {
        self.last_access
    }

    pub fn last_read(&self) -> Option<i64> {
        self.last_read
    }

    /// On-disk size, including a rollback journal if one is present.
    pub fn size_bytes(&self) -> Result<u64> {
        let main = std::fs::metadata(&self.path)
            .map_err(|err| Error::io(&self.path, err))?
            .len();
        let journal = std::fs::metadata(journal_path(&self.path))
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(main + journal)
    }

    pub fn exists_on_disk(&self) -> bool {
        self.path.is_file()
    }

    /// Open the connection if needed, stamping the access time.
    pub fn open(&mut self, now_ms: i64, statement_capacity: usize) -> Result<&Database> {
        self.last_access = now_ms;
        if self.db.is_none() {
            self.db = Some(Database::open(&self.path, statement_capacity)?);
        }
        self.db
            .as_ref()
            .ok_or_else(|| Error::Consistency(format!("{} failed to stay open", self.path.display())))
    }

    /// Connection and statement cache, opened for a read (stamps both timers).
    pub fn for_read(
        &mut self,
        now_ms: i64,
        statement_capacity: usize,
    ) -> Result<(&Database, &mut StatementCache)> {
        self.last_read = Some(now_ms);
        self.for_write(now_ms, statement_capacity)
    }

    /// Connection and statement cache, opened for a write.
    pub fn for_write(
        &mut self,
        now_ms: i64,
        statement_capacity: usize,
    ) -> Result<(&Database, &mut StatementCache)> {
        self.open(now_ms, statement_capacity)?;
        match self.db.as_ref() {
            Some(db) => Ok((db, &mut self.statements)),
            None => Err(Error::Consistency(format!(
                "{} failed to stay open",
                self.path.display()
            ))),
        }
    }

    /// Connection if already open; never opens.
    pub fn database(&self) -> Option<&Database> {
        self.db.as_ref()
    }

    /// Invalidate cached statements, then close the connection.
    pub fn close(&mut self) -> Result<()> {
        self.statements.invalidate();
        match self.db.take() {
            Some(db) => db.close(),
            None => Ok(()),
        }
    }

    /// Roll back an open transaction and forget cached schema state, which may
    /// still list tables the rollback removed.
    pub fn abandon_transaction(&mut self) -> Result<()> {
        self.statements.invalidate();
        match self.db.as_ref() {
            Some(db) if db.in_transaction() => db.rollback(),
            _ => Ok(()),
        }
    }

    pub fn statements_cached(&self) -> bool {
        !self.statements.is_empty()
    }

    /// Close and remove the file and its journal from disk.
    pub fn delete(mut self) -> Result<()> {
        self.close()?;
        std::fs::remove_file(&self.path).map_err(|err| Error::io(&self.path, err))?;
        let journal = journal_path(&self.path);
        if journal.exists() {
            std::fs::remove_file(&journal).map_err(|err| Error::io(&journal, err))?;
        }
        Ok(())
    }
}

fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("-journal");
    PathBuf::from(name)
}
