//! Per-file statement cache.
//!
//! Owned by a [`BackingFile`](crate::store::BackingFile) and cleared when its
//! connection closes. Compiled statements live in the connection's own
//! `prepare_cached` cache; this layer remembers which tables exist, the SQL text for
//! each (table, kind) pair, and event-schema lookups so hot paths skip the catalog
//! probe and the string building.

use std::collections::HashMap;

use rusqlite::{OptionalExtension, Params};

use crate::error::Result;
use crate::store::driver::Database;
use crate::store::naming::{quote_ident, EVENT_TYPE_NAMES_TABLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Insert,
    FirstTimestamp,
    LastTimestamp,
    Exists,
    FindAbove,
    FindBelow,
    CountFrom,
    CountRange,
    ReadPage,
    EmitterInsert,
    EmitterTypes,
    EmitterFirst,
    EmitterLast,
    EmitterFindAbove,
    EmitterFindBelow,
    EmitterCountFrom,
    EmitterCountRange,
}

impl StatementKind {
    fn sql(self, table: &str) -> String {
        let t = quote_ident(table);
        match self {
            StatementKind::Insert => {
                format!("INSERT INTO {t} (Time, Value, Status) VALUES (?1, ?2, ?3)")
            }
            StatementKind::FirstTimestamp => format!("SELECT MIN(Time) FROM {t}"),
            StatementKind::LastTimestamp => format!("SELECT MAX(Time) FROM {t}"),
            StatementKind::Exists => format!("SELECT 1 FROM {t} WHERE Time = ?1 LIMIT 1"),
            StatementKind::FindAbove => {
                format!("SELECT Time FROM {t} WHERE Time > ?1 ORDER BY Time ASC LIMIT 1")
            }
            StatementKind::FindBelow => {
                format!("SELECT Time FROM {t} WHERE Time < ?1 ORDER BY Time DESC LIMIT 1")
            }
            StatementKind::CountFrom => format!("SELECT COUNT(*) FROM {t} WHERE Time >= ?1"),
            StatementKind::CountRange => {
                format!("SELECT COUNT(*) FROM {t} WHERE Time >= ?1 AND Time <= ?2")
            }
            StatementKind::ReadPage => format!(
                "SELECT Time, Value, Status FROM {t} WHERE Time >= ?1 \
                 ORDER BY Time ASC LIMIT ?2 OFFSET ?3"
            ),
            StatementKind::EmitterInsert => format!(
                "INSERT INTO {t} (Time, EventTypeKey, EventRowKey) VALUES (?1, ?2, ?3)"
            ),
            StatementKind::EmitterTypes => format!(
                "SELECT n.Name FROM (SELECT DISTINCT EventTypeKey FROM {t}) k \
                 JOIN {names} n ON n.TypeKey = k.EventTypeKey ORDER BY n.Name",
                names = quote_ident(EVENT_TYPE_NAMES_TABLE)
            ),
            StatementKind::EmitterFirst => {
                format!("SELECT MIN(Time) FROM {t} WHERE EventTypeKey = ?1")
            }
            StatementKind::EmitterLast => {
                format!("SELECT MAX(Time) FROM {t} WHERE EventTypeKey = ?1")
            }
            StatementKind::EmitterFindAbove => format!(
                "SELECT Time FROM {t} WHERE EventTypeKey = ?1 AND Time > ?2 \
                 ORDER BY Time ASC LIMIT 1"
            ),
            StatementKind::EmitterFindBelow => format!(
                "SELECT Time FROM {t} WHERE EventTypeKey = ?1 AND Time < ?2 \
                 ORDER BY Time DESC LIMIT 1"
            ),
            StatementKind::EmitterCountFrom => {
                format!("SELECT COUNT(*) FROM {t} WHERE EventTypeKey = ?1 AND Time >= ?2")
            }
            StatementKind::EmitterCountRange => format!(
                "SELECT COUNT(*) FROM {t} WHERE EventTypeKey = ?1 AND Time >= ?2 AND Time <= ?3"
            ),
        }
    }
}

#[derive(Debug, Default)]
struct TableEntry {
    exists: bool,
    sql: HashMap<StatementKind, String>,
}

#[derive(Debug, Default)]
pub struct StatementCache {
    tables: HashMap<String, TableEntry>,
    columns: HashMap<String, Vec<String>>,
    type_keys: HashMap<String, i64>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// SQL for `kind` against `table`, compiled into the connection's cache.
    ///
    /// Returns `None` when the table does not exist in this file. The existence probe
    /// runs once per table; the answer is kept until [`invalidate`](Self::invalidate)
    /// or [`mark_created`](Self::mark_created).
    pub fn get(&mut self, db: &Database, table: &str, kind: StatementKind) -> Result<Option<&str>> {
        if !self.tables.contains_key(table) {
            let exists = db.table_exists(table)?;
            self.tables.insert(
                table.to_string(),
                TableEntry {
                    exists,
                    sql: HashMap::new(),
                },
            );
        }
        let Some(entry) = self.tables.get_mut(table) else {
            return Ok(None);
        };
        if !entry.exists {
            return Ok(None);
        }
        if !entry.sql.contains_key(&kind) {
            let sql = kind.sql(table);
            db.connection()
                .prepare_cached(&sql)
                .map_err(|err| db.err(err))?;
            entry.sql.insert(kind, sql);
        }
        Ok(entry.sql.get(&kind).map(String::as_str))
    }

    /// Run a single-integer query. The outer `None` means the table is absent; the
    /// inner one means no row or a NULL aggregate.
    pub fn query_i64(
        &mut self,
        db: &Database,
        table: &str,
        kind: StatementKind,
        params: impl Params,
    ) -> Result<Option<Option<i64>>> {
        let Some(sql) = self.get(db, table, kind)? else {
            return Ok(None);
        };
        let value = db
            .connection()
            .prepare_cached(sql)
            .and_then(|mut stmt| {
                stmt.query_row(params, |row| row.get::<_, Option<i64>>(0))
                    .optional()
            })
            .map_err(|err| db.err(err))?;
        Ok(Some(value.flatten()))
    }

    /// Whether `table` exists, probing the catalog at most once.
    pub fn table_exists(&mut self, db: &Database, table: &str) -> Result<bool> {
        if let Some(entry) = self.tables.get(table) {
            return Ok(entry.exists);
        }
        let exists = db.table_exists(table)?;
        self.tables.insert(
            table.to_string(),
            TableEntry {
                exists,
                sql: HashMap::new(),
            },
        );
        Ok(exists)
    }

    pub fn mark_created(&mut self, table: &str) {
        self.tables.entry(table.to_string()).or_default().exists = true;
    }

    /// Cached column list of a table, if loaded.
    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.columns.get(table).map(Vec::as_slice)
    }

    pub fn set_columns(&mut self, table: &str, columns: Vec<String>) {
        self.columns.insert(table.to_string(), columns);
    }

    pub fn type_key(&self, event_type: &str) -> Option<i64> {
        self.type_keys.get(event_type).copied()
    }

    pub fn set_type_key(&mut self, event_type: &str, key: i64) {
        self.type_keys.insert(event_type.to_string(), key);
    }

    /// Drop everything. Called right before the owning connection closes.
    pub fn invalidate(&mut self) {
        self.tables.clear();
        self.columns.clear();
        self.type_keys.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty() && self.type_keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_get_skips_missing_tables() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("c.db"), 8)?;
        let mut cache = StatementCache::new();

        assert!(cache.get(&db, "temp1", StatementKind::CountFrom)?.is_none());
        db.execute_batch(
            "CREATE TABLE \"temp1\" (_RowId INTEGER PRIMARY KEY, Time INTEGER, Value REAL, Status INTEGER)",
        )?;
        // The negative probe is remembered until the cache learns otherwise.
        assert!(cache.get(&db, "temp1", StatementKind::CountFrom)?.is_none());

        cache.mark_created("temp1");
        let sql = cache.get(&db, "temp1", StatementKind::CountFrom)?;
        assert_eq!(sql, Some("SELECT COUNT(*) FROM \"temp1\" WHERE Time >= ?1"));
        Ok(())
    }

    #[test]
    fn test_invalidate_clears_state() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("c.db"), 8)?;
        let mut cache = StatementCache::new();

        cache.mark_created("x");
        cache.set_columns("evt:Alarm", vec!["Severity".into()]);
        cache.set_type_key("Alarm", 1);
        assert!(!cache.is_empty());

        cache.invalidate();
        assert!(cache.is_empty());
        assert!(!cache.table_exists(&db, "x")?);
        Ok(())
    }

    #[test]
    fn test_statement_text_quotes_table() {
        let sql = StatementKind::ReadPage.sql("we\"ird");
        assert!(sql.contains("FROM \"we\"\"ird\""));
        assert!(sql.contains("ORDER BY Time ASC"));
    }
}
