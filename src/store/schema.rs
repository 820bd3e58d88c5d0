//! Table creation for series and event schemas.
//!
//! All creation goes through `CREATE ... IF NOT EXISTS`, so running it twice against
//! the same file is harmless; the statement cache records the result so it normally
//! runs once per (file, table).

use rusqlite::OptionalExtension;

use crate::error::{Error, Result};
use crate::store::driver::Database;
use crate::store::naming::{quote_ident, EVENT_TYPE_NAMES_TABLE};
use crate::store::statements::StatementCache;
use crate::value::{StorageType, Value};

/// Row key column shared by every table.
pub const ROW_KEY: &str = "_RowId";

/// Index names live in the table namespace, under a prefix no series can take.
const TIME_INDEX_PREFIX: &str = "__idx_time:";
const TIME_TYPE_INDEX_PREFIX: &str = "__idx_timetype:";

pub fn ensure_series_table(
    db: &Database,
    cache: &mut StatementCache,
    table: &str,
    value_type: StorageType,
) -> Result<()> {
    if cache.table_exists(db, table)? {
        return Ok(());
    }
    let t = quote_ident(table);
    let index = quote_ident(&format!("{TIME_INDEX_PREFIX}{table}"));
    db.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {t} ({ROW_KEY} INTEGER PRIMARY KEY AUTOINCREMENT, \
         Time INTEGER NOT NULL, Value {value_type}, Status INTEGER NOT NULL); \
         CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {t} (Time);"
    ))?;
    cache.mark_created(table);
    log::debug!("created series table {table} ({value_type}) in {}", db.path().display());
    Ok(())
}

pub fn ensure_emitter_table(db: &Database, cache: &mut StatementCache, table: &str) -> Result<()> {
    if cache.table_exists(db, table)? {
        return Ok(());
    }
    let t = quote_ident(table);
    let index = quote_ident(&format!("{TIME_TYPE_INDEX_PREFIX}{table}"));
    db.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {t} ({ROW_KEY} INTEGER PRIMARY KEY AUTOINCREMENT, \
         Time INTEGER NOT NULL, EventTypeKey INTEGER NOT NULL, EventRowKey INTEGER NOT NULL); \
         CREATE INDEX IF NOT EXISTS {index} ON {t} (Time, EventTypeKey);"
    ))?;
    cache.mark_created(table);
    Ok(())
}

pub fn ensure_type_names_table(db: &Database, cache: &mut StatementCache) -> Result<()> {
    if cache.table_exists(db, EVENT_TYPE_NAMES_TABLE)? {
        return Ok(());
    }
    db.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (TypeKey INTEGER PRIMARY KEY AUTOINCREMENT, \
         Name TEXT NOT NULL UNIQUE);",
        quote_ident(EVENT_TYPE_NAMES_TABLE)
    ))?;
    cache.mark_created(EVENT_TYPE_NAMES_TABLE);
    Ok(())
}

/// Integer key of `event_type` in this file, inserting a row when `create` is set.
pub fn event_type_key(
    db: &Database,
    cache: &mut StatementCache,
    event_type: &str,
    create: bool,
) -> Result<Option<i64>> {
    if let Some(key) = cache.type_key(event_type) {
        return Ok(Some(key));
    }
    if !cache.table_exists(db, EVENT_TYPE_NAMES_TABLE)? {
        return Ok(None);
    }
    let names = quote_ident(EVENT_TYPE_NAMES_TABLE);
    let conn = db.connection();
    if create {
        conn.prepare_cached(&format!("INSERT OR IGNORE INTO {names} (Name) VALUES (?1)"))
            .and_then(|mut stmt| stmt.execute([event_type]))
            .map_err(|err| db.err(err))?;
    }
    let key = conn
        .prepare_cached(&format!("SELECT TypeKey FROM {names} WHERE Name = ?1"))
        .and_then(|mut stmt| stmt.query_row([event_type], |row| row.get::<_, i64>(0)).optional())
        .map_err(|err| db.err(err))?;
    if let Some(key) = key {
        cache.set_type_key(event_type, key);
    } else if create {
        return Err(Error::Consistency(format!(
            "event type {event_type:?} missing right after insert in {}",
            db.path().display()
        )));
    }
    Ok(key)
}

/// Columns of an event-type table excluding the row key, loading them once.
pub fn event_columns(db: &Database, cache: &mut StatementCache, table: &str) -> Result<Vec<String>> {
    if let Some(columns) = cache.columns(table) {
        return Ok(columns.to_vec());
    }
    let columns: Vec<String> = db
        .table_columns(table)?
        .into_iter()
        .filter(|c| c != ROW_KEY)
        .collect();
    cache.set_columns(table, columns.clone());
    Ok(columns)
}

/// Make sure `table` exists with a column for every field, adding missing ones.
///
/// `fields` must be sorted by name; column types are inferred from the values, and a
/// field whose value is `Null` cannot seed a new column.
pub fn ensure_event_table(
    db: &Database,
    cache: &mut StatementCache,
    table: &str,
    fields: &[(&str, &Value)],
) -> Result<()> {
    if let Some((name, _)) = fields.iter().find(|(name, _)| name.eq_ignore_ascii_case(ROW_KEY)) {
        return Err(Error::Schema(format!("field {name:?} of {table} clashes with the row key")));
    }
    let t = quote_ident(table);
    if !cache.table_exists(db, table)? {
        let mut defs = vec![format!("{ROW_KEY} INTEGER PRIMARY KEY AUTOINCREMENT")];
        for (name, value) in fields {
            defs.push(format!("{} {}", quote_ident(name), column_type(table, name, value)?));
        }
        db.execute_batch(&format!("CREATE TABLE IF NOT EXISTS {t} ({});", defs.join(", ")))?;
        cache.mark_created(table);
        cache.set_columns(table, fields.iter().map(|(n, _)| n.to_string()).collect());
        return Ok(());
    }

    let mut columns = event_columns(db, cache, table)?;
    let mut added = false;
    for (name, value) in fields {
        if columns.iter().any(|c| c == name) {
            continue;
        }
        db.execute_batch(&format!(
            "ALTER TABLE {t} ADD COLUMN {} {};",
            quote_ident(name),
            column_type(table, name, value)?
        ))?;
        log::info!("added column {name} to {table} in {}", db.path().display());
        columns.push(name.to_string());
        added = true;
    }
    if added {
        cache.set_columns(table, columns);
    }
    Ok(())
}

fn column_type(table: &str, field: &str, value: &Value) -> Result<StorageType> {
    value.storage_type().ok_or_else(|| {
        Error::Schema(format!(
            "cannot infer a column type for field {field:?} of {table} from a null value"
        ))
    })
}
