//! Event history.
//!
//! Each event type has a table of field columns; each emitter has a reference table
//! of `(Time, EventTypeKey, EventRowKey)` rows pointing into those tables. Type names
//! map to integer keys through a per-file name table, so the same type may have
//! different keys in different files and is resolved file by file.

use std::collections::BTreeSet;

use rusqlite::{params, params_from_iter};

use crate::error::{Error, Result};
use crate::historian::{report, SearchDirection};
use crate::log_sink::LogSink;
use crate::store::naming::{emitter_table, event_table, quote_ident};
use crate::store::schema::{
    ensure_emitter_table, ensure_event_table, ensure_type_names_table, event_columns, event_type_key, ROW_KEY,
};
use crate::store::{Database, StatementCache, StatementKind};
use crate::value::{EventPoint, FieldSpec, Value};

use super::Historian;

const EVENT_SAVEPOINT: &str = "historian_event";

/// Resolved table names for one (emitter, event type) query.
struct EventTables {
    emitter: String,
    event: String,
    event_type: String,
}

impl EventTables {
    fn resolve(emitter: &str, event_type: &str) -> Result<Self> {
        Ok(Self {
            emitter: emitter_table(emitter)?,
            event: event_table(event_type)?,
            event_type: event_type.to_string(),
        })
    }

    /// Key of this event type in one file, or `None` when the file never saw it.
    fn type_key(&self, db: &Database, cache: &mut StatementCache) -> Result<Option<i64>> {
        if !cache.table_exists(db, &self.emitter)? {
            return Ok(None);
        }
        event_type_key(db, cache, &self.event_type, false)
    }
}

impl Historian {
    /// Record one event against every emitter in `emitters`.
    ///
    /// Fields holding `Null` are not stored. A field missing from the event-type table
    /// is added as a new column. The whole write, including the fan-out to emitters,
    /// succeeds or leaves the file untouched.
    pub fn write_event(
        &mut self,
        event_type: &str,
        emitters: &[&str],
        event: &EventPoint,
        sink: &mut LogSink,
    ) -> bool {
        let Some(now) = self.begin_call(sink) else {
            return false;
        };
        let result = self.write_event_at(now, event_type, emitters, event);
        match result {
            Ok(()) => {
                self.after_write(now, sink);
                true
            }
            Err(err) => {
                report(sink, now, &err, &format!("write of event {event_type:?} failed"));
                false
            }
        }
    }

    fn write_event_at(&mut self, now: i64, event_type: &str, emitters: &[&str], event: &EventPoint) -> Result<()> {
        if emitters.is_empty() {
            return Err(Error::Schema(format!("event {event_type:?} has no emitters")));
        }
        let table = event_table(event_type)?;
        let emitter_tables = emitters
            .iter()
            .map(|emitter| emitter_table(emitter))
            .collect::<Result<Vec<_>>>()?;
        let fields: Vec<(&str, &Value)> = event
            .fields
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (name.as_str(), value))
            .collect();

        self.with_write(now, |db, cache| {
            db.execute_batch(&format!("SAVEPOINT {EVENT_SAVEPOINT}"))?;
            match insert_event(db, cache, event_type, &table, &emitter_tables, event.time, &fields) {
                Ok(()) => db.execute_batch(&format!("RELEASE {EVENT_SAVEPOINT}")),
                Err(err) => {
                    // Tables created inside the savepoint are gone again.
                    cache.invalidate();
                    if let Err(undo) = db.execute_batch(&format!(
                        "ROLLBACK TO {EVENT_SAVEPOINT}; RELEASE {EVENT_SAVEPOINT}"
                    )) {
                        log::error!("event rollback failed in {}: {undo}", db.path().display());
                    }
                    Err(err)
                }
            }
        })
    }

    /// Names of every event type recorded for `emitter`, across all files.
    pub fn event_types_of_emitter(&mut self, emitter: &str, sink: &mut LogSink) -> Option<Vec<String>> {
        let now = self.begin_call(sink)?;
        let result = emitter_table(emitter).and_then(|table| {
            let mut names = BTreeSet::new();
            for key in self.catalog.keys() {
                let found = self.with_read(key, now, |db, cache| {
                    let Some(sql) = cache.get(db, &table, StatementKind::EmitterTypes)? else {
                        return Ok(Vec::new());
                    };
                    let mut stmt = db.connection().prepare_cached(sql).map_err(|err| db.err(err))?;
                    let rows = stmt
                        .query_map([], |row| row.get::<_, String>(0))
                        .map_err(|err| db.err(err))?;
                    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|err| db.err(err))
                })?;
                names.extend(found);
            }
            Ok(names.into_iter().collect())
        });
        self.finish(result, sink, now, emitter, "event type listing")
    }

    /// Closest time strictly above or below `t` of an `event_type` event of `emitter`.
    pub fn find_event_timestamp(
        &mut self,
        emitter: &str,
        event_type: &str,
        t: i64,
        direction: SearchDirection,
        sink: &mut LogSink,
    ) -> Option<i64> {
        let now = self.begin_call(sink)?;
        let scope = format!("{emitter}\0{event_type}");
        let ttl = self.config.find_cache_ttl_ms;
        if let Some(hit) = self.find_cache.get(&scope, t, direction, now, ttl) {
            return hit;
        }
        let result = EventTables::resolve(emitter, event_type)
            .and_then(|tables| self.search_events(&tables, t, direction, now));
        let found = self.finish(result, sink, now, emitter, "event search")?;
        self.find_cache.insert(&scope, t, direction, found, now);
        found
    }

    /// Number of `event_type` events of `emitter` in `[start, end]`.
    pub fn count_events(
        &mut self,
        emitter: &str,
        event_type: &str,
        start: i64,
        end: Option<i64>,
        sink: &mut LogSink,
    ) -> Option<u64> {
        let now = self.begin_call(sink)?;
        let result = EventTables::resolve(emitter, event_type).and_then(|tables| {
            if end.is_some_and(|end| end < start) {
                return Ok(0);
            }
            let mut total = 0u64;
            for key in self.catalog.candidate_keys(start) {
                if end.is_some_and(|end| key > end) {
                    break;
                }
                total += self.with_read(key, now, |db, cache| count_from(db, cache, &tables, start, end))?;
            }
            Ok(total)
        });
        self.finish(result, sink, now, emitter, "event count")
    }

    /// Read up to `limit` events of `event_type` for `emitter` at or after `start`.
    ///
    /// Only the requested fields are read back; names the event-type table does not
    /// have are ignored. Each value is converted to its declared type, and a value
    /// that does not convert is returned as stored. Unlike [`read_range`](Self::read_range)
    /// the result is not padded.
    #[allow(clippy::too_many_arguments)]
    pub fn read_events(
        &mut self,
        emitter: &str,
        event_type: &str,
        start: i64,
        offset: u64,
        limit: usize,
        fields: &[FieldSpec],
        sink: &mut LogSink,
    ) -> Option<Vec<EventPoint>> {
        let now = self.begin_call(sink)?;
        let result = EventTables::resolve(emitter, event_type)
            .and_then(|tables| self.read_event_pages(&tables, start, offset, limit, fields, now));
        self.finish(result, sink, now, emitter, "event read")
    }

    fn search_events(
        &mut self,
        tables: &EventTables,
        t: i64,
        direction: SearchDirection,
        now: i64,
    ) -> Result<Option<i64>> {
        let (keys, kind) = match direction {
            SearchDirection::Above => (self.catalog.candidate_keys(t), StatementKind::EmitterFindAbove),
            SearchDirection::Below => {
                let mut keys: Vec<i64> = self.catalog.keys().into_iter().filter(|k| *k <= t).collect();
                keys.reverse();
                (keys, StatementKind::EmitterFindBelow)
            }
        };
        for key in keys {
            let found = self.with_read(key, now, |db, cache| {
                let Some(type_key) = tables.type_key(db, cache)? else {
                    return Ok(None);
                };
                Ok(cache.query_i64(db, &tables.emitter, kind, [type_key, t])?.flatten())
            })?;
            if found.is_some() {
                return Ok(found);
            }
        }

        let (mut keys, kind) = match direction {
            SearchDirection::Above => (self.catalog.keys(), StatementKind::EmitterLast),
            SearchDirection::Below => (self.catalog.keys(), StatementKind::EmitterFirst),
        };
        if direction == SearchDirection::Above {
            keys.reverse();
        }
        for key in keys {
            let bound = self.with_read(key, now, |db, cache| {
                let Some(type_key) = tables.type_key(db, cache)? else {
                    return Ok(None);
                };
                Ok(cache.query_i64(db, &tables.emitter, kind, [type_key])?.flatten())
            })?;
            if let Some(bound) = bound {
                let strict = match direction {
                    SearchDirection::Above => bound > t,
                    SearchDirection::Below => bound < t,
                };
                return Ok(strict.then_some(bound));
            }
        }
        Ok(None)
    }

    fn read_event_pages(
        &mut self,
        tables: &EventTables,
        start: i64,
        offset: u64,
        limit: usize,
        fields: &[FieldSpec],
        now: i64,
    ) -> Result<Vec<EventPoint>> {
        let mut events = Vec::new();
        if limit == 0 {
            return Ok(events);
        }

        let keys = self.catalog.candidate_keys(start);
        let mut skip = offset;
        let mut first = keys.len();
        for (index, key) in keys.iter().enumerate() {
            let count = self.with_read(*key, now, |db, cache| count_from(db, cache, tables, start, None))?;
            if skip < count {
                first = index;
                break;
            }
            skip -= count;
        }

        for key in keys.iter().skip(first) {
            let wanted = limit - events.len();
            let page_offset = skip;
            let page = self.with_read(*key, now, |db, cache| {
                read_event_page(db, cache, tables, start, page_offset, wanted, fields)
            })?;
            skip = 0;
            events.extend(page);
            if events.len() >= limit {
                break;
            }
        }
        Ok(events)
    }
}

fn insert_event(
    db: &Database,
    cache: &mut StatementCache,
    event_type: &str,
    table: &str,
    emitter_tables: &[String],
    time: i64,
    fields: &[(&str, &Value)],
) -> Result<()> {
    ensure_event_table(db, cache, table, fields)?;
    ensure_type_names_table(db, cache)?;
    let type_key = event_type_key(db, cache, event_type, true)?
        .ok_or_else(|| Error::Consistency(format!("no key for event type {event_type:?}")))?;

    let t = quote_ident(table);
    let conn = db.connection();
    if fields.is_empty() {
        conn.prepare_cached(&format!("INSERT INTO {t} DEFAULT VALUES"))
            .and_then(|mut stmt| stmt.execute([]))
            .map_err(|err| db.err(err))?;
    } else {
        let columns: Vec<String> = fields.iter().map(|(name, _)| quote_ident(name)).collect();
        let placeholders: Vec<String> = (1..=fields.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {t} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        conn.prepare_cached(&sql)
            .and_then(|mut stmt| stmt.execute(params_from_iter(fields.iter().map(|(_, value)| *value))))
            .map_err(|err| db.err(err))?;
    }
    let row_key = conn.last_insert_rowid();

    for emitter in emitter_tables {
        ensure_emitter_table(db, cache, emitter)?;
        let Some(sql) = cache.get(db, emitter, StatementKind::EmitterInsert)? else {
            return Err(Error::Consistency(format!("emitter table {emitter} missing right after creation")));
        };
        db.connection()
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.execute(params![time, type_key, row_key]))
            .map_err(|err| db.err(err))?;
    }
    Ok(())
}

fn count_from(
    db: &Database,
    cache: &mut StatementCache,
    tables: &EventTables,
    start: i64,
    end: Option<i64>,
) -> Result<u64> {
    let Some(type_key) = tables.type_key(db, cache)? else {
        return Ok(0);
    };
    let count = match end {
        Some(end) => cache.query_i64(db, &tables.emitter, StatementKind::EmitterCountRange, [type_key, start, end])?,
        None => cache.query_i64(db, &tables.emitter, StatementKind::EmitterCountFrom, [type_key, start])?,
    };
    Ok(count.flatten().map_or(0, |n| n.max(0) as u64))
}

fn read_event_page(
    db: &Database,
    cache: &mut StatementCache,
    tables: &EventTables,
    start: i64,
    offset: u64,
    limit: usize,
    fields: &[FieldSpec],
) -> Result<Vec<EventPoint>> {
    let Some(type_key) = tables.type_key(db, cache)? else {
        return Ok(Vec::new());
    };
    if !cache.table_exists(db, &tables.event)? {
        return Ok(Vec::new());
    }
    let available = event_columns(db, cache, &tables.event)?;
    let wanted: Vec<&FieldSpec> = fields
        .iter()
        .filter(|spec| available.iter().any(|column| *column == spec.name))
        .collect();

    let mut select = vec!["e.Time".to_string()];
    select.extend(wanted.iter().map(|spec| format!("v.{}", quote_ident(&spec.name))));
    let sql = format!(
        "SELECT {} FROM {} e JOIN {} v ON v.{ROW_KEY} = e.EventRowKey \
         WHERE e.EventTypeKey = ?1 AND e.Time >= ?2 \
         ORDER BY e.Time ASC, e.{ROW_KEY} ASC LIMIT ?3 OFFSET ?4",
        select.join(", "),
        quote_ident(&tables.emitter),
        quote_ident(&tables.event),
    );

    let mut stmt = db.connection().prepare_cached(&sql).map_err(|err| db.err(err))?;
    let rows = stmt
        .query_map(params![type_key, start, limit as i64, offset as i64], |row| {
            let mut event = EventPoint::new(row.get(0)?);
            for (index, spec) in wanted.iter().enumerate() {
                let raw: Value = row.get(index + 1)?;
                if raw.is_null() {
                    continue;
                }
                let value = raw.coerce(spec.field_type).unwrap_or_else(|stored| stored);
                event.fields.insert(spec.name.clone(), value);
            }
            Ok(event)
        })
        .map_err(|err| db.err(err))?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|err| db.err(err))
}
