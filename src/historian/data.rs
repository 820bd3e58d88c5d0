//! Data point history: one table per series in every file that has seen it.

use rusqlite::params;

use crate::error::{Error, Result};
use crate::historian::{report, SearchDirection};
use crate::log_sink::{Category, LogEntry, LogSink, Severity};
use crate::store::naming::series_table;
use crate::store::schema::ensure_series_table;
use crate::store::StatementKind;
use crate::value::{DataPoint, StorageType};

use super::Historian;

impl Historian {
    /// Append one point to the writable file.
    ///
    /// The series table is created on first write with a value column typed after
    /// `point.value`; later writes never change that type. A `Null` first value
    /// gives the column BLOB affinity, which stores anything.
    pub fn write(&mut self, series: &str, point: &DataPoint, sink: &mut LogSink) -> bool {
        let Some(now) = self.begin_call(sink) else {
            return false;
        };
        let result = series_table(series).and_then(|table| {
            self.check_write_order(&table, point.timestamp, now)?;
            self.with_write(now, |db, cache| {
                let storage = point.value.storage_type().unwrap_or(StorageType::Blob);
                ensure_series_table(db, cache, &table, storage)?;
                let Some(sql) = cache.get(db, &table, StatementKind::Insert)? else {
                    return Err(Error::Consistency(format!(
                        "series table {table} missing right after creation"
                    )));
                };
                db.connection()
                    .prepare_cached(sql)
                    .and_then(|mut stmt| stmt.execute(params![point.timestamp, point.value, point.quality]))
                    .map_err(|err| db.err(err))?;
                Ok(())
            })
        });
        match result {
            Ok(()) => {
                self.after_write(now, sink);
                true
            }
            Err(err) => {
                report(sink, now, &err, &format!("write to series {series:?} failed"));
                false
            }
        }
    }

    /// Earliest timestamp of `series`, from the oldest file holding any of its rows.
    pub fn first_timestamp(&mut self, series: &str, sink: &mut LogSink) -> Option<i64> {
        let now = self.begin_call(sink)?;
        let result = series_table(series).and_then(|table| self.scan_bound(&table, now, true));
        self.finish(result, sink, now, series, "first timestamp")
            .flatten()
    }

    /// Latest timestamp of `series`, from the newest file holding any of its rows.
    pub fn last_timestamp(&mut self, series: &str, sink: &mut LogSink) -> Option<i64> {
        let now = self.begin_call(sink)?;
        let result = series_table(series).and_then(|table| self.scan_bound(&table, now, false));
        self.finish(result, sink, now, series, "last timestamp")
            .flatten()
    }

    /// Does `series` hold a point at exactly `t`?
    ///
    /// Asking about a time before the oldest file is an out-of-range query: it is
    /// logged as an error and answered with `false`.
    pub fn has_timestamp(&mut self, series: &str, t: i64, sink: &mut LogSink) -> bool {
        let Some(now) = self.begin_call(sink) else {
            return false;
        };
        let result = series_table(series).and_then(|table| {
            if self.catalog.oldest_key().is_some_and(|oldest| t < oldest) {
                return Err(Error::OutOfRange(format!(
                    "timestamp {t} precedes the oldest history file"
                )));
            }
            for key in self.catalog.candidate_keys(t) {
                let hit = self.with_read(key, now, |db, cache| {
                    cache.query_i64(db, &table, StatementKind::Exists, [t])
                })?;
                if matches!(hit, Some(Some(_))) {
                    return Ok(true);
                }
            }
            Ok(false)
        });
        self.finish(result, sink, now, series, "timestamp lookup")
            .unwrap_or(false)
    }

    /// Closest timestamp strictly above or below `t`.
    pub fn find_timestamp(
        &mut self,
        series: &str,
        t: i64,
        direction: SearchDirection,
        sink: &mut LogSink,
    ) -> Option<i64> {
        let now = self.begin_call(sink)?;
        let ttl = self.config.find_cache_ttl_ms;
        if let Some(hit) = self.find_cache.get(series, t, direction, now, ttl) {
            return hit;
        }
        let result = series_table(series).and_then(|table| self.search(&table, t, direction, now));
        let found = self.finish(result, sink, now, series, "neighbour search")?;
        self.find_cache.insert(series, t, direction, found, now);
        found
    }

    /// Number of points in `[start, end]`; `None` for `end` means up to the newest point.
    pub fn count_in_range(
        &mut self,
        series: &str,
        start: i64,
        end: Option<i64>,
        sink: &mut LogSink,
    ) -> Option<u64> {
        let now = self.begin_call(sink)?;
        let result = series_table(series).and_then(|table| {
            if end.is_some_and(|end| end < start) {
                return Ok(0);
            }
            let mut total = 0u64;
            for key in self.catalog.candidate_keys(start) {
                if end.is_some_and(|end| key > end) {
                    break;
                }
                let count = self.with_read(key, now, |db, cache| match end {
                    Some(end) => cache.query_i64(db, &table, StatementKind::CountRange, [start, end]),
                    None => cache.query_i64(db, &table, StatementKind::CountFrom, [start]),
                })?;
                total += count.flatten().map_or(0, |n| n.max(0) as u64);
            }
            Ok(total)
        });
        self.finish(result, sink, now, series, "count")
    }

    /// Read `limit` points at or after `start`, skipping the first `offset`.
    ///
    /// The result holds `limit` entries; when the series runs out the tail is filled
    /// with [`DataPoint::placeholder`]. A `limit` above `max_read_points` is cut to
    /// that many rows followed by a single placeholder, and a warning is logged.
    pub fn read_range(
        &mut self,
        series: &str,
        start: i64,
        offset: u64,
        limit: usize,
        sink: &mut LogSink,
    ) -> Option<Vec<DataPoint>> {
        let now = self.begin_call(sink)?;
        let cap = self.config.max_read_points.max(1);
        let wanted = limit.min(cap);
        let result = series_table(series).and_then(|table| self.read_pages(&table, start, offset, wanted, now));
        let mut points = self.finish(result, sink, now, series, "range read")?;
        if wanted < limit {
            sink.push(LogEntry::new(
                Severity::Warning,
                Category::Configuration,
                now,
                format!("range read of {series:?} asked for {limit} points, capped at {cap}"),
            ));
            points.push(DataPoint::placeholder());
        } else {
            points.resize_with(limit, DataPoint::placeholder);
        }
        Some(points)
    }

    /// Refuse a point that would sort at or before data held by an older file.
    ///
    /// Points at or after the series' first row in the writable file are fine; the
    /// unique time index catches exact duplicates there.
    fn check_write_order(&mut self, table: &str, t: i64, now: i64) -> Result<()> {
        let keys = self.catalog.keys();
        let Some((&tail, older)) = keys.split_last() else {
            return Ok(());
        };
        let first = self.with_file(tail, now, |db, cache| {
            cache.query_i64(db, table, StatementKind::FirstTimestamp, [])
        })?;
        if first.flatten().is_some_and(|first| t >= first) {
            return Ok(());
        }
        for key in older.iter().rev() {
            let last = self.with_file(*key, now, |db, cache| {
                cache.query_i64(db, table, StatementKind::LastTimestamp, [])
            })?;
            if let Some(Some(last)) = last {
                if t <= last {
                    return Err(Error::Consistency(format!(
                        "timestamp {t} is not after {last}, already stored in history file {key}"
                    )));
                }
                break;
            }
        }
        Ok(())
    }

    fn scan_bound(&mut self, table: &str, now: i64, oldest_first: bool) -> Result<Option<i64>> {
        let mut keys = self.catalog.keys();
        let kind = if oldest_first {
            StatementKind::FirstTimestamp
        } else {
            keys.reverse();
            StatementKind::LastTimestamp
        };
        for key in keys {
            let bound = self.with_read(key, now, |db, cache| cache.query_i64(db, table, kind, []))?;
            if let Some(Some(t)) = bound {
                return Ok(Some(t));
            }
        }
        Ok(None)
    }

    fn search(&mut self, table: &str, t: i64, direction: SearchDirection, now: i64) -> Result<Option<i64>> {
        let (keys, kind) = match direction {
            SearchDirection::Above => (self.catalog.candidate_keys(t), StatementKind::FindAbove),
            SearchDirection::Below => {
                let mut keys: Vec<i64> = self.catalog.keys().into_iter().filter(|k| *k <= t).collect();
                keys.reverse();
                (keys, StatementKind::FindBelow)
            }
        };
        for key in keys {
            let found = self.with_read(key, now, |db, cache| cache.query_i64(db, table, kind, [t]))?;
            if let Some(Some(found)) = found {
                return Ok(Some(found));
            }
        }

        // Nothing in the natural walk; the extreme of the series still counts if it
        // satisfies the strict inequality.
        let fallback = match direction {
            SearchDirection::Above => self.scan_bound(table, now, false)?.filter(|last| *last > t),
            SearchDirection::Below => self.scan_bound(table, now, true)?.filter(|first| *first < t),
        };
        Ok(fallback)
    }

    fn read_pages(
        &mut self,
        table: &str,
        start: i64,
        offset: u64,
        limit: usize,
        now: i64,
    ) -> Result<Vec<DataPoint>> {
        let mut points = Vec::with_capacity(limit.min(4096));
        if limit == 0 {
            return Ok(points);
        }

        // Pass 1: find the file holding row number `offset`.
        let keys = self.catalog.candidate_keys(start);
        let mut skip = offset;
        let mut first = keys.len();
        for (index, key) in keys.iter().enumerate() {
            let count = self.with_read(*key, now, |db, cache| {
                cache.query_i64(db, table, StatementKind::CountFrom, [start])
            })?;
            let count = count.flatten().map_or(0, |n| n.max(0) as u64);
            if skip < count {
                first = index;
                break;
            }
            skip -= count;
        }

        // Pass 2: read forward from there.
        for key in keys.iter().skip(first) {
            let wanted = limit - points.len();
            let page_offset = skip;
            let page = self.with_read(*key, now, |db, cache| {
                let Some(sql) = cache.get(db, table, StatementKind::ReadPage)? else {
                    return Ok(Vec::new());
                };
                let mut stmt = db.connection().prepare_cached(sql).map_err(|err| db.err(err))?;
                let rows = stmt
                    .query_map(params![start, wanted as i64, page_offset as i64], |row| {
                        Ok(DataPoint::new(row.get(0)?, row.get(1)?, row.get(2)?))
                    })
                    .map_err(|err| db.err(err))?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|err| db.err(err))
            })?;
            skip = 0;
            points.extend(page);
            if points.len() >= limit {
                break;
            }
        }
        Ok(points)
    }
}
