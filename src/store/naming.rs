//! File and table naming.
//!
//! Backing files are named `<base>_<epoch-ms>.<suffix>`; the timestamp is the catalog
//! key. Series and emitter identifiers come from a user-controlled tree, so every
//! identifier that reaches SQL goes through [`quote_ident`].

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Name of the per-file table that maps event-type identifiers to integer keys.
pub const EVENT_TYPE_NAMES_TABLE: &str = "__EventTypes";

/// Prefix of per-event-type tables.
pub const EVENT_TABLE_PREFIX: &str = "evt:";

/// Prefix of per-emitter reference tables.
pub const EMITTER_TABLE_PREFIX: &str = "emt:";

const RESERVED_PREFIX: &str = "__";

/// SQLite refuses to create tables under this prefix, in any letter case.
const SQLITE_PREFIX: &str = "sqlite_";

/// Generate a file name from its creation key (e.g. "history_1700000000000.db").
pub fn file_name(base: &str, key: i64, suffix: &str) -> String {
    format!("{base}_{key}.{suffix}")
}

pub fn file_path(dir: &Path, base: &str, key: i64, suffix: &str) -> PathBuf {
    dir.join(file_name(base, key, suffix))
}

/// Outcome of examining one directory entry.
#[derive(Debug, PartialEq, Eq)]
pub enum ParsedName {
    /// A backing file with its creation key.
    File(i64),
    /// Looks like ours (prefix and suffix match) but the key does not parse.
    Malformed,
    /// Not a backing file of this catalog.
    Foreign,
}

/// Classify a file name against `<base>_<epoch-ms>.<suffix>`.
pub fn parse_file_name(name: &str, base: &str, suffix: &str) -> ParsedName {
    let Some(stem) = name
        .strip_suffix(suffix)
        .and_then(|rest| rest.strip_suffix('.'))
    else {
        return ParsedName::Foreign;
    };
    let Some(key_text) = stem
        .strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('_'))
    else {
        return ParsedName::Foreign;
    };
    if key_text.is_empty() || !key_text.chars().all(|c| c.is_ascii_digit()) {
        return ParsedName::Malformed;
    }
    match key_text.parse::<i64>() {
        Ok(key) => ParsedName::File(key),
        Err(_) => ParsedName::Malformed,
    }
}

/// Discovered backing files of a directory, sorted by key, plus malformed names seen.
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<(i64, PathBuf)>,
    pub malformed: Vec<PathBuf>,
}

pub fn discover_files(dir: &Path, base: &str, suffix: &str) -> Result<Discovery> {
    let mut discovery = Discovery::default();

    if !dir.exists() {
        return Ok(discovery);
    }

    let entries = std::fs::read_dir(dir).map_err(|err| Error::io(dir, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| Error::io(dir, err))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match parse_file_name(name, base, suffix) {
            ParsedName::File(key) => discovery.files.push((key, path)),
            ParsedName::Malformed => discovery.malformed.push(path),
            ParsedName::Foreign => {}
        }
    }

    discovery.files.sort_unstable_by_key(|(key, _)| *key);
    Ok(discovery)
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for c in name.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn check_ident(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\0') {
        return Err(Error::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Validate a series identifier. Reserved prefixes belong to the event schema.
pub fn series_table(series: &str) -> Result<String> {
    check_ident(series)?;
    if series.starts_with(RESERVED_PREFIX)
        || series.starts_with(EVENT_TABLE_PREFIX)
        || series.starts_with(EMITTER_TABLE_PREFIX)
        || is_sqlite_internal(series)
    {
        return Err(Error::InvalidIdentifier(series.to_string()));
    }
    Ok(series.to_string())
}

pub fn event_table(event_type: &str) -> Result<String> {
    check_ident(event_type)?;
    Ok(format!("{EVENT_TABLE_PREFIX}{event_type}"))
}

pub fn emitter_table(emitter: &str) -> Result<String> {
    check_ident(emitter)?;
    Ok(format!("{EMITTER_TABLE_PREFIX}{emitter}"))
}

/// Does this catalog table name belong to a data series?
pub fn is_series_table(name: &str) -> bool {
    !name.starts_with(RESERVED_PREFIX)
        && !name.starts_with(EVENT_TABLE_PREFIX)
        && !name.starts_with(EMITTER_TABLE_PREFIX)
        && !is_sqlite_internal(name)
}

fn is_sqlite_internal(name: &str) -> bool {
    name.get(..SQLITE_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(SQLITE_PREFIX))
}
