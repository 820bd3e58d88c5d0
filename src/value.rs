//! Sample and event payloads.
//!
//! [`Value`] is a closed union; its storage column type follows from the variant
//! alone through [`Value::storage_type`]. Tables only keep primitive storage types,
//! so reads coerce back to a caller-declared [`FieldType`].

use std::collections::BTreeMap;
use std::fmt;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

/// Quality code attached to padding points returned past the end of the data.
pub const QUALITY_NO_DATA: u32 = 0x809B_0000;

/// Separator used to flatten browse-path segments into one column name.
pub const FIELD_PATH_SEPARATOR: &str = "/";

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Milliseconds since the UNIX epoch.
    DateTime(i64),
}

/// Column affinity a value is stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Integer,
    Real,
    Text,
    Blob,
}

impl StorageType {
    pub fn sql_name(self) -> &'static str {
        match self {
            StorageType::Integer => "INTEGER",
            StorageType::Real => "REAL",
            StorageType::Text => "TEXT",
            StorageType::Blob => "BLOB",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// Logical type a caller expects a stored field to come back as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    Integer,
    Float,
    Text,
    Bytes,
    DateTime,
}

impl Value {
    /// Storage type for a column created from this value. `Null` carries no type.
    pub fn storage_type(&self) -> Option<StorageType> {
        match self {
            Value::Null => None,
            Value::Bool(_) | Value::Int(_) | Value::DateTime(_) => Some(StorageType::Integer),
            Value::Float(_) => Some(StorageType::Real),
            Value::Text(_) => Some(StorageType::Text),
            Value::Bytes(_) => Some(StorageType::Blob),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert to the declared type. On failure the original value is handed back.
    pub fn coerce(self, to: FieldType) -> std::result::Result<Value, Value> {
        match (to, self) {
            (_, Value::Null) => Ok(Value::Null),

            (FieldType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (FieldType::Boolean, Value::Int(i)) => Ok(Value::Bool(i != 0)),
            (FieldType::Boolean, Value::Text(s)) => match s.as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(Value::Text(s)),
            },

            (FieldType::Integer, Value::Int(i)) => Ok(Value::Int(i)),
            (FieldType::Integer, Value::Bool(b)) => Ok(Value::Int(i64::from(b))),
            (FieldType::Integer, Value::DateTime(t)) => Ok(Value::Int(t)),
            (FieldType::Integer, Value::Float(f)) => {
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Ok(Value::Int(f as i64))
                } else {
                    Err(Value::Float(f))
                }
            }
            (FieldType::Integer, Value::Text(s)) => s.parse().map(Value::Int).map_err(|_| Value::Text(s)),

            (FieldType::Float, Value::Float(f)) => Ok(Value::Float(f)),
            (FieldType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (FieldType::Float, Value::Text(s)) => s.parse().map(Value::Float).map_err(|_| Value::Text(s)),

            (FieldType::Text, Value::Text(s)) => Ok(Value::Text(s)),
            (FieldType::Text, Value::Int(i)) => Ok(Value::Text(i.to_string())),
            (FieldType::Text, Value::Float(f)) => Ok(Value::Text(f.to_string())),
            (FieldType::Text, Value::Bool(b)) => Ok(Value::Text(b.to_string())),
            (FieldType::Text, Value::Bytes(b)) => {
                String::from_utf8(b).map(Value::Text).map_err(|err| Value::Bytes(err.into_bytes()))
            }

            (FieldType::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b)),
            (FieldType::Bytes, Value::Text(s)) => Ok(Value::Bytes(s.into_bytes())),

            (FieldType::DateTime, Value::DateTime(t)) => Ok(Value::DateTime(t)),
            (FieldType::DateTime, Value::Int(t)) => Ok(Value::DateTime(t)),

            (_, other) => Err(other),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Bool(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*b))),
            Value::Int(i) | Value::DateTime(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Int(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
        })
    }
}

/// One timestamped sample.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Milliseconds since the UNIX epoch.
    pub timestamp: i64,
    pub value: Value,
    pub quality: u32,
}

impl DataPoint {
    pub fn new(timestamp: i64, value: Value, quality: u32) -> Self {
        Self {
            timestamp,
            value,
            quality,
        }
    }

    /// Filler returned by range reads that ran out of data.
    pub fn placeholder() -> Self {
        Self {
            timestamp: 0,
            value: Value::Null,
            quality: QUALITY_NO_DATA,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.value.is_null() && self.quality == QUALITY_NO_DATA
    }
}

/// One event occurrence: a time plus its resolved fields, keyed by flattened name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventPoint {
    pub time: i64,
    pub fields: BTreeMap<String, Value>,
}

impl EventPoint {
    pub fn new(time: i64) -> Self {
        Self {
            time,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Flatten browse-path segments into the column name used for the field.
    pub fn field_name<S: AsRef<str>>(path: &[S]) -> String {
        path.iter()
            .map(|segment| segment.as_ref())
            .collect::<Vec<_>>()
            .join(FIELD_PATH_SEPARATOR)
    }
}

/// A requested event column and the type it should be read back as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_type_follows_variant() {
        assert_eq!(Value::Bool(true).storage_type(), Some(StorageType::Integer));
        assert_eq!(Value::DateTime(5).storage_type(), Some(StorageType::Integer));
        assert_eq!(Value::Float(1.5).storage_type(), Some(StorageType::Real));
        assert_eq!(Value::Text("a".into()).storage_type(), Some(StorageType::Text));
        assert_eq!(Value::Bytes(vec![1]).storage_type(), Some(StorageType::Blob));
        assert_eq!(Value::Null.storage_type(), None);
    }

    #[test]
    fn coercion_recovers_logical_types() {
        assert_eq!(Value::Int(1).coerce(FieldType::Boolean), Ok(Value::Bool(true)));
        assert_eq!(Value::Int(7).coerce(FieldType::DateTime), Ok(Value::DateTime(7)));
        assert_eq!(Value::Float(3.0).coerce(FieldType::Integer), Ok(Value::Int(3)));
        assert_eq!(Value::Text("42".into()).coerce(FieldType::Integer), Ok(Value::Int(42)));
        assert_eq!(Value::Null.coerce(FieldType::Text), Ok(Value::Null));
    }

    #[test]
    fn failed_coercion_returns_raw_value() {
        assert_eq!(Value::Float(2.5).coerce(FieldType::Integer), Err(Value::Float(2.5)));
        assert_eq!(
            Value::Text("maybe".into()).coerce(FieldType::Boolean),
            Err(Value::Text("maybe".into()))
        );
        assert_eq!(Value::Bytes(vec![1]).coerce(FieldType::DateTime), Err(Value::Bytes(vec![1])));
    }

    #[test]
    fn placeholder_is_recognisable() {
        assert!(DataPoint::placeholder().is_placeholder());
        assert!(!DataPoint::new(0, Value::Null, 0).is_placeholder());
    }

    #[test]
    fn field_names_flatten_paths() {
        assert_eq!(EventPoint::field_name(&["Severity"]), "Severity");
        assert_eq!(EventPoint::field_name(&["Limit", "High"]), "Limit/High");
    }
}
