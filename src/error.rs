use std::path::PathBuf;

use thiserror::Error;

use crate::log_sink::Category;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error on {}: {source}", path.display())]
    Sqlite {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("consistency violation: {0}")]
    Consistency(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn sqlite(path: impl Into<PathBuf>, source: rusqlite::Error) -> Self {
        Error::Sqlite {
            path: path.into(),
            source,
        }
    }

    /// Failure class used when the error is reported through a log sink.
    pub fn category(&self) -> Category {
        match self {
            Error::Config(_) => Category::Configuration,
            Error::Io { .. } | Error::Sqlite { .. } => Category::Driver,
            Error::Schema(_) | Error::InvalidIdentifier(_) => Category::Schema,
            Error::OutOfRange(_) | Error::Consistency(_) => Category::Consistency,
        }
    }

    /// True when the driver reported a uniqueness violation (duplicate timestamp).
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Error::Sqlite {
                source: rusqlite::Error::SqliteFailure(err, _),
                ..
            } => err.code == rusqlite::ErrorCode::ConstraintViolation,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_taxonomy() {
        assert_eq!(Error::Config("x".into()).category(), Category::Configuration);
        assert_eq!(Error::Schema("x".into()).category(), Category::Schema);
        assert_eq!(
            Error::io("/tmp/x", std::io::Error::from(std::io::ErrorKind::NotFound)).category(),
            Category::Driver
        );
        assert_eq!(Error::OutOfRange("x".into()).category(), Category::Consistency);
    }

    #[test]
    fn io_error_mentions_path() {
        let err = Error::io(
            "/data/history_1.db",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(err.to_string().contains("/data/history_1.db"));
    }
}
