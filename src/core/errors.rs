//! PMS-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Failure class, used to pick the process exit status and the diagnostic tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad operator input: nothing was attempted.
    Input,
    /// The database refused or failed an operation.
    Storage,
    /// Filesystem or serialization trouble outside the database.
    Environment,
}

/// Top-level error type for probemon stats.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("[PMS-1001] can't parse day {value:?} (expected YYYY-MM-DD or YYYYMMDD)")]
    InvalidDay { value: String },

    #[error("[PMS-1002] can't parse timestamp {value:?} (expected YYYY-MM-DDTHH:MM or YYYY-MM-DD)")]
    InvalidTimestamp { value: String },

    #[error("[PMS-1003] conflicting filters: {details}")]
    ConflictingFilters { details: String },

    #[error("[PMS-1004] missing filter: {details}")]
    MissingFilter { details: String },

    #[error("[PMS-1005] network name not found: {name:?}")]
    NetworkNotFound { name: String },

    #[error("[PMS-1006] invalid day range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("[PMS-1101] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[PMS-1102] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[PMS-1103] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[PMS-2001] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[PMS-2002] table {table} does not exist")]
    MissingTable { table: &'static str },

    #[error("[PMS-2003] database file not found: {path}")]
    MissingDatabase { path: PathBuf },

    #[error("[PMS-2004] database {path} is opened read-only")]
    ReadOnlyStore { path: PathBuf },

    #[error("[PMS-2005] backfill aborted at {day}: {source}")]
    BackfillAborted {
        day: NaiveDate,
        #[source]
        source: Box<ProbeError>,
    },

    #[error("[PMS-3001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[PMS-3002] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },
}

impl ProbeError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidDay { .. } => "PMS-1001",
            Self::InvalidTimestamp { .. } => "PMS-1002",
            Self::ConflictingFilters { .. } => "PMS-1003",
            Self::MissingFilter { .. } => "PMS-1004",
            Self::NetworkNotFound { .. } => "PMS-1005",
            Self::InvalidRange { .. } => "PMS-1006",
            Self::InvalidConfig { .. } => "PMS-1101",
            Self::MissingConfig { .. } => "PMS-1102",
            Self::ConfigParse { .. } => "PMS-1103",
            Self::Sql { .. } => "PMS-2001",
            Self::MissingTable { .. } => "PMS-2002",
            Self::MissingDatabase { .. } => "PMS-2003",
            Self::ReadOnlyStore { .. } => "PMS-2004",
            Self::BackfillAborted { .. } => "PMS-2005",
            Self::Io { .. } => "PMS-3001",
            Self::Serialization { .. } => "PMS-3002",
        }
    }

    /// Which part of the error taxonomy this failure belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDay { .. }
            | Self::InvalidTimestamp { .. }
            | Self::ConflictingFilters { .. }
            | Self::MissingFilter { .. }
            | Self::NetworkNotFound { .. }
            | Self::InvalidRange { .. }
            | Self::InvalidConfig { .. }
            | Self::MissingConfig { .. }
            | Self::ConfigParse { .. } => ErrorKind::Input,
            Self::Sql { .. }
            | Self::MissingTable { .. }
            | Self::MissingDatabase { .. }
            | Self::ReadOnlyStore { .. }
            | Self::BackfillAborted { .. } => ErrorKind::Storage,
            Self::Io { .. } | Self::Serialization { .. } => ErrorKind::Environment,
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Attach a context label to a rusqlite failure.
    #[must_use]
    pub fn sql(context: &'static str, error: &rusqlite::Error) -> Self {
        Self::Sql {
            context,
            details: error.to_string(),
        }
    }
}

impl From<rusqlite::Error> for ProbeError {
    fn from(value: rusqlite::Error) -> Self {
        Self::sql("rusqlite", &value)
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for ProbeError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
