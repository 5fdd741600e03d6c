//! Typed errors shared by the collection stages.
//!
//! - [`SourceError`]: failures talking to a [`crate::source::RecordSource`]
//! - [`TableError`]: CSV table load/store failures
//! - [`ConfigError`]: pipeline configuration failures
//!
//! Stage entry points and `main` still return `Box<dyn Error>`; these types
//! exist so callers can tell a missing scope apart from a transient failure.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a record source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The requested scope or item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("HTTP error (status {status}) for {url}")]
    Http { status: u16, url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl SourceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(err.to_string())
    }
}

/// Errors raised while loading or storing a CSV table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("table not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("missing column '{column}' in {}", .path.display())]
    MissingColumn { column: String, path: PathBuf },

    #[error("csv error in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while loading the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A `*_delay_secs` value that is negative, NaN or too large.
    #[error("invalid {field}: {value}")]
    InvalidDelay { field: &'static str, value: f64 },
}
