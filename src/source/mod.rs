//! Record sources: where raw telemetry documents come from.

pub mod json;
pub mod memory;
pub mod sqlite;

use crate::model::{RawRecord, Window};
use thiserror::Error;

pub use json::JsonFileSource;
pub use memory::MemorySource;
pub use sqlite::SqliteSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("record source unavailable: {0}")]
    Unavailable(String),

    #[error("i/o error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("no records in {window}")]
    Empty { window: Window },
}

/// Keeps records whose `field` renders to one of `values`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    pub field: String,
    pub values: Vec<String>,
}

impl RecordFilter {
    pub fn new(field: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            field: field.into(),
            values,
        }
    }

    pub fn matches(&self, record: &RawRecord) -> bool {
        record
            .text(&self.field)
            .is_some_and(|v| self.values.iter().any(|want| *want == v))
    }
}

/// What to fetch: a window over a timestamp attribute, optionally filtered.
#[derive(Debug, Clone, Copy)]
pub struct RecordQuery<'a> {
    pub window: Window,
    pub timestamp_field: &'a str,
    pub filter: Option<&'a RecordFilter>,
}

impl<'a> RecordQuery<'a> {
    pub fn new(window: Window, timestamp_field: &'a str) -> Self {
        Self {
            window,
            timestamp_field,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<&'a RecordFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Records with a readable timestamp outside the window are dropped.
    /// Records without one are kept so the analyzer can count them as skipped.
    pub fn admits(&self, record: &RawRecord) -> bool {
        let in_window = match record.timestamp(self.timestamp_field) {
            Some(ts) => self.window.contains(ts),
            None => true,
        };
        in_window && self.filter.map_or(true, |f| f.matches(record))
    }
}

/// A finite batch of raw records for one window.
///
/// Implementations fail with [`SourceError::Empty`] when nothing matches;
/// callers treat that as an empty local table.
pub trait RecordSource: Send + Sync {
    /// Human-readable origin, for logs.
    fn describe(&self) -> String;

    fn fetch(&self, query: &RecordQuery<'_>) -> Result<Vec<RawRecord>, SourceError>;
}

pub(crate) fn non_empty(
    records: Vec<RawRecord>,
    window: Window,
) -> Result<Vec<RawRecord>, SourceError> {
    if records.is_empty() {
        Err(SourceError::Empty { window })
    } else {
        Ok(records)
    }
}
