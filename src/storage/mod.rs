//! Baseline persistence and the SQLite layer shared with the record store.

pub mod json;
pub mod schema;
pub mod sqlite;

use crate::model::GlobalTable;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use thiserror::Error;

pub use json::JsonFileStore;
pub use sqlite::SqliteStore;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no baseline for analyzer '{analyzer}' in {location}")]
    NotFound { analyzer: String, location: String },

    #[error("baseline in {location} is corrupt: {reason}")]
    Corrupt { location: String, reason: String },

    #[error("i/o error on {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("failed to serialize baseline: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    /// A missing baseline means cold start, not failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Persists one global table per analyzer.
///
/// `save` must replace the previous baseline atomically: a failed save leaves
/// the old one loadable.
pub trait TableStore: Send + Sync {
    /// Where the baselines live, for logs and errors.
    fn location(&self) -> String;

    fn load(&self, analyzer: &str) -> Result<GlobalTable, StoreError>;

    fn save(&self, analyzer: &str, table: &GlobalTable) -> Result<(), StoreError>;
}

/// Parses a stored table and checks its invariants; any failure is corruption.
pub(crate) fn decode_table(location: &str, body: &str) -> Result<GlobalTable, StoreError> {
    let table: GlobalTable = serde_json::from_str(body).map_err(|e| StoreError::Corrupt {
        location: location.to_string(),
        reason: e.to_string(),
    })?;
    table.validate().map_err(|reason| StoreError::Corrupt {
        location: location.to_string(),
        reason,
    })?;
    for (key, entry) in table.iter() {
        if entry.contributions.is_empty() {
            return Err(StoreError::Corrupt {
                location: location.to_string(),
                reason: format!("{}: no contributing windows", key),
            });
        }
    }
    Ok(table)
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool, StoreError> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_table("mem", "{ not json").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_decode_rejects_invariant_violation() {
        let body = r#"{
            "window": {"start": "2020-07-01T00:00:00Z", "end": "2020-07-02T00:00:00Z"},
            "entries": [{
                "key": {"index": ["malicious"], "dimensions": "none"},
                "entry": {
                    "stats": {"sub_count": 5, "samp_count": 2, "groupings": 1,
                              "samp_sub_count_max": 5, "samp_sub_count_mean": 5.0,
                              "samp_sub_count_std": 0.0},
                    "contributions": []
                }
            }]
        }"#;
        let err = decode_table("mem", body).unwrap_err();
        match err {
            StoreError::Corrupt { reason, .. } => assert!(reason.contains("samp_count")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_open_pool_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("peaks.db")).unwrap();
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM global_tables", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
