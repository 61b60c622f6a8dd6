//! Baselines in the `global_tables` table of the SQLite database.

use crate::model::GlobalTable;
use crate::storage::{decode_table, Pool, StoreError, TableStore};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

pub struct SqliteStore {
    pool: Pool,
    location: String,
}

impl SqliteStore {
    pub fn new(pool: Pool, location: impl Into<String>) -> Self {
        Self {
            pool,
            location: location.into(),
        }
    }
}

impl TableStore for SqliteStore {
    fn location(&self) -> String {
        self.location.clone()
    }

    fn load(&self, analyzer: &str) -> Result<GlobalTable, StoreError> {
        let conn = self.pool.get()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT table_json FROM global_tables WHERE analyzer = ?1",
                params![analyzer],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(body) => decode_table(&self.location, &body),
            None => Err(StoreError::NotFound {
                analyzer: analyzer.to_string(),
                location: self.location.clone(),
            }),
        }
    }

    fn save(&self, analyzer: &str, table: &GlobalTable) -> Result<(), StoreError> {
        let body = serde_json::to_string(table)?;
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO global_tables (analyzer, window_start, window_end, table_json, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(analyzer) DO UPDATE SET
                window_start = excluded.window_start,
                window_end = excluded.window_end,
                table_json = excluded.table_json,
                saved_at = excluded.saved_at",
            params![
                analyzer,
                table.window.start.to_rfc3339(),
                table.window.end.to_rfc3339(),
                body,
                Utc::now().to_rfc3339()
            ],
        )?;
        tracing::debug!(analyzer, location = %self.location, keys = table.len(), "baseline saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::stats::Aggregate;
    use crate::model::{Dimensions, GlobalEntry, Index, StatsEntry, StatsKey, Window};
    use crate::storage::open_pool;
    use chrono::NaiveDate;

    fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peaks.db");
        let pool = open_pool(&path).unwrap();
        (dir, SqliteStore::new(pool, path.display().to_string()))
    }

    fn table(sub: u64) -> GlobalTable {
        let window = Window::from_dates(
            NaiveDate::from_ymd_opt(2020, 7, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 7, 2).unwrap(),
        )
        .unwrap();
        let mut t = GlobalTable::new(window);
        t.insert(
            StatsKey::new(Index::new(["high"]), Dimensions::One("Trojan".into())),
            GlobalEntry::from_local(
                window,
                StatsEntry::new(sub, sub, Aggregate::from_counts(&[sub])),
            ),
        );
        t
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(store.load("network").unwrap_err().is_not_found());
    }

    #[test]
    fn test_save_replaces_previous() {
        let (_dir, store) = store();
        store.save("network", &table(3)).unwrap();
        store.save("network", &table(7)).unwrap();
        let loaded = store.load("network").unwrap();
        assert_eq!(loaded, table(7));

        let conn = store.pool.get().unwrap();
        let (rows, start): (i64, String) = conn
            .query_row(
                "SELECT COUNT(*), MIN(window_start) FROM global_tables",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(rows, 1);
        assert!(start.starts_with("2020-07-01"));
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let (_dir, store) = store();
        let conn = store.pool.get().unwrap();
        conn.execute(
            "INSERT INTO global_tables (analyzer, window_start, window_end, table_json, saved_at)
             VALUES ('network', '', '', '[1, 2', '')",
            [],
        )
        .unwrap();
        drop(conn);
        assert!(matches!(store.load("network").unwrap_err(), StoreError::Corrupt { .. }));
    }
}
