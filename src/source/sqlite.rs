//! Telemetry indexed by timestamp in the `telemetry` table.

use crate::model::RawRecord;
use crate::source::{non_empty, RecordQuery, RecordSource, SourceError};
use crate::storage::Pool;
use rusqlite::params;
use tracing::{info, warn};

/// Outcome of an import batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    /// Documents without a readable timestamp; they cannot be indexed.
    pub skipped: usize,
}

pub struct SqliteSource {
    pool: Pool,
    location: String,
}

impl SqliteSource {
    pub fn new(pool: Pool, location: impl Into<String>) -> Self {
        Self {
            pool,
            location: location.into(),
        }
    }

    /// Inserts documents in one transaction, keyed by `timestamp_field`.
    pub fn ingest(
        &self,
        records: &[RawRecord],
        timestamp_field: &str,
    ) -> Result<ImportSummary, SourceError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut summary = ImportSummary::default();
        {
            let mut stmt =
                tx.prepare("INSERT INTO telemetry (utc_timestamp, doc_json) VALUES (?1, ?2)")?;
            for record in records {
                let Some(ts) = record.timestamp(timestamp_field) else {
                    summary.skipped += 1;
                    continue;
                };
                let doc = serde_json::to_string(record).map_err(|e| SourceError::Parse {
                    path: self.location.clone(),
                    reason: e.to_string(),
                })?;
                stmt.execute(params![ts.timestamp_millis(), doc])?;
                summary.inserted += 1;
            }
        }
        tx.commit()?;

        if summary.skipped > 0 {
            warn!(
                skipped = summary.skipped,
                field = timestamp_field,
                "documents without timestamp not imported"
            );
        }
        info!(inserted = summary.inserted, location = %self.location, "telemetry imported");
        Ok(summary)
    }
}

impl RecordSource for SqliteSource {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.location)
    }

    fn fetch(&self, query: &RecordQuery<'_>) -> Result<Vec<RawRecord>, SourceError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT doc_json FROM telemetry
             WHERE utc_timestamp >= ?1 AND utc_timestamp < ?2
             ORDER BY utc_timestamp",
        )?;
        let docs = stmt
            .query_map(
                params![
                    query.window.start.timestamp_millis(),
                    query.window.end.timestamp_millis()
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            let record: RawRecord = serde_json::from_str(&doc).map_err(|e| SourceError::Parse {
                path: self.location.clone(),
                reason: e.to_string(),
            })?;
            if query.filter.map_or(true, |f| f.matches(&record)) {
                records.push(record);
            }
        }
        non_empty(records, query.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Window;
    use crate::source::RecordFilter;
    use crate::storage::open_pool;
    use chrono::NaiveDate;
    use serde_json::json;

    fn source() -> (tempfile::TempDir, SqliteSource) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.db");
        let pool = open_pool(&path).unwrap();
        (dir, SqliteSource::new(pool, path.display().to_string()))
    }

    #[test]
    fn test_ingest_then_fetch_window() {
        let (_dir, source) = source();
        let records = vec![
            RawRecord::from(json!({"utc_timestamp": "2020-07-01T03:00:00Z", "sev": "malicious"})),
            RawRecord::from(json!({"utc_timestamp": "2020-07-01T04:00:00Z", "sev": "benign"})),
            RawRecord::from(json!({"utc_timestamp": "2020-07-05T04:00:00Z", "sev": "malicious"})),
            RawRecord::from(json!({"sev": "malicious"})),
        ];
        let summary = source.ingest(&records, "utc_timestamp").unwrap();
        assert_eq!(summary, ImportSummary { inserted: 3, skipped: 1 });
        let stored: i64 = source
            .pool
            .get()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, 3);

        let window = Window::from_dates(
            NaiveDate::from_ymd_opt(2020, 7, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 7, 2).unwrap(),
        )
        .unwrap();
        let all = source.fetch(&RecordQuery::new(window, "utc_timestamp")).unwrap();
        assert_eq!(all.len(), 2);

        let filter = RecordFilter::new("sev", vec!["malicious".into()]);
        let query = RecordQuery::new(window, "utc_timestamp").with_filter(Some(&filter));
        assert_eq!(source.fetch(&query).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_window() {
        let (_dir, source) = source();
        let window = Window::from_dates(
            NaiveDate::from_ymd_opt(2020, 7, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 7, 2).unwrap(),
        )
        .unwrap();
        let err = source.fetch(&RecordQuery::new(window, "utc_timestamp")).unwrap_err();
        assert!(matches!(err, SourceError::Empty { .. }));
    }
}
