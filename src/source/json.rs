//! Telemetry exported as JSON arrays of documents.

use crate::model::RawRecord;
use crate::source::{non_empty, RecordQuery, RecordSource, SourceError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reads one JSON file, or every `*.json` file of a directory in name order.
/// Each file holds a top-level array of documents.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Files this source will read.
    pub fn files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let meta = std::fs::metadata(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SourceError::Unavailable(format!("{} does not exist", self.path.display()))
            } else {
                io_error(&self.path, e)
            }
        })?;
        if !meta.is_dir() {
            return Ok(vec![self.path.clone()]);
        }

        let mut files = Vec::new();
        let entries = std::fs::read_dir(&self.path).map_err(|e| io_error(&self.path, e))?;
        for entry in entries {
            let path = entry.map_err(|e| io_error(&self.path, e))?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Parses one file into raw records. Non-object items become empty records.
pub fn read_file(path: &Path) -> Result<Vec<RawRecord>, SourceError> {
    let body = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let docs: Vec<serde_json::Value> =
        serde_json::from_str(&body).map_err(|e| SourceError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(docs.into_iter().map(RawRecord::from).collect())
}

fn io_error(path: &Path, source: std::io::Error) -> SourceError {
    SourceError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl RecordSource for JsonFileSource {
    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }

    fn fetch(&self, query: &RecordQuery<'_>) -> Result<Vec<RawRecord>, SourceError> {
        let files = self.files()?;
        info!(path = %self.path.display(), files = files.len(), "reading telemetry files");

        let mut records = Vec::new();
        for file in &files {
            let before = records.len();
            records.extend(read_file(file)?.into_iter().filter(|r| query.admits(r)));
            debug!(file = %file.display(), kept = records.len() - before, "file read");
        }
        non_empty(records, query.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Window;
    use chrono::NaiveDate;
    use serde_json::json;

    fn window() -> Window {
        Window::from_dates(
            NaiveDate::from_ymd_opt(2020, 7, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 7, 2).unwrap(),
        )
        .unwrap()
    }

    fn write(path: &Path, docs: serde_json::Value) {
        std::fs::write(path, serde_json::to_string(&docs).unwrap()).unwrap();
    }

    #[test]
    fn test_reads_directory_of_files() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("a.json"),
            json!([{"utc_timestamp": 1_593_565_200_000_i64, "n": 1}]),
        );
        write(
            &dir.path().join("b.json"),
            json!([
                {"utc_timestamp": 1_593_565_200_000_i64, "n": 2},
                {"utc_timestamp": 1_593_824_400_000_i64, "n": 3}
            ]),
        );
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = JsonFileSource::new(dir.path());
        assert_eq!(source.files().unwrap().len(), 2);
        let records = source
            .fetch(&RecordQuery::new(window(), "utc_timestamp"))
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_missing_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonFileSource::new(dir.path().join("nope.json"));
        let err = source
            .fetch(&RecordQuery::new(window(), "utc_timestamp"))
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[{\"utc_timestamp\": ").unwrap();
        let err = JsonFileSource::new(&path)
            .fetch(&RecordQuery::new(window(), "utc_timestamp"))
            .unwrap_err();
        assert!(matches!(err, SourceError::Parse { .. }));
    }
}
