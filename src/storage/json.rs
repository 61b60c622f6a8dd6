//! Baselines kept in a single JSON document, one table per analyzer.

use crate::model::GlobalTable;
use crate::storage::{decode_table, StoreError, TableStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    baselines: BTreeMap<String, StoredBaseline>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredBaseline {
    saved_at: DateTime<Utc>,
    table: serde_json::Value,
}

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            location: self.location(),
            source,
        }
    }

    /// `Ok(None)` when the file does not exist yet.
    fn read_document(&self) -> Result<Option<Document>, StoreError> {
        let body = match std::fs::read_to_string(&self.path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                location: self.location(),
                reason: e.to_string(),
            })
    }
}

impl TableStore for JsonFileStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self, analyzer: &str) -> Result<GlobalTable, StoreError> {
        let not_found = || StoreError::NotFound {
            analyzer: analyzer.to_string(),
            location: self.location(),
        };
        let document = self.read_document()?.ok_or_else(not_found)?;
        let stored = document.baselines.get(analyzer).ok_or_else(not_found)?;
        decode_table(&self.location(), &stored.table.to_string())
    }

    fn save(&self, analyzer: &str, table: &GlobalTable) -> Result<(), StoreError> {
        let mut document = self.read_document()?.unwrap_or_default();
        document.baselines.insert(
            analyzer.to_string(),
            StoredBaseline {
                saved_at: Utc::now(),
                table: serde_json::to_value(table)?,
            },
        );
        let body = serde_json::to_string_pretty(&document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        // Replaced atomically; the previous document survives a failed write.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        debug!(analyzer, path = %self.path.display(), keys = table.len(), "baseline saved");
        Ok(())
    }
}
