//! Telemetry peak analyzer -- detect bursts of distinct sub-items in
//! multi-dimensional telemetry against a rolling historical baseline.
//!
//! This crate provides statistics tables, the window merger, the threshold
//! advisor and peak detector, pluggable analyzers, and the record sources and
//! baseline stores that feed them.

pub mod analysis;
pub mod analyzers;
pub mod config;
pub mod detect;
pub mod model;
pub mod source;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use analysis::{RunError, RunOutcome, Runner};
use config::{SourceConfig, SourceKind, StoreConfig, StoreKind};
use model::Window;
use source::{JsonFileSource, RecordSource, SourceError, SqliteSource};
use storage::{JsonFileStore, SqliteStore, StoreError, TableStore};

/// Run the analysis for `window` off the async runtime, bounded by `timeout`,
/// and persist the new baseline unless `persist` is false.
///
/// A timeout discards the run; the stored baseline is untouched.
pub async fn analyze(
    runner: Runner,
    window: Window,
    timeout: Duration,
    persist: bool,
) -> Result<RunOutcome, RunError> {
    tracing::info!(analyzer = %runner.analyzer().name(), %window, ?timeout, "starting run");

    let task = runner.clone();
    let handle = tokio::task::spawn_blocking(move || task.run(window));
    let outcome = match tokio::time::timeout(timeout, handle).await {
        Ok(joined) => joined.map_err(|e| RunError::Task(e.to_string()))??,
        Err(_) => return Err(RunError::TimedOut(timeout)),
    };

    if !persist {
        tracing::info!("dry run, baseline not saved");
        return Ok(outcome);
    }

    tokio::task::spawn_blocking(move || {
        runner.persist(&outcome)?;
        Ok::<_, RunError>(outcome)
    })
    .await
    .map_err(|e| RunError::Task(e.to_string()))?
}

/// Record source described by configuration.
pub fn open_source(cfg: &SourceConfig) -> Result<Arc<dyn RecordSource>, SourceError> {
    match cfg.kind {
        SourceKind::Json => Ok(Arc::new(JsonFileSource::new(&cfg.input))),
        SourceKind::Sqlite => {
            if !cfg.input.exists() {
                return Err(SourceError::Unavailable(format!(
                    "{} does not exist",
                    cfg.input.display()
                )));
            }
            let pool = storage::open_pool(&cfg.input)
                .map_err(|e| SourceError::Unavailable(e.to_string()))?;
            Ok(Arc::new(SqliteSource::new(
                pool,
                cfg.input.display().to_string(),
            )))
        }
    }
}

/// Baseline store described by configuration.
pub fn open_store(cfg: &StoreConfig) -> Result<Arc<dyn TableStore>, StoreError> {
    match cfg.kind {
        StoreKind::Json => Ok(Arc::new(JsonFileStore::new(&cfg.path))),
        StoreKind::Sqlite => {
            let pool = storage::open_pool(&cfg.path)?;
            Ok(Arc::new(SqliteStore::new(pool, cfg.path.display().to_string())))
        }
    }
}
