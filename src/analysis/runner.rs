//! One analysis run: load the baseline, build the local table, detect, merge.
//!
//! Everything before [`Runner::persist`] happens in memory. A run that fails
//! at any stage leaves the stored baseline as it was.

use crate::analysis::builder::{LocalBuild, TableBuilder};
use crate::analysis::merger::{MergeSummary, WindowMerger};
use crate::analysis::threshold::{ThresholdAdvisor, ThresholdPolicy};
use crate::analyzers::{Analyzer, AnalyzerError};
use crate::config::AnalysisConfig;
use crate::detect::report::RecordCounts;
use crate::detect::{PeakDetector, Report};
use crate::model::{GlobalTable, RawRecord, Window, WindowError};
use crate::source::{RecordFilter, RecordQuery, RecordSource, SourceError};
use crate::storage::{StoreError, TableStore};
use chrono::Duration;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("record source failed: {0}")]
    Source(#[from] SourceError),

    #[error("baseline could not be loaded: {0}")]
    Store(#[from] StoreError),

    #[error("run timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// Detection finished but the baseline was not advanced. The report is
    /// still valid.
    #[error("baseline not persisted: {source}")]
    Persist {
        #[source]
        source: StoreError,
        report: Box<Report>,
    },

    #[error("run task failed: {0}")]
    Task(String),
}

/// Stages of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    ColdStart,
    WarmStart,
    LocalBuild,
    Detect,
    Merge,
    Persist,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::ColdStart => "COLD_START",
            RunStage::WarmStart => "WARM_START",
            RunStage::LocalBuild => "LOCAL_BUILD",
            RunStage::Detect => "DETECT",
            RunStage::Merge => "MERGE",
            RunStage::Persist => "PERSIST",
        };
        f.write_str(name)
    }
}

/// Knobs of a run, usually taken from [`AnalysisConfig`] and CLI flags.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Explicit threshold; disables the advisor for the whole run.
    pub threshold: Option<u64>,
    pub advisor: ThresholdAdvisor,
    pub default_threshold: u64,
    pub min_local_sub_count: u64,
    /// Used when the analyzer does not declare its own.
    pub global_window: Duration,
    pub bootstrap: bool,
    pub filter: Option<RecordFilter>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

impl RunOptions {
    pub fn from_config(cfg: &AnalysisConfig) -> Self {
        Self {
            threshold: None,
            advisor: ThresholdAdvisor::new(cfg.threshold_multiplier, cfg.conservative_floor),
            default_threshold: cfg.default_threshold,
            min_local_sub_count: cfg.min_local_sub_count,
            global_window: Duration::days(i64::from(cfg.global_window_days)),
            bootstrap: cfg.bootstrap,
            filter: None,
        }
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: Report,
    /// Baseline after folding in this run's window, ready to persist.
    pub baseline: GlobalTable,
    pub merge: MergeSummary,
    /// History slices folded in by a cold-start bootstrap.
    pub bootstrapped: usize,
}

#[derive(Clone)]
pub struct Runner {
    analyzer: Arc<dyn Analyzer>,
    source: Arc<dyn RecordSource>,
    store: Arc<dyn TableStore>,
    options: RunOptions,
}

impl Runner {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        source: Arc<dyn RecordSource>,
        store: Arc<dyn TableStore>,
        options: RunOptions,
    ) -> Self {
        Self {
            analyzer,
            source,
            store,
            options,
        }
    }

    pub fn analyzer(&self) -> &dyn Analyzer {
        self.analyzer.as_ref()
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn global_window(&self) -> Duration {
        self.analyzer
            .global_window()
            .unwrap_or(self.options.global_window)
    }

    /// Runs every in-memory stage for `window`. Nothing is persisted.
    pub fn run(&self, window: Window) -> Result<RunOutcome, RunError> {
        let name = self.analyzer.name().to_string();
        let merger = WindowMerger::new(self.global_window());

        let (mut baseline, warm_start) = match self.store.load(&name) {
            Ok(table) => {
                info!(
                    stage = %RunStage::WarmStart,
                    analyzer = %name,
                    keys = table.len(),
                    baseline = %table.window,
                    "baseline loaded"
                );
                (Some(table), true)
            }
            Err(e) if e.is_not_found() => {
                info!(
                    stage = %RunStage::ColdStart,
                    analyzer = %name,
                    location = %self.store.location(),
                    "no baseline"
                );
                (None, false)
            }
            Err(e) => return Err(RunError::Store(e)),
        };

        let mut bootstrapped = 0;
        if baseline.is_none() && self.options.bootstrap {
            let (table, slices) = self.bootstrap(&merger, window)?;
            bootstrapped = slices;
            baseline = table;
        }

        let (build, fetched) = self.build_local(window)?;
        info!(
            stage = %RunStage::LocalBuild,
            analyzer = %name,
            window = %window,
            fetched,
            accepted = build.accepted,
            keys = build.table.len(),
            "local table built"
        );
        if build.skipped > 0 {
            warn!(analyzer = %name, skipped = build.skipped, "records could not be classified");
        }

        let detector = PeakDetector::new(ThresholdPolicy::from_override(
            self.options.threshold,
            self.options.advisor,
            self.options.default_threshold,
        ))
        .with_min_local_sub_count(self.options.min_local_sub_count);
        let evaluated = detector.detect(&build.table, baseline.as_ref(), self.analyzer.as_ref());
        let report = Report::new(
            name.clone(),
            window,
            warm_start,
            self.options.threshold,
            RecordCounts {
                fetched,
                accepted: build.accepted,
                skipped: build.skipped,
                out_of_window: build.out_of_window,
            },
            &evaluated,
        );
        info!(
            stage = %RunStage::Detect,
            analyzer = %name,
            evaluated = report.evaluated,
            peaks = report.peaks.len(),
            "detection done"
        );

        let (baseline, merge) = merger.fold(baseline, &build.table);
        info!(
            stage = %RunStage::Merge,
            analyzer = %name,
            merged = merge.merged,
            inserted = merge.inserted,
            overlapping = merge.overlapping,
            retired = merge.retired,
            dropped = merge.dropped,
            "baseline updated"
        );

        Ok(RunOutcome {
            report,
            baseline,
            merge,
            bootstrapped,
        })
    }

    /// Saves the run's baseline.
    pub fn persist(&self, outcome: &RunOutcome) -> Result<(), RunError> {
        let name = self.analyzer.name();
        self.store
            .save(name, &outcome.baseline)
            .map_err(|source| RunError::Persist {
                source,
                report: Box::new(outcome.report.clone()),
            })?;
        info!(
            stage = %RunStage::Persist,
            analyzer = %name,
            location = %self.store.location(),
            keys = outcome.baseline.len(),
            "baseline saved"
        );
        Ok(())
    }

    /// [`Runner::run`] followed by [`Runner::persist`].
    pub fn execute(&self, window: Window) -> Result<RunOutcome, RunError> {
        let outcome = self.run(window)?;
        self.persist(&outcome)?;
        Ok(outcome)
    }

    fn fetch(&self, window: Window) -> Result<Vec<RawRecord>, RunError> {
        let query = RecordQuery::new(window, self.analyzer.timestamp_field())
            .with_filter(self.options.filter.as_ref());
        match self.source.fetch(&query) {
            Ok(records) => Ok(records),
            Err(SourceError::Empty { .. }) => {
                debug!(source = %self.source.describe(), window = %window, "no records");
                Ok(Vec::new())
            }
            Err(e) => Err(RunError::Source(e)),
        }
    }

    fn build_local(&self, window: Window) -> Result<(LocalBuild, usize), RunError> {
        let records = self.fetch(window)?;
        let build = TableBuilder::new(self.analyzer.as_ref(), window).build_from_raw(&records);
        Ok((build, records.len()))
    }

    /// Folds `[start - global_window, start)` in slices of the local window
    /// length. Returns `None` when history holds nothing.
    fn bootstrap(
        &self,
        merger: &WindowMerger,
        window: Window,
    ) -> Result<(Option<GlobalTable>, usize), RunError> {
        let step = window.length();
        let history = merger.global_window();
        let mut cursor = window
            .start
            .checked_sub_signed(history)
            .ok_or(WindowError::OutOfRange {
                days: history.num_days(),
            })?;
        let mut table: Option<GlobalTable> = None;
        let mut slices = 0;

        while cursor < window.start {
            let end = (cursor + step).min(window.start);
            let slice = Window::new(cursor, end)?;
            let (build, _) = self.build_local(slice)?;
            if !build.table.is_empty() {
                let (next, _) = merger.fold(table, &build.table);
                table = Some(next);
                slices += 1;
            }
            cursor = end;
        }

        info!(
            analyzer = %self.analyzer.name(),
            slices,
            keys = table.as_ref().map_or(0, |t| t.len()),
            "bootstrapped baseline from history"
        );
        Ok((table, slices))
    }
}
