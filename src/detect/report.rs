//! Detection report: what a run saw and which keys peaked.

use crate::analysis::threshold::ThresholdSource;
use crate::detect::{Peak, PeakSignals};
use crate::model::{CrossStats, Window};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Flat, serializable view of one flagged key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakReport {
    pub index: String,
    pub dimensions: String,
    pub sub_count: u64,
    pub samp_count: u64,
    pub samp_sub_count_max: u64,
    pub samp_sub_count_mean: f64,
    pub samp_sub_count_std: f64,
    pub samp_sub_ratio: f64,
    pub global_samp_sub_count_max: Option<u64>,
    pub global_samp_sub_count_mean: Option<f64>,
    pub threshold: u64,
    pub threshold_source: ThresholdSource,
    pub signals: PeakSignals,
    #[serde(default, skip_serializing_if = "CrossStats::is_empty")]
    pub cross: CrossStats,
}

impl From<&Peak> for PeakReport {
    fn from(peak: &Peak) -> Self {
        Self {
            index: peak.key.index.to_string(),
            dimensions: peak.key.dimensions.to_string(),
            sub_count: peak.local.sub_count,
            samp_count: peak.local.samp_count,
            samp_sub_count_max: peak.local.samp_sub_count_max,
            samp_sub_count_mean: peak.local.samp_sub_count_mean,
            samp_sub_count_std: peak.local.samp_sub_count_std,
            samp_sub_ratio: peak.local.samp_sub_ratio(),
            global_samp_sub_count_max: peak.global.map(|g| g.samp_sub_count_max),
            global_samp_sub_count_mean: peak.global.map(|g| g.samp_sub_count_mean),
            threshold: peak.threshold.value,
            threshold_source: peak.threshold.source,
            signals: peak.signals,
            cross: peak.cross.clone(),
        }
    }
}

/// Record accounting for the local window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub fetched: usize,
    pub accepted: usize,
    pub skipped: usize,
    pub out_of_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub run_id: Uuid,
    pub analyzer: String,
    pub window: Window,
    pub generated_at: DateTime<Utc>,
    /// Whether a baseline existed when the run started.
    pub warm_start: bool,
    pub threshold_override: Option<u64>,
    pub records: RecordCounts,
    /// Local keys evaluated by the detector.
    pub evaluated: usize,
    /// Flagged keys, most severe first.
    pub peaks: Vec<PeakReport>,
}

impl Report {
    pub fn new(
        analyzer: impl Into<String>,
        window: Window,
        warm_start: bool,
        threshold_override: Option<u64>,
        records: RecordCounts,
        evaluated: &[Peak],
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            analyzer: analyzer.into(),
            window,
            generated_at: Utc::now(),
            warm_start,
            threshold_override,
            records,
            evaluated: evaluated.len(),
            peaks: evaluated
                .iter()
                .filter(|p| p.is_peak())
                .map(PeakReport::from)
                .collect(),
        }
    }

    /// Writes the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Human-readable table of peaks.
    pub fn render_text(&self) -> String {
        let mut out = format!(
            "Run {} ({}) window {}\n\
             records: {} fetched, {} accepted, {} skipped, {} out of window\n",
            self.run_id,
            self.analyzer,
            self.window,
            self.records.fetched,
            self.records.accepted,
            self.records.skipped,
            self.records.out_of_window,
        );
        if !self.warm_start {
            out.push_str("no baseline: cold start\n");
        }
        if self.peaks.is_empty() {
            out.push_str(&format!("No peaks among {} keys.\n", self.evaluated));
            return out;
        }

        out.push_str(&format!(
            "{} peak{} among {} keys:\n",
            self.peaks.len(),
            if self.peaks.len() == 1 { "" } else { "s" },
            self.evaluated
        ));
        out.push_str(&format!(
            "{:<14} | {:<28} | {:>8} | {:>8} | {:>6} | {:>10} | {:>9}\n",
            "Index", "Dimensions", "Subs", "Max", "Ratio", "Global max", "Threshold"
        ));
        out.push_str(&format!("{}\n", "-".repeat(100)));
        for p in &self.peaks {
            out.push_str(&format!(
                "{:<14} | {:<28} | {:>8} | {:>8} | {:>6.2} | {:>10} | {:>9}\n",
                p.index,
                p.dimensions,
                p.sub_count,
                p.samp_sub_count_max,
                p.samp_sub_ratio,
                p.global_samp_sub_count_max
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                p.threshold,
            ));
        }
        out
    }
}
