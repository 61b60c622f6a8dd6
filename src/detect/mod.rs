//! Peak detection and reporting.

pub mod engine;
pub mod report;

use crate::analysis::threshold::EffectiveThreshold;
use crate::model::{CrossStats, StatsEntry, StatsKey};
use serde::{Deserialize, Serialize};

pub use engine::PeakDetector;
pub use report::{PeakReport, Report};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Peak,
    Normal,
}

/// Secondary observations about a local entry. Informational only; the
/// verdict is decided by the threshold alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakSignals {
    /// One grouping holds more than half of all distinct sub-items.
    pub dominant_sub_item: bool,
    /// The busiest grouping is more than one standard deviation above the mean.
    pub grouping_spike: bool,
    /// The local mean exceeds 80% of the historical maximum.
    pub above_baseline: bool,
}

/// Evaluation of one local key against its baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct Peak {
    pub key: StatsKey,
    pub local: StatsEntry,
    pub cross: CrossStats,
    /// Baseline entry, absent on cold start or for new keys.
    pub global: Option<StatsEntry>,
    pub threshold: EffectiveThreshold,
    pub verdict: Verdict,
    pub signals: PeakSignals,
}

impl Peak {
    pub fn is_peak(&self) -> bool {
        self.verdict == Verdict::Peak
    }
}
