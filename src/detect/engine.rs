use crate::analysis::threshold::ThresholdPolicy;
use crate::analyzers::Analyzer;
use crate::detect::{Peak, PeakSignals, Verdict};
use crate::model::{GlobalTable, LocalTable, StatsEntry};
use std::cmp::Ordering;

const DOMINANT_RATIO: f64 = 0.5;
const BASELINE_MAX_WEIGHT: f64 = 0.8;

/// Classifies every local key as a peak or not.
pub struct PeakDetector {
    policy: ThresholdPolicy,
    min_local_sub_count: u64,
}

impl PeakDetector {
    pub fn new(policy: ThresholdPolicy) -> Self {
        Self {
            policy,
            min_local_sub_count: 0,
        }
    }

    /// Local entries with fewer distinct sub-items are never flagged.
    pub fn with_min_local_sub_count(mut self, min: u64) -> Self {
        self.min_local_sub_count = min;
        self
    }

    pub fn policy(&self) -> &ThresholdPolicy {
        &self.policy
    }

    /// Evaluates each local key, ranked by descending `samp_sub_count_max`
    /// then by key.
    pub fn detect(
        &self,
        local: &LocalTable,
        global: Option<&GlobalTable>,
        analyzer: &dyn Analyzer,
    ) -> Vec<Peak> {
        let mut evaluated: Vec<Peak> = local
            .iter()
            .map(|(key, entry)| {
                let baseline = global.and_then(|g| g.get(key)).map(|g| g.stats);
                let threshold = self
                    .policy
                    .resolve(baseline.as_ref(), analyzer.index_threshold(&key.index));
                let flagged = entry.stats.samp_sub_count_max > threshold.value
                    && entry.stats.sub_count >= self.min_local_sub_count;
                Peak {
                    key: key.clone(),
                    local: entry.stats,
                    cross: entry.cross.clone(),
                    global: baseline,
                    threshold,
                    verdict: if flagged { Verdict::Peak } else { Verdict::Normal },
                    signals: signals(&entry.stats, baseline.as_ref()),
                }
            })
            .collect();

        evaluated.sort_by(|a, b| match b.local.samp_sub_count_max.cmp(&a.local.samp_sub_count_max) {
            Ordering::Equal => a.key.cmp(&b.key),
            other => other,
        });
        evaluated
    }
}

fn signals(local: &StatsEntry, baseline: Option<&StatsEntry>) -> PeakSignals {
    PeakSignals {
        dominant_sub_item: local.samp_sub_ratio() > DOMINANT_RATIO,
        grouping_spike: local.samp_sub_count_max as f64
            > local.samp_sub_count_mean + local.samp_sub_count_std,
        above_baseline: baseline.is_some_and(|b| {
            local.samp_sub_count_mean > BASELINE_MAX_WEIGHT * b.samp_sub_count_max as f64
        }),
    }
}
