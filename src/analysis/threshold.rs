use crate::model::StatsEntry;
use serde::{Deserialize, Serialize};

/// Where the threshold applied to a key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSource {
    /// Supplied by the caller for the whole run.
    Explicit,
    /// Derived from the key's baseline.
    Advised,
    /// No baseline exists for the key.
    Default,
}

/// Threshold chosen for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveThreshold {
    pub value: u64,
    pub source: ThresholdSource,
}

/// Suggests `ceil(mean + k * std)` over a baseline's per-grouping counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdAdvisor {
    multiplier: f64,
    conservative_floor: bool,
}

impl Default for ThresholdAdvisor {
    fn default() -> Self {
        Self {
            multiplier: 3.0,
            conservative_floor: false,
        }
    }
}

impl ThresholdAdvisor {
    pub fn new(multiplier: f64, conservative_floor: bool) -> Self {
        Self {
            multiplier: multiplier.max(0.0),
            conservative_floor,
        }
    }

    /// With the conservative floor the suggestion never drops below the
    /// worst grouping seen historically.
    pub fn advise(&self, baseline: &StatsEntry) -> u64 {
        let raw = baseline.samp_sub_count_mean + self.multiplier * baseline.samp_sub_count_std;
        let suggested = if raw.is_finite() { raw.ceil().max(0.0) as u64 } else { 0 };
        if self.conservative_floor {
            suggested.max(baseline.samp_sub_count_max)
        } else {
            suggested
        }
    }
}

/// How the detector picks a threshold for each key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdPolicy {
    /// One caller-supplied value; the advisor is never consulted.
    Explicit(u64),
    /// Advisor on the baseline entry, `default` when there is none.
    Advised {
        advisor: ThresholdAdvisor,
        default: u64,
    },
}

impl ThresholdPolicy {
    pub fn from_override(explicit: Option<u64>, advisor: ThresholdAdvisor, default: u64) -> Self {
        match explicit {
            Some(value) => ThresholdPolicy::Explicit(value),
            None => ThresholdPolicy::Advised { advisor, default },
        }
    }

    /// `floor` is the analyzer's per-index minimum and only applies to advised values.
    pub fn resolve(&self, baseline: Option<&StatsEntry>, floor: Option<u64>) -> EffectiveThreshold {
        match (self, baseline) {
            (ThresholdPolicy::Explicit(value), _) => EffectiveThreshold {
                value: *value,
                source: ThresholdSource::Explicit,
            },
            (ThresholdPolicy::Advised { advisor, .. }, Some(baseline)) => EffectiveThreshold {
                value: advisor.advise(baseline).max(floor.unwrap_or(0)),
                source: ThresholdSource::Advised,
            },
            (ThresholdPolicy::Advised { default, .. }, None) => EffectiveThreshold {
                value: *default,
                source: ThresholdSource::Default,
            },
        }
    }
}
