//! Statistics tables: per (index, dimensions) summaries of sub-item counts.

use crate::analysis::stats::Aggregate;
use crate::model::record::{Dimensions, Index};
use crate::model::window::Window;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Aggregation key of a statistics table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatsKey {
    pub index: Index,
    pub dimensions: Dimensions,
}

impl StatsKey {
    pub fn new(index: Index, dimensions: Dimensions) -> Self {
        Self { index, dimensions }
    }
}

impl fmt::Display for StatsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} :: {}", self.index, self.dimensions)
    }
}

/// Counts and the distribution of distinct sub-items per sample grouping.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatsEntry {
    /// Distinct sub-items.
    pub sub_count: u64,
    /// Total observations.
    pub samp_count: u64,
    /// Number of sample groupings behind the distribution fields.
    pub groupings: u64,
    pub samp_sub_count_max: u64,
    pub samp_sub_count_mean: f64,
    pub samp_sub_count_std: f64,
}

impl StatsEntry {
    pub fn new(sub_count: u64, samp_count: u64, distribution: Aggregate) -> Self {
        Self {
            sub_count,
            samp_count,
            groupings: distribution.n,
            samp_sub_count_max: distribution.max,
            samp_sub_count_mean: distribution.mean,
            samp_sub_count_std: distribution.std_dev(),
        }
    }

    pub fn distribution(&self) -> Aggregate {
        Aggregate::from_parts(
            self.groupings,
            self.samp_sub_count_mean,
            self.samp_sub_count_std,
            self.samp_sub_count_max,
        )
    }

    /// `samp_sub_count_max / sub_count`, zero when there are no sub-items.
    /// Always derived, never stored.
    pub fn samp_sub_ratio(&self) -> f64 {
        if self.sub_count == 0 {
            return 0.0;
        }
        self.samp_sub_count_max as f64 / self.sub_count as f64
    }

    /// Counts add; the distribution is pooled.
    pub fn combine(&self, other: &StatsEntry) -> StatsEntry {
        StatsEntry::new(
            self.sub_count + other.sub_count,
            self.samp_count + other.samp_count,
            self.distribution().combine(&other.distribution()),
        )
    }

    /// Removes a contribution previously combined into `self`. The returned
    /// max is stale; see [`Aggregate::subtract`].
    pub fn subtract(&self, part: &StatsEntry) -> StatsEntry {
        StatsEntry::new(
            self.sub_count.saturating_sub(part.sub_count),
            self.samp_count.saturating_sub(part.samp_count),
            self.distribution().subtract(&part.distribution()),
        )
    }

    /// Checks the structural invariants of an entry, returning a reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.samp_count < self.sub_count {
            return Err(format!(
                "samp_count {} is below sub_count {}",
                self.samp_count, self.sub_count
            ));
        }
        if !self.samp_sub_count_mean.is_finite() || self.samp_sub_count_mean < 0.0 {
            return Err(format!("invalid mean {}", self.samp_sub_count_mean));
        }
        if !self.samp_sub_count_std.is_finite() || self.samp_sub_count_std < 0.0 {
            return Err(format!("invalid std {}", self.samp_sub_count_std));
        }
        if self.samp_sub_count_max > self.sub_count {
            return Err(format!(
                "samp_sub_count_max {} exceeds sub_count {}",
                self.samp_sub_count_max, self.sub_count
            ));
        }
        Ok(())
    }
}

/// Observations per value of each cross attribute, e.g. `source.user_id -> {u1: 5}`.
pub type CrossStats = BTreeMap<String, BTreeMap<String, u64>>;

/// Entry of a local table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalEntry {
    pub stats: StatsEntry,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cross: CrossStats,
}

/// One absorbed local window, kept so it can be retired later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub window: Window,
    pub stats: StatsEntry,
}

/// Entry of a global table: the running aggregate and its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEntry {
    pub stats: StatsEntry,
    pub contributions: Vec<Contribution>,
}

impl GlobalEntry {
    pub fn from_local(window: Window, stats: StatsEntry) -> Self {
        Self {
            stats,
            contributions: vec![Contribution { window, stats }],
        }
    }

    /// End of the most recent absorbed window.
    pub fn last_end(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.contributions.iter().map(|c| c.window.end).max()
    }

    /// Earliest timestamp still contributing to the aggregate.
    pub fn first_start(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.contributions.iter().map(|c| c.window.start).min()
    }
}

/// Access to the statistics of any table entry.
pub trait TableEntry {
    fn stats(&self) -> &StatsEntry;
}

impl TableEntry for LocalEntry {
    fn stats(&self) -> &StatsEntry {
        &self.stats
    }
}

impl TableEntry for GlobalEntry {
    fn stats(&self) -> &StatsEntry {
        &self.stats
    }
}

/// Mapping from [`StatsKey`] to entries, tagged with the time range it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "E: Serialize", deserialize = "E: Deserialize<'de>"))]
pub struct StatsTable<E> {
    pub window: Window,
    #[serde(with = "entries_as_list")]
    entries: BTreeMap<StatsKey, E>,
}

pub type LocalTable = StatsTable<LocalEntry>;
pub type GlobalTable = StatsTable<GlobalEntry>;

impl<E> StatsTable<E> {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &StatsKey) -> Option<&E> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: StatsKey, entry: E) -> Option<E> {
        self.entries.insert(key, entry)
    }

    pub fn remove(&mut self, key: &StatsKey) -> Option<E> {
        self.entries.remove(key)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&StatsKey, &E)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &StatsKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E: TableEntry> StatsTable<E> {
    /// First invariant violation in the table, if any.
    pub fn validate(&self) -> Result<(), String> {
        for (key, entry) in &self.entries {
            entry
                .stats()
                .validate()
                .map_err(|reason| format!("{}: {}", key, reason))?;
        }
        Ok(())
    }
}

impl<E> IntoIterator for StatsTable<E> {
    type Item = (StatsKey, E);
    type IntoIter = std::collections::btree_map::IntoIter<StatsKey, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// JSON object keys must be strings, so entries travel as `[{key, entry}]`.
mod entries_as_list {
    use super::StatsKey;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct KeyedRef<'a, E> {
        key: &'a StatsKey,
        entry: &'a E,
    }

    #[derive(Deserialize)]
    struct Keyed<E> {
        key: StatsKey,
        entry: E,
    }

    pub fn serialize<S, E>(map: &BTreeMap<StatsKey, E>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        E: Serialize,
    {
        serializer.collect_seq(map.iter().map(|(key, entry)| KeyedRef { key, entry }))
    }

    pub fn deserialize<'de, D, E>(deserializer: D) -> Result<BTreeMap<StatsKey, E>, D::Error>
    where
        D: Deserializer<'de>,
        E: Deserialize<'de>,
    {
        let list: Vec<Keyed<E>> = Vec::deserialize(deserializer)?;
        let expected = list.len();
        let map: BTreeMap<_, _> = list.into_iter().map(|k| (k.key, k.entry)).collect();
        if map.len() != expected {
            return Err(D::Error::custom("duplicate statistics key"));
        }
        Ok(map)
    }
}
