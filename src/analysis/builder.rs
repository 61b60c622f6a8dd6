use crate::analysis::stats::Aggregate;
use crate::analyzers::Analyzer;
use crate::model::{
    CrossStats, GroupingKey, LocalEntry, LocalTable, RawRecord, Record, StatsEntry, StatsKey,
    SubItem, Window,
};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Result of building a local table, with accounting for excluded records.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalBuild {
    pub table: LocalTable,
    /// Records aggregated into the table.
    pub accepted: usize,
    /// Records the analyzer could not classify.
    pub skipped: usize,
    /// Classified records whose timestamp falls outside the window.
    pub out_of_window: usize,
}

#[derive(Default)]
struct Bucket {
    sub_items: HashSet<SubItem>,
    samp_count: u64,
    per_grouping: HashMap<GroupingKey, HashSet<SubItem>>,
    cross: CrossStats,
}

impl Bucket {
    fn add(&mut self, record: &Record, grouping: GroupingKey, cross_fields: &[String]) {
        self.samp_count += 1;
        self.sub_items.insert(record.sub_item.clone());
        self.per_grouping
            .entry(grouping)
            .or_default()
            .insert(record.sub_item.clone());
        for field in cross_fields {
            if let Some(value) = record.attributes.get(field) {
                *self
                    .cross
                    .entry(field.clone())
                    .or_default()
                    .entry(value.clone())
                    .or_default() += 1;
            }
        }
    }

    fn finish(self) -> LocalEntry {
        let mut counts: Vec<u64> = self
            .per_grouping
            .values()
            .map(|items| items.len() as u64)
            .collect();
        // Sorted so float accumulation does not depend on hash order.
        counts.sort_unstable();
        LocalEntry {
            stats: StatsEntry::new(
                self.sub_items.len() as u64,
                self.samp_count,
                Aggregate::from_counts(&counts),
            ),
            cross: self.cross,
        }
    }
}

/// Builds a local statistics table from records observed in one window.
pub struct TableBuilder<'a> {
    analyzer: &'a dyn Analyzer,
    window: Window,
}

impl<'a> TableBuilder<'a> {
    pub fn new(analyzer: &'a dyn Analyzer, window: Window) -> Self {
        Self { analyzer, window }
    }

    /// Classifies raw records first; unclassifiable ones are counted, not fatal.
    pub fn build_from_raw<'r, I>(&self, raws: I) -> LocalBuild
    where
        I: IntoIterator<Item = &'r RawRecord>,
    {
        let mut skipped = 0;
        let mut records = Vec::new();
        for raw in raws {
            match self.analyzer.classify(raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    debug!(analyzer = %self.analyzer.name(), error = %e, "skipping record");
                    skipped += 1;
                }
            }
        }
        let mut build = self.build(&records);
        build.skipped = skipped;
        build
    }

    /// Aggregates classified records per (index, dimensions).
    pub fn build<'r, I>(&self, records: I) -> LocalBuild
    where
        I: IntoIterator<Item = &'r Record>,
    {
        let cross_fields = self.analyzer.cross_dimensions();
        let mut buckets: HashMap<StatsKey, Bucket> = HashMap::new();
        let mut accepted = 0;
        let mut out_of_window = 0;

        for record in records {
            if !self.window.contains(record.timestamp) {
                out_of_window += 1;
                continue;
            }
            let key = StatsKey::new(record.index.clone(), record.dimensions.clone());
            let grouping = self.analyzer.sample_grouping_key(record);
            buckets
                .entry(key)
                .or_default()
                .add(record, grouping, cross_fields);
            accepted += 1;
        }

        let mut table = LocalTable::new(self.window);
        for (key, bucket) in buckets {
            table.insert(key, bucket.finish());
        }

        LocalBuild {
            table,
            accepted,
            skipped: 0,
            out_of_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::{FieldAnalyzer, FieldSchema, Grouping};
    use crate::model::{Dimensions, Index};
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use serde_json::json;

    fn analyzer() -> FieldAnalyzer {
        FieldAnalyzer::new(
            "test",
            FieldSchema {
                index: vec!["sev".into()],
                dimensions: vec!["type".into()],
                sub_item: "sha1".into(),
                grouping: Grouping::Day,
                cross: vec!["user".into()],
                ..FieldSchema::default()
            },
        )
        .unwrap()
    }

    fn window() -> Window {
        Window::from_dates(
            NaiveDate::from_ymd_opt(2020, 7, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 7, 4).unwrap(),
        )
        .unwrap()
    }

    fn raw(day: u32, sha1: &str, user: &str) -> RawRecord {
        let ts = Utc.with_ymd_and_hms(2020, 7, day, 10, 0, 0).unwrap();
        RawRecord::from(json!({
            "utc_timestamp": ts.timestamp_millis(),
            "sev": "malicious",
            "type": "PeExeFile",
            "sha1": sha1,
            "user": user,
        }))
    }

    fn key() -> StatsKey {
        StatsKey::new(Index::new(["malicious"]), Dimensions::One("PeExeFile".into()))
    }

    #[test]
    fn test_builds_distinct_and_sample_counts() {
        // day 1: s1, s1, s2 -> 2 distinct; day 2: s3 -> 1 distinct
        let raws = vec![
            raw(1, "s1", "u1"),
            raw(1, "s1", "u1"),
            raw(1, "s2", "u2"),
            raw(2, "s3", "u1"),
        ];
        let a = analyzer();
        let build = TableBuilder::new(&a, window()).build_from_raw(&raws);
        assert_eq!(build.accepted, 4);
        assert_eq!(build.skipped, 0);

        let entry = build.table.get(&key()).unwrap();
        assert_eq!(entry.stats.sub_count, 3);
        assert_eq!(entry.stats.samp_count, 4);
        assert_eq!(entry.stats.groupings, 2);
        assert_eq!(entry.stats.samp_sub_count_max, 2);
        assert!((entry.stats.samp_sub_count_mean - 1.5).abs() < 1e-12);
        assert!((entry.stats.samp_sub_count_std - 0.5).abs() < 1e-12);
        assert!((entry.stats.samp_sub_ratio() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(entry.cross["user"]["u1"], 3);
        assert_eq!(entry.cross["user"]["u2"], 1);
    }

    #[test]
    fn test_empty_input_is_empty_table() {
        let a = analyzer();
        let build = TableBuilder::new(&a, window()).build_from_raw(&[]);
        assert!(build.table.is_empty());
        assert_eq!(build.accepted, 0);
    }

    #[test]
    fn test_skips_unclassifiable_and_out_of_window() {
        let mut broken = raw(1, "s1", "u1").into_fields();
        broken.remove("sev");
        let late = {
            let ts = window().end + Duration::hours(1);
            let mut f = raw(1, "s9", "u1").into_fields();
            f.insert("utc_timestamp".into(), json!(ts.timestamp_millis()));
            RawRecord::new(f)
        };
        let raws = vec![raw(1, "s1", "u1"), RawRecord::new(broken), late];
        let a = analyzer();
        let build = TableBuilder::new(&a, window()).build_from_raw(&raws);
        assert_eq!(build.accepted, 1);
        assert_eq!(build.skipped, 1);
        assert_eq!(build.out_of_window, 1);
        assert_eq!(build.table.get(&key()).unwrap().stats.samp_count, 1);
    }
}
