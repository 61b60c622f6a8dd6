//! Folding local tables into the rolling global baseline.
//!
//! Distinct sub-item counts are summed across windows. Because a key only
//! absorbs windows that start at or after its previous end, windows are
//! disjoint in time, but the same sub-item seen in two windows is still
//! counted twice: `sub_count` in a global table is an over-approximation of
//! distinct sub-items over the whole global window.
//!
//! Every global entry keeps the per-window contributions it absorbed. Retiring
//! a contribution subtracts it with the inverse of the parallel formula, and
//! `samp_sub_count_max` is recomputed from the contributions that remain.

use crate::model::{
    Contribution, GlobalEntry, GlobalTable, LocalTable, StatsEntry, StatsKey, Window,
};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

/// What a merge or retirement pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MergeSummary {
    /// Keys present on both sides and combined.
    pub merged: usize,
    /// Keys seen for the first time.
    pub inserted: usize,
    /// Keys left untouched because their baseline already covers the local window.
    pub overlapping: usize,
    /// Per-window contributions removed by retirement.
    pub retired: usize,
    /// Keys removed because nothing contributes to them any more.
    pub dropped: usize,
}

pub struct WindowMerger {
    global_window: Duration,
}

impl WindowMerger {
    pub fn new(global_window: Duration) -> Self {
        Self { global_window }
    }

    pub fn global_window(&self) -> Duration {
        self.global_window
    }

    /// Merge, then retire everything that ended more than the global window
    /// before the latest of the merged and local ends.
    ///
    /// A global window reaching before the earliest representable time
    /// retires nothing.
    pub fn fold(
        &self,
        global: Option<GlobalTable>,
        local: &LocalTable,
    ) -> (GlobalTable, MergeSummary) {
        let (merged, mut summary) = self.merge(global, local);
        let latest = merged.window.end.max(local.window.end);
        let (retired, retire_summary) = match latest.checked_sub_signed(self.global_window) {
            Some(cutoff) => self.retire(merged, cutoff),
            None => {
                debug!(global_window_days = self.global_window.num_days(), "cutoff out of range");
                (merged, MergeSummary::default())
            }
        };
        summary.retired = retire_summary.retired;
        summary.dropped = retire_summary.dropped;
        (retired, summary)
    }

    /// Union of the global table and one local window.
    ///
    /// With no prior global table the result mirrors the local table.
    pub fn merge(
        &self,
        global: Option<GlobalTable>,
        local: &LocalTable,
    ) -> (GlobalTable, MergeSummary) {
        let mut summary = MergeSummary::default();
        let mut global = match global {
            Some(g) => g,
            None => GlobalTable::new(local.window),
        };
        if local.is_empty() {
            return (global, summary);
        }

        let mut absorbed = false;
        for (key, entry) in local.iter() {
            match global.get(key).cloned() {
                Some(existing) => {
                    if existing.last_end().is_some_and(|end| end > local.window.start) {
                        warn!(
                            %key,
                            window = %local.window,
                            "baseline already covers window, skipping"
                        );
                        summary.overlapping += 1;
                        continue;
                    }
                    global.insert(key.clone(), absorb(existing, local.window, entry.stats));
                    summary.merged += 1;
                }
                None => {
                    let fresh = GlobalEntry::from_local(local.window, entry.stats);
                    global.insert(key.clone(), fresh);
                    summary.inserted += 1;
                }
            }
            absorbed = true;
        }

        if absorbed {
            global.window = global.window.span(&local.window);
        }
        debug!(?summary, "merged local table");
        (global, summary)
    }

    /// Drops every contribution whose window ended at or before `before`.
    pub fn retire(
        &self,
        mut global: GlobalTable,
        before: DateTime<Utc>,
    ) -> (GlobalTable, MergeSummary) {
        let mut summary = MergeSummary::default();
        let keys: Vec<StatsKey> = global.keys().cloned().collect();

        for key in keys {
            let Some(entry) = global.remove(&key) else {
                continue;
            };
            let (expired, kept): (Vec<Contribution>, Vec<Contribution>) = entry
                .contributions
                .iter()
                .cloned()
                .partition(|c| c.window.end <= before);

            if expired.is_empty() {
                global.insert(key, entry);
                continue;
            }
            summary.retired += expired.len();
            if kept.is_empty() {
                summary.dropped += 1;
                continue;
            }

            let mut stats = expired
                .iter()
                .fold(entry.stats, |acc, c| acc.subtract(&c.stats));
            stats.samp_sub_count_max = kept
                .iter()
                .map(|c| c.stats.samp_sub_count_max)
                .max()
                .unwrap_or(0);
            global.insert(
                key,
                GlobalEntry {
                    stats,
                    contributions: kept,
                },
            );
        }

        // A table emptied by retirement covers nothing before the cutoff.
        let start = match global.iter().filter_map(|(_, e)| e.first_start()).min() {
            Some(start) => Some(start),
            None if summary.dropped > 0 => Some(before.min(global.window.end)),
            None => None,
        };
        if let Some(start) = start {
            global.window = Window {
                start,
                end: global.window.end,
            };
        }
        if summary.retired > 0 {
            debug!(?summary, cutoff = %before, "retired expired contributions");
        }
        (global, summary)
    }
}

fn absorb(mut existing: GlobalEntry, window: Window, stats: StatsEntry) -> GlobalEntry {
    existing.stats = existing.stats.combine(&stats);
    existing.contributions.push(Contribution { window, stats });
    existing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::stats::Aggregate;
    use crate::model::{Dimensions, Index, LocalEntry};
    use chrono::NaiveDate;

    fn day(d: u32) -> Window {
        let start = NaiveDate::from_ymd_opt(2020, 7, d).unwrap();
        Window::from_dates(start, start.succ_opt().unwrap()).unwrap()
    }

    fn key(name: &str) -> StatsKey {
        StatsKey::new(Index::new(["malicious"]), Dimensions::One(name.into()))
    }

    fn entry(sub: u64, samp: u64, per_grouping: &[u64]) -> LocalEntry {
        LocalEntry {
            stats: StatsEntry::new(sub, samp, Aggregate::from_counts(per_grouping)),
            cross: Default::default(),
        }
    }

    fn local(window: Window, entries: Vec<(StatsKey, LocalEntry)>) -> LocalTable {
        let mut table = LocalTable::new(window);
        for (k, e) in entries {
            table.insert(k, e);
        }
        table
    }

    fn merger() -> WindowMerger {
        WindowMerger::new(Duration::days(7))
    }

    #[test]
    fn test_cold_start_mirrors_local() {
        let l = local(day(1), vec![(key("a"), entry(10, 12, &[4, 6]))]);
        let (g, summary) = merger().merge(None, &l);
        assert_eq!(summary.inserted, 1);
        assert_eq!(g.window, l.window);
        assert_eq!(g.get(&key("a")).unwrap().stats, l.get(&key("a")).unwrap().stats);
    }

    #[test]
    fn test_empty_local_is_identity() {
        let l1 = local(day(1), vec![(key("a"), entry(10, 12, &[4, 6]))]);
        let (g, _) = merger().merge(None, &l1);
        let (g2, summary) = merger().merge(Some(g.clone()), &LocalTable::new(day(2)));
        assert_eq!(g2, g);
        assert_eq!(summary, MergeSummary::default());
    }

    #[test]
    fn test_merge_combines_counts_and_distribution() {
        let l1 = local(day(1), vec![(key("a"), entry(6, 8, &[2, 4]))]);
        let l2 = local(
            day(2),
            vec![(key("a"), entry(6, 6, &[6])), (key("b"), entry(1, 1, &[1]))],
        );
        let (g, _) = merger().merge(None, &l1);
        let (g, summary) = merger().merge(Some(g), &l2);
        assert_eq!(summary.merged, 1);
        assert_eq!(summary.inserted, 1);

        let a = g.get(&key("a")).unwrap();
        assert_eq!(a.stats.sub_count, 12);
        assert_eq!(a.stats.samp_count, 14);
        assert_eq!(a.stats.groupings, 3);
        assert_eq!(a.stats.samp_sub_count_max, 6);
        assert!((a.stats.samp_sub_count_mean - 4.0).abs() < 1e-9);
        assert!((a.stats.samp_sub_count_std.powi(2) - 8.0 / 3.0).abs() < 1e-9);
        assert!((a.stats.samp_sub_ratio() - 0.5).abs() < 1e-12);
        assert_eq!(a.contributions.len(), 2);
        assert_eq!(g.window, day(1).span(&day(2)));
    }

    #[test]
    fn test_overlapping_window_is_not_absorbed_twice() {
        let l1 = local(day(2), vec![(key("a"), entry(6, 8, &[2, 4]))]);
        let (g, _) = merger().merge(None, &l1);
        let (g2, summary) = merger().merge(Some(g.clone()), &l1);
        assert_eq!(summary.overlapping, 1);
        assert_eq!(g2, g);
    }

    #[test]
    fn test_retire_subtracts_expired_window() {
        let l1 = local(day(1), vec![(key("a"), entry(9, 9, &[9]))]);
        let l2 = local(day(2), vec![(key("a"), entry(6, 8, &[2, 4]))]);
        let l3 = local(day(3), vec![(key("a"), entry(6, 6, &[6]))]);
        let m = merger();
        let (g, _) = m.merge(None, &l1);
        let (g, _) = m.merge(Some(g), &l2);
        let (g, _) = m.merge(Some(g), &l3);

        let (g, summary) = m.retire(g, day(1).end);
        assert_eq!(summary.retired, 1);
        let a = g.get(&key("a")).unwrap();
        assert_eq!(a.stats.sub_count, 12);
        assert_eq!(a.stats.samp_count, 14);
        assert_eq!(a.stats.groupings, 3);
        assert_eq!(a.stats.samp_sub_count_max, 6);
        assert!((a.stats.samp_sub_count_mean - 4.0).abs() < 1e-9);
        assert!((a.stats.samp_sub_count_std.powi(2) - 8.0 / 3.0).abs() < 1e-9);
        assert_eq!(g.window.start, day(2).start);
    }

    #[test]
    fn test_retire_drops_fully_expired_keys() {
        let l1 = local(day(1), vec![(key("a"), entry(9, 9, &[9]))]);
        let l2 = local(day(2), vec![(key("b"), entry(1, 1, &[1]))]);
        let m = merger();
        let (g, _) = m.merge(None, &l1);
        let (g, _) = m.merge(Some(g), &l2);
        let (g, summary) = m.retire(g, day(1).end);
        assert_eq!(summary.dropped, 1);
        assert!(g.get(&key("a")).is_none());
        assert!(g.get(&key("b")).is_some());
    }

    #[test]
    fn test_fold_keeps_global_window_length() {
        let m = WindowMerger::new(Duration::days(2));
        let mut g = None;
        for d in 1..=4 {
            let l = local(day(d), vec![(key("a"), entry(1, 1, &[1]))]);
            let (next, _) = m.fold(g, &l);
            g = Some(next);
        }
        let g = g.unwrap();
        let a = g.get(&key("a")).unwrap();
        assert_eq!(a.contributions.len(), 2);
        assert_eq!(a.stats.sub_count, 2);
        assert_eq!(g.window.start, day(3).start);
        assert_eq!(g.window.end, day(4).end);
    }

    #[test]
    fn test_retiring_every_key_resets_window() {
        let l1 = local(day(1), vec![(key("a"), entry(9, 9, &[9]))]);
        let (g, _) = merger().merge(None, &l1);
        let (g, summary) = merger().retire(g, day(1).end);
        assert_eq!(summary.dropped, 1);
        assert!(g.is_empty());
        assert_eq!(g.window.start, day(1).end);
        assert_eq!(g.window.end, day(1).end);
    }

    #[test]
    fn test_fold_with_huge_global_window_retires_nothing() {
        let m = WindowMerger::new(Duration::days(1_000_000_000));
        let (g, _) = m.fold(None, &local(day(1), vec![(key("a"), entry(1, 1, &[1]))]));
        let (g, summary) = m.fold(Some(g), &local(day(2), vec![(key("a"), entry(2, 2, &[2]))]));
        assert_eq!(summary.retired, 0);
        assert_eq!(summary.merged, 1);
        assert_eq!(g.get(&key("a")).unwrap().contributions.len(), 2);
    }
}
