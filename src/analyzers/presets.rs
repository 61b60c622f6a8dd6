//! Built-in analyzer schemas.

use super::{FieldSchema, Grouping};
use std::collections::BTreeMap;

/// Peaks of file types per verdict severity, counting distinct file hashes.
pub fn file_type() -> FieldSchema {
    FieldSchema {
        timestamp: "utc_timestamp".to_string(),
        index: vec!["task.severity".to_string()],
        dimensions: vec!["file.llfile_type".to_string()],
        sub_item: "file.sha1".to_string(),
        grouping: Grouping::Day,
        cross: vec!["source.user_id".to_string(), "source.origin".to_string()],
        global_window_days: None,
        thresholds: BTreeMap::from([
            ("malicious".to_string(), 90),
            ("benign".to_string(), 500),
        ]),
    }
}

/// Peaks of network threats per impact level, counting distinct events.
pub fn network() -> FieldSchema {
    FieldSchema {
        timestamp: "utc_timestamp".to_string(),
        index: vec!["event.impact".to_string()],
        dimensions: vec!["threat.name.keyword".to_string()],
        sub_item: "event.id".to_string(),
        grouping: Grouping::Day,
        cross: vec!["source.user_id".to_string()],
        global_window_days: Some(3),
        thresholds: BTreeMap::new(),
    }
}

pub fn all() -> Vec<(&'static str, FieldSchema)> {
    vec![("file-type", file_type()), ("network", network())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::{Analyzer, FieldAnalyzer};

    #[test]
    fn test_presets_are_valid() {
        for (name, schema) in all() {
            let analyzer = FieldAnalyzer::new(name, schema).unwrap();
            assert_eq!(analyzer.name(), name);
        }
    }

    #[test]
    fn test_network_relaxes_global_window() {
        let analyzer = FieldAnalyzer::new("network", network()).unwrap();
        assert_eq!(analyzer.global_window(), Some(chrono::Duration::days(3)));
    }
}
