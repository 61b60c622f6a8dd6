use crate::model::RawRecord;
use crate::source::{non_empty, RecordQuery, RecordSource, SourceError};

/// Records held in memory. Used by tests and by callers that already have a batch.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Vec<RawRecord>,
}

impl MemorySource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records }
    }
}

impl RecordSource for MemorySource {
    fn describe(&self) -> String {
        format!("memory ({} records)", self.records.len())
    }

    fn fetch(&self, query: &RecordQuery<'_>) -> Result<Vec<RawRecord>, SourceError> {
        let records = self
            .records
            .iter()
            .filter(|r| query.admits(r))
            .cloned()
            .collect();
        non_empty(records, query.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Window;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_fetch_filters_by_window() {
        let window = Window::from_dates(
            NaiveDate::from_ymd_opt(2020, 7, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 7, 2).unwrap(),
        )
        .unwrap();
        let source = MemorySource::new(vec![
            RawRecord::from(json!({"utc_timestamp": "2020-07-01T01:00:00Z"})),
            RawRecord::from(json!({"utc_timestamp": "2020-07-03T01:00:00Z"})),
        ]);
        let query = RecordQuery::new(window, "utc_timestamp");
        assert_eq!(source.fetch(&query).unwrap().len(), 1);

        let later = Window::from_dates(
            NaiveDate::from_ymd_opt(2020, 8, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 8, 2).unwrap(),
        )
        .unwrap();
        let err = source.fetch(&RecordQuery::new(later, "utc_timestamp")).unwrap_err();
        assert!(matches!(err, SourceError::Empty { .. }));
    }
}
