use super::{Analyzer, AnalyzerError, ClassifyError};
use crate::model::{Dimensions, GroupingKey, Index, RawRecord, Record, SubItem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest accepted global window, in days.
pub const MAX_GLOBAL_WINDOW_DAYS: u32 = 36_500;

/// How observations are bucketed before counting distinct sub-items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// Calendar day (UTC) of the observation.
    Day,
    /// Calendar hour (UTC) of the observation.
    Hour,
    /// The record's index.
    Index,
    /// Value of a named attribute.
    Attribute(String),
}

/// Declarative description of an analyzer, as found in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSchema {
    pub timestamp: String,
    pub index: Vec<String>,
    pub dimensions: Vec<String>,
    pub sub_item: String,
    pub grouping: Grouping,
    pub cross: Vec<String>,
    pub global_window_days: Option<u32>,
    /// Threshold floor per leading index value.
    pub thresholds: BTreeMap<String, u64>,
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self {
            timestamp: "utc_timestamp".to_string(),
            index: Vec::new(),
            dimensions: Vec::new(),
            sub_item: String::new(),
            grouping: Grouping::Day,
            cross: Vec::new(),
            global_window_days: None,
            thresholds: BTreeMap::new(),
        }
    }
}

/// Analyzer driven entirely by a [`FieldSchema`].
#[derive(Debug, Clone)]
pub struct FieldAnalyzer {
    name: String,
    schema: FieldSchema,
}

impl FieldAnalyzer {
    pub fn new(name: impl Into<String>, schema: FieldSchema) -> Result<Self, AnalyzerError> {
        let name = name.into();
        let invalid = |reason: &str| AnalyzerError::InvalidSchema {
            name: name.clone(),
            reason: reason.to_string(),
        };
        if schema.index.is_empty() {
            return Err(invalid("index needs at least one attribute"));
        }
        if schema.dimensions.len() > 2 {
            return Err(invalid("at most two dimensions are supported"));
        }
        if schema.sub_item.is_empty() {
            return Err(invalid("sub_item attribute is required"));
        }
        if schema.timestamp.is_empty() {
            return Err(invalid("timestamp attribute is required"));
        }
        if let Some(days) = schema.global_window_days {
            if days == 0 || days > MAX_GLOBAL_WINDOW_DAYS {
                return Err(invalid(&format!(
                    "global_window_days must be between 1 and {}, got {}",
                    MAX_GLOBAL_WINDOW_DAYS, days
                )));
            }
        }
        Ok(Self { name, schema })
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    fn required(raw: &RawRecord, field: &str) -> Result<String, ClassifyError> {
        match raw.get(field) {
            None | Some(serde_json::Value::Null) => {
                Err(ClassifyError::MissingAttribute(field.to_string()))
            }
            Some(_) => raw
                .text(field)
                .ok_or_else(|| ClassifyError::InvalidValue(field.to_string())),
        }
    }
}

impl Analyzer for FieldAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    fn timestamp_field(&self) -> &str {
        &self.schema.timestamp
    }

    fn classify(&self, raw: &RawRecord) -> Result<Record, ClassifyError> {
        let ts_field = &self.schema.timestamp;
        if raw.get(ts_field).map_or(true, serde_json::Value::is_null) {
            return Err(ClassifyError::MissingAttribute(ts_field.clone()));
        }
        let timestamp = raw
            .timestamp(ts_field)
            .ok_or_else(|| ClassifyError::InvalidTimestamp(ts_field.clone()))?;

        let index = self
            .schema
            .index
            .iter()
            .map(|f| Self::required(raw, f))
            .collect::<Result<Vec<_>, _>>()?;
        let dims = self
            .schema
            .dimensions
            .iter()
            .map(|f| Self::required(raw, f))
            .collect::<Result<Vec<_>, _>>()?;
        let dimensions = Dimensions::from_values(dims)
            .ok_or_else(|| ClassifyError::InvalidValue(self.schema.dimensions.join(",")))?;
        let sub_item = SubItem(Self::required(raw, &self.schema.sub_item)?);

        let mut attributes = BTreeMap::new();
        if let Grouping::Attribute(field) = &self.schema.grouping {
            attributes.insert(field.clone(), Self::required(raw, field)?);
        }
        for field in &self.schema.cross {
            if let Some(value) = raw.text(field) {
                attributes.insert(field.clone(), value);
            }
        }

        Ok(Record {
            timestamp,
            index: Index::new(index),
            dimensions,
            sub_item,
            attributes,
        })
    }

    fn sample_grouping_key(&self, record: &Record) -> GroupingKey {
        let key = match &self.schema.grouping {
            Grouping::Day => record.timestamp.format("%Y-%m-%d").to_string(),
            Grouping::Hour => record.timestamp.format("%Y-%m-%dT%H").to_string(),
            Grouping::Index => record.index.to_string(),
            Grouping::Attribute(field) => record.attributes.get(field).cloned().unwrap_or_default(),
        };
        GroupingKey(key)
    }

    fn cross_dimensions(&self) -> &[String] {
        &self.schema.cross
    }

    fn index_threshold(&self, index: &Index) -> Option<u64> {
        index
            .head()
            .and_then(|head| self.schema.thresholds.get(head))
            .copied()
    }

    fn global_window(&self) -> Option<chrono::Duration> {
        self.schema
            .global_window_days
            .map(|days| chrono::Duration::days(i64::from(days)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analyzer(grouping: Grouping) -> FieldAnalyzer {
        FieldAnalyzer::new(
            "test",
            FieldSchema {
                index: vec!["task.severity".into()],
                dimensions: vec!["file.llfile_type".into()],
                sub_item: "file.sha1".into(),
                grouping,
                cross: vec!["source.user_id".into()],
                thresholds: BTreeMap::from([("malicious".to_string(), 90)]),
                ..FieldSchema::default()
            },
        )
        .unwrap()
    }

    fn doc() -> RawRecord {
        RawRecord::from(json!({
            "utc_timestamp": 1_593_604_800_000_i64,
            "task.severity": "malicious",
            "file.llfile_type": "PeExeFile",
            "file.sha1": "s1",
            "source.user_id": 3549,
        }))
    }

    #[test]
    fn test_classify_extracts_fields() {
        let record = analyzer(Grouping::Day).classify(&doc()).unwrap();
        assert_eq!(record.index, Index::new(["malicious"]));
        assert_eq!(record.dimensions, Dimensions::One("PeExeFile".into()));
        assert_eq!(record.sub_item, SubItem("s1".into()));
        assert_eq!(record.attributes.get("source.user_id").map(String::as_str), Some("3549"));
    }

    #[test]
    fn test_classify_reports_missing_attribute() {
        let mut fields = doc().into_fields();
        fields.remove("file.sha1");
        let err = analyzer(Grouping::Day)
            .classify(&RawRecord::new(fields))
            .unwrap_err();
        assert_eq!(err, ClassifyError::MissingAttribute("file.sha1".into()));
    }

    #[test]
    fn test_classify_rejects_bad_timestamp() {
        let mut fields = doc().into_fields();
        fields.insert("utc_timestamp".into(), json!("not a date"));
        let err = analyzer(Grouping::Day)
            .classify(&RawRecord::new(fields))
            .unwrap_err();
        assert_eq!(err, ClassifyError::InvalidTimestamp("utc_timestamp".into()));
    }

    #[test]
    fn test_grouping_keys() {
        let record = analyzer(Grouping::Day).classify(&doc()).unwrap();
        assert_eq!(analyzer(Grouping::Day).sample_grouping_key(&record).0, "2020-07-01");
        assert_eq!(analyzer(Grouping::Hour).sample_grouping_key(&record).0, "2020-07-01T12");

        let by_user = analyzer(Grouping::Attribute("source.user_id".into()));
        let record = by_user.classify(&doc()).unwrap();
        assert_eq!(by_user.sample_grouping_key(&record).0, "3549");
    }

    #[test]
    fn test_index_threshold_floor() {
        let a = analyzer(Grouping::Day);
        assert_eq!(a.index_threshold(&Index::new(["malicious"])), Some(90));
        assert_eq!(a.index_threshold(&Index::new(["benign"])), None);
    }

    #[test]
    fn test_schema_validation() {
        let err = FieldAnalyzer::new(
            "wide",
            FieldSchema {
                index: vec!["a".into()],
                dimensions: vec!["b".into(), "c".into(), "d".into()],
                sub_item: "e".into(),
                ..FieldSchema::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("at most two dimensions"));
    }

    #[test]
    fn test_global_window_bounds() {
        let schema = |days| FieldSchema {
            index: vec!["a".into()],
            sub_item: "e".into(),
            global_window_days: Some(days),
            ..FieldSchema::default()
        };
        for days in [0, MAX_GLOBAL_WINDOW_DAYS + 1, u32::MAX] {
            let err = FieldAnalyzer::new("long", schema(days)).unwrap_err();
            assert!(matches!(err, AnalyzerError::InvalidSchema { .. }), "{days}");
        }
        assert!(FieldAnalyzer::new("long", schema(MAX_GLOBAL_WINDOW_DAYS)).is_ok());
    }
}
