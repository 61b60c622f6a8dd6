//! Raw telemetry documents and the validated records built from them.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One telemetry document exactly as a source produced it.
///
/// Sources never interpret attributes beyond the timestamp used for window
/// filtering; an analyzer turns this into a [`Record`] or rejects it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: serde_json::Map<String, serde_json::Value>,
}

impl RawRecord {
    pub fn new(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }

    /// Scalar attribute rendered as text. Null, arrays and objects yield `None`.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.fields.get(field)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.fields.get(field).and_then(parse_timestamp)
    }

    pub fn into_fields(self) -> serde_json::Map<String, serde_json::Value> {
        self.fields
    }
}

impl From<serde_json::Value> for RawRecord {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(fields) => Self { fields },
            _ => Self::default(),
        }
    }
}

/// Accepts epoch milliseconds (integer or float) or an RFC 3339 string.
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => {
            let ms = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(ms).single()
        }
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Ordered tuple of attribute values identifying the tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index(Vec<String>);

impl Index {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    /// The leading attribute value, used to look up per-index threshold floors.
    pub fn head(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Zero, one or two dimension values. Higher cardinality is not representable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimensions {
    None,
    One(String),
    Two(String, String),
}

impl Dimensions {
    /// Builds from up to two values; returns `None` when given more.
    pub fn from_values(mut values: Vec<String>) -> Option<Self> {
        match values.len() {
            0 => Some(Dimensions::None),
            1 => values.pop().map(Dimensions::One),
            2 => {
                let second = values.pop()?;
                let first = values.pop()?;
                Some(Dimensions::Two(first, second))
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Dimensions::None => 0,
            Dimensions::One(_) => 1,
            Dimensions::Two(_, _) => 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Dimensions::None)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimensions::None => write!(f, "-"),
            Dimensions::One(a) => write!(f, "{}", a),
            Dimensions::Two(a, b) => write!(f, "{}/{}", a, b),
        }
    }
}

/// The finer-grained entity counted inside a bucket (e.g. a content hash).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubItem(pub String);

/// Key of the sample grouping over which per-grouping distinct counts are taken.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupingKey(pub String);

/// A classified observation. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub index: Index,
    pub dimensions: Dimensions,
    pub sub_item: SubItem,
    /// Extra attributes the analyzer asked to keep (cross dimensions, grouping field).
    pub attributes: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_timestamp_formats() {
        let ms = parse_timestamp(&json!(1_593_561_600_000_i64)).unwrap();
        assert_eq!(ms.to_rfc3339(), "2020-07-01T00:00:00+00:00");

        let text = parse_timestamp(&json!("2020-07-01T00:00:00Z")).unwrap();
        assert_eq!(ms, text);

        assert!(parse_timestamp(&json!(null)).is_none());
        assert!(parse_timestamp(&json!("yesterday")).is_none());
    }

    #[test]
    fn test_raw_record_text() {
        let raw = RawRecord::from(json!({
            "file.sha1": "abc",
            "file.size": 42,
            "file.magic": null,
            "file.name": "",
        }));
        assert_eq!(raw.text("file.sha1").as_deref(), Some("abc"));
        assert_eq!(raw.text("file.size").as_deref(), Some("42"));
        assert!(raw.text("file.magic").is_none());
        assert!(raw.text("file.name").is_none());
        assert!(raw.text("missing").is_none());
    }

    #[test]
    fn test_dimensions_cap() {
        assert_eq!(Dimensions::from_values(vec![]), Some(Dimensions::None));
        assert_eq!(
            Dimensions::from_values(vec!["a".into(), "b".into()]),
            Some(Dimensions::Two("a".into(), "b".into()))
        );
        assert!(Dimensions::from_values(vec!["a".into(), "b".into(), "c".into()]).is_none());
    }
}
