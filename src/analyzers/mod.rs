//! Analyzer policies: which record attributes form the index, the dimensions,
//! the sub-item and the sample grouping.
//!
//! The engine only ever sees the [`Analyzer`] trait. Concrete policies are
//! located by name through an [`AnalyzerRegistry`].

pub mod presets;
pub mod schema;

use crate::model::{GroupingKey, Index, RawRecord, Record};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub use schema::{FieldAnalyzer, FieldSchema, Grouping, MAX_GLOBAL_WINDOW_DAYS};

/// Why a raw record could not be turned into a [`Record`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClassifyError {
    #[error("missing required attribute '{0}'")]
    MissingAttribute(String),
    #[error("attribute '{0}' is not a scalar value")]
    InvalidValue(String),
    #[error("attribute '{0}' is not a valid timestamp")]
    InvalidTimestamp(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum AnalyzerError {
    #[error("unknown analyzer '{name}' (available: {available})")]
    Unknown { name: String, available: String },
    #[error("invalid analyzer schema '{name}': {reason}")]
    InvalidSchema { name: String, reason: String },
}

/// Capability set of an analyzer policy.
pub trait Analyzer: Send + Sync {
    /// Stable registry name.
    fn name(&self) -> &str;

    /// Attribute carrying the observation time in raw records.
    fn timestamp_field(&self) -> &str;

    /// Validates a raw record and extracts index, dimensions and sub-item.
    fn classify(&self, raw: &RawRecord) -> Result<Record, ClassifyError>;

    /// Grouping over which per-grouping distinct sub-item counts are measured.
    fn sample_grouping_key(&self, record: &Record) -> GroupingKey;

    /// Attributes whose value distribution is reported with each local entry.
    fn cross_dimensions(&self) -> &[String] {
        &[]
    }

    /// Lower bound for advised thresholds of the given index.
    fn index_threshold(&self, _index: &Index) -> Option<u64> {
        None
    }

    /// Preferred retirement horizon of the global table.
    fn global_window(&self) -> Option<chrono::Duration> {
        None
    }
}

/// Name to analyzer mapping.
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    analyzers: BTreeMap<String, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in presets.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for (name, schema) in presets::all() {
            match FieldAnalyzer::new(name, schema) {
                Ok(analyzer) => registry.register(Arc::new(analyzer)),
                Err(e) => tracing::error!(error = %e, "skipping built-in analyzer"),
            }
        }
        registry
    }

    /// Built-ins plus schema-driven analyzers from configuration. Configured
    /// names shadow built-ins.
    pub fn with_schemas(schemas: &BTreeMap<String, FieldSchema>) -> Result<Self, AnalyzerError> {
        let mut registry = Self::builtin();
        for (name, schema) in schemas {
            let analyzer = FieldAnalyzer::new(name, schema.clone())?;
            registry.register(Arc::new(analyzer));
        }
        Ok(registry)
    }

    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.insert(analyzer.name().to_string(), analyzer);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Analyzer>, AnalyzerError> {
        self.analyzers
            .get(name)
            .cloned()
            .ok_or_else(|| AnalyzerError::Unknown {
                name: name.to_string(),
                available: self.names().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.analyzers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = AnalyzerRegistry::builtin();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["file-type", "network"]);
        assert_eq!(registry.get("network").unwrap().name(), "network");
    }

    #[test]
    fn test_unknown_analyzer_lists_choices() {
        let registry = AnalyzerRegistry::builtin();
        let err = registry.get("telemetry.analyzers.Missing").err().unwrap();
        assert!(err.to_string().contains("file-type, network"));
    }

    #[test]
    fn test_configured_schema_is_registered() {
        let mut schemas = BTreeMap::new();
        schemas.insert(
            "by-origin".to_string(),
            FieldSchema {
                index: vec!["source.origin".into()],
                sub_item: "file.sha1".into(),
                ..FieldSchema::default()
            },
        );
        let registry = AnalyzerRegistry::with_schemas(&schemas).unwrap();
        assert!(registry.get("by-origin").is_ok());
        assert!(registry.get("file-type").is_ok());
    }
}
