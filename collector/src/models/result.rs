use super::measurement::CollectionCategory;
use super::records::Record;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Outcome of one collection attempt for one category.
///
/// When `success` is false the data map may be partial and must not be
/// treated as authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionResult {
    pub category: CollectionCategory,
    pub data: BTreeMap<String, Vec<Record>>,
    pub success: bool,
    pub error_message: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl CollectionResult {
    pub fn success(category: CollectionCategory, data: BTreeMap<String, Vec<Record>>) -> Self {
        Self {
            category,
            data,
            success: true,
            error_message: None,
            metadata: None,
        }
    }

    pub fn failure(category: CollectionCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            data: BTreeMap::new(),
            success: false,
            error_message: Some(message.into()),
            metadata: None,
        }
    }

    /// Builds a result from whatever was collected plus the per-file errors
    /// hit along the way.
    pub fn from_parts(
        category: CollectionCategory,
        data: BTreeMap<String, Vec<Record>>,
        errors: &[String],
    ) -> Self {
        if errors.is_empty() {
            return Self::success(category, data);
        }
        Self {
            category,
            data,
            success: false,
            error_message: Some(format!(
                "{} file(s) failed: {}",
                errors.len(),
                errors.join("; ")
            )),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn record_count(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }
}
