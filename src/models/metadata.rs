use serde::{Deserialize, Serialize};

use super::query::Record;

/// Introspection data attached to every query result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMeta {
    pub databases: Vec<String>,
    pub tables: Vec<String>,
    pub current_database: String,
    pub labels: Vec<Record>,
    /// Elapsed time of the data query, only set when one ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl DataMeta {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|record| record.key == key)
            .map(|record| record.value.as_str())
    }
}

/// Readiness report returned by the verify endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionStatus {
    pub ready: bool,
    pub message: String,
    pub version: String,
}

impl ExtensionStatus {
    pub fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        let (ready, message) = match result {
            Ok(()) => (true, "OK".to_string()),
            Err(e) => (false, e.to_string()),
        };
        Self {
            ready,
            message,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
