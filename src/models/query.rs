use serde::{Deserialize, Serialize};

use super::metadata::DataMeta;

/// Label holding the SQL actually sent to the backend
pub const NATIVE_SQL_LABEL: &str = "_native_sql";
/// Label holding the JSON-encoded column list of the data query
pub const COLUMNS_LABEL: &str = "_columns";

/// Incoming query request.
///
/// `key` names the target database (empty means the store default) and `sql`
/// is either raw SQL or one of the abstract tokens understood by the dialects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataQuery {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub sql: String,
}

impl DataQuery {
    pub fn new(key: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            sql: sql.into(),
        }
    }
}

/// One column name / string value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One decoded result row, records in column-declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub data: Vec<Record>,
}

impl Row {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data
            .iter()
            .find(|record| record.key == key)
            .map(|record| record.value.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// Mirror of the last processed row, kept for older clients
    pub data: Vec<Record>,
    pub items: Vec<Row>,
    pub meta: DataMeta,
}

impl QueryResult {
    pub fn with_meta(meta: DataMeta) -> Self {
        Self {
            meta,
            ..Default::default()
        }
    }

    /// Append a decoded row and refresh the legacy flat mirror
    pub fn push_row(&mut self, row: Row) {
        self.data = row.data.clone();
        self.items.push(row);
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.meta.label(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_row_mirrors_last_row() {
        let mut result = QueryResult::default();
        result.push_row(Row {
            data: vec![Record::new("id", "1")],
        });
        result.push_row(Row {
            data: vec![Record::new("id", "2")],
        });

        assert_eq!(result.items.len(), 2);
        assert_eq!(result.data, vec![Record::new("id", "2")]);
        assert_eq!(result.items[0].get("id"), Some("1"));
    }

    #[test]
    fn test_request_fields_default_to_empty() {
        let request: DataQuery = serde_json::from_str("{}").unwrap();
        assert!(request.key.is_empty());
        assert!(request.sql.is_empty());
    }

    #[test]
    fn test_result_serializes_wire_shape() {
        let mut result = QueryResult::default();
        result.push_row(Row {
            data: vec![Record::new("name", "x")],
        });
        result.meta.current_database = "atest".to_string();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["items"][0]["data"][0]["key"], "name");
        assert_eq!(json["meta"]["currentDatabase"], "atest");
        assert!(json["meta"].get("duration").is_none());
    }
}
