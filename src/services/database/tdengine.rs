// TDengine connection over the taosAdapter REST API
// Statements are posted as plain text to /rest/sql/<database>
use chrono::{DateTime, FixedOffset, TimeZone};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::api::middleware::AppError;
use crate::models::StoreConfig;
use crate::services::database::adapter::{
    BoxedCursor, BufferedCursor, ColumnDescriptor, ColumnValue, SqlConnection,
};
use crate::services::dialect::Dialect;

pub struct TDengineConnection {
    endpoint: String,
    username: String,
    password: String,
    client: Client,
}

/// Body returned by `/rest/sql`
#[derive(Debug, Deserialize)]
struct RestResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    desc: Option<String>,
    /// `[name, type, length]` triples
    #[serde(default)]
    column_meta: Vec<(String, String, i64)>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

impl TDengineConnection {
    pub async fn connect(store: &StoreConfig, database: &str) -> Result<Self, AppError> {
        let (host, port) = store.host_and_port(Dialect::TDengine);
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}:{}", host, port)
        } else {
            format!("http://{}:{}", host, port)
        };
        let endpoint = if database.is_empty() {
            format!("{}/rest/sql", base_url)
        } else {
            format!("{}/rest/sql/{}", base_url, database)
        };

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let conn = Self {
            endpoint,
            username: store.username.clone(),
            password: store.password.clone(),
            client,
        };
        conn.ping().await?;

        tracing::info!("Connected to TDengine {}:{} database {:?}", host, port, database);
        Ok(conn)
    }

    async fn execute_sql(&self, sql: &str) -> Result<RestResponse, AppError> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| AppError::Database(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body: RestResponse = response
            .json()
            .await
            .map_err(|e| AppError::Database(format!("Failed to parse TDengine response ({}): {}", status, e)))?;

        check_response(body)
    }
}

fn check_response(body: RestResponse) -> Result<RestResponse, AppError> {
    if body.code != 0 {
        return Err(AppError::Database(format!(
            "TDengine query failed ({}): {}",
            body.code,
            body.desc.as_deref().unwrap_or("unknown error")
        )));
    }
    Ok(body)
}

fn into_cursor(body: RestResponse) -> BoxedCursor {
    let columns = body
        .column_meta
        .into_iter()
        .map(|(name, type_name, _)| ColumnDescriptor::new(name, type_name.to_lowercase()))
        .collect();
    BufferedCursor::boxed(columns, body.data, decode_row)
}

#[async_trait::async_trait]
impl SqlConnection for TDengineConnection {
    fn dialect(&self) -> Dialect {
        Dialect::TDengine
    }

    async fn fetch(&self, sql: &str) -> Result<Option<BoxedCursor>, AppError> {
        Ok(Some(into_cursor(self.execute_sql(sql).await?)))
    }

    async fn execute(&self, sql: &str) -> Result<BoxedCursor, AppError> {
        Ok(into_cursor(self.execute_sql(sql).await?))
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.execute_sql("SELECT SERVER_VERSION()")
            .await
            .map(|_| ())
            .map_err(|e| AppError::Connection(format!("TDengine ping failed: {}", e)))
    }

    async fn close(&self) {
        tracing::debug!("Releasing TDengine client for {}", self.endpoint);
    }
}

fn decode_row(columns: &[ColumnDescriptor], row: Vec<Value>) -> Result<Vec<ColumnValue>, AppError> {
    if row.len() != columns.len() {
        return Err(AppError::Decode(format!(
            "row has {} values for {} columns",
            row.len(),
            columns.len()
        )));
    }
    columns
        .iter()
        .zip(row)
        .map(|(column, value)| decode_value(column, value))
        .collect()
}

fn decode_value(column: &ColumnDescriptor, value: Value) -> Result<ColumnValue, AppError> {
    if value.is_null() {
        return Ok(ColumnValue::Null);
    }

    let mismatch = |value: &Value| {
        AppError::Decode(format!(
            "column {} of type {} holds {}",
            column.name, column.type_name, value
        ))
    };

    let type_name = column.type_name.as_str();
    let decoded = match type_name {
        "bool" => match &value {
            Value::Bool(b) => ColumnValue::Bool(*b),
            Value::Number(n) => ColumnValue::Bool(n.as_i64() != Some(0)),
            other => return Err(mismatch(other)),
        },
        "tinyint unsigned" | "smallint unsigned" | "int unsigned" | "bigint unsigned" => {
            value.as_u64().map(ColumnValue::UInt).ok_or_else(|| mismatch(&value))?
        }
        "tinyint" | "smallint" | "int" | "bigint" => {
            value.as_i64().map(ColumnValue::Int).ok_or_else(|| mismatch(&value))?
        }
        "float" | "double" => value.as_f64().map(ColumnValue::Float).ok_or_else(|| mismatch(&value))?,
        "timestamp" => match &value {
            Value::String(text) => DateTime::parse_from_rfc3339(text)
                .map(ColumnValue::Timestamp)
                .unwrap_or_else(|_| ColumnValue::Text(text.clone())),
            Value::Number(n) => n
                .as_i64()
                .and_then(|ms| FixedOffset::east_opt(0).and_then(|utc| utc.timestamp_millis_opt(ms).single()))
                .map(ColumnValue::Timestamp)
                .ok_or_else(|| mismatch(&value))?,
            other => return Err(mismatch(other)),
        },
        "geometry" => ColumnValue::Unsupported(type_name.to_string()),
        _ => match value {
            Value::String(text) => ColumnValue::Text(text),
            other => ColumnValue::Text(other.to_string()),
        },
    };

    Ok(decoded)
}
