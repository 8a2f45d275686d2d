// MySQL connection using a mysql_async pool
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::*;
use mysql_async::{Column, Conn, OptsBuilder, Pool, PoolConstraints, PoolOpts, Row, Value};

use crate::api::middleware::AppError;
use crate::models::StoreConfig;
use crate::services::database::adapter::{
    empty_cursor, BoxedCursor, BufferedCursor, ColumnDescriptor, ColumnValue, SqlConnection,
};
use crate::services::dialect::Dialect;

pub struct MySqlConnection {
    pool: Pool,
    database: String,
}

impl MySqlConnection {
    /// Build a pool for `database` and verify it hands out a working connection
    pub async fn connect(store: &StoreConfig, database: &str, max_pool_size: usize) -> Result<Self, AppError> {
        let (host, port) = store.host_and_port(Dialect::MySql);
        let constraints = PoolConstraints::new(1, max_pool_size).unwrap_or_default();

        let opts = OptsBuilder::default()
            .ip_or_hostname(host.clone())
            .tcp_port(port)
            .user(non_empty(&store.username))
            .pass(non_empty(&store.password))
            .db_name(non_empty(database))
            .pool_opts(PoolOpts::default().with_constraints(constraints));

        let conn = Self {
            pool: Pool::new(opts),
            database: database.to_string(),
        };
        conn.ping().await?;

        tracing::info!("Connected to MySQL {}:{} database {:?}", host, port, database);
        Ok(conn)
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<Conn, AppError> {
        self.pool.get_conn().await.map_err(|e| {
            AppError::Connection(format!(
                "Failed to get MySQL connection for {:?}: {}",
                self.database, e
            ))
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn query_error(e: mysql_async::Error) -> AppError {
    AppError::Database(format!("MySQL query failed: {}", e))
}

#[async_trait::async_trait]
impl SqlConnection for MySqlConnection {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn fetch(&self, sql: &str) -> Result<Option<BoxedCursor>, AppError> {
        let mut conn = self.get_conn().await?;
        let mut result = conn.query_iter(sql).await.map_err(query_error)?;

        let columns: Vec<ColumnDescriptor> = result.columns_ref().iter().map(describe_column).collect();
        let rows: Vec<Row> = result.collect().await.map_err(query_error)?;
        result.drop_result().await.map_err(query_error)?;

        // statements without a result set already ran, so hand back an empty cursor
        Ok(Some(BufferedCursor::boxed(columns, rows, decode_row)))
    }

    async fn execute(&self, sql: &str) -> Result<BoxedCursor, AppError> {
        let mut conn = self.get_conn().await?;
        conn.query_drop(sql).await.map_err(query_error)?;
        Ok(empty_cursor())
    }

    async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.get_conn().await?;
        conn.ping()
            .await
            .map_err(|e| AppError::Connection(format!("MySQL ping failed: {}", e)))
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            tracing::warn!("Failed to disconnect MySQL pool for {:?}: {}", self.database, e);
        }
    }
}

fn describe_column(column: &Column) -> ColumnDescriptor {
    let type_name = format!("{:?}", column.column_type());
    let type_name = type_name.trim_start_matches("MYSQL_TYPE_").to_lowercase();
    ColumnDescriptor::new(column.name_str().into_owned(), type_name)
}

fn decode_row(_: &[ColumnDescriptor], row: Row) -> Result<Vec<ColumnValue>, AppError> {
    let columns = row.columns();
    columns
        .iter()
        .zip(row.unwrap_raw())
        .map(|(column, value)| match value {
            Some(value) => decode_value(column, value),
            None => Err(AppError::Decode(format!("column {} was already taken", column.name_str()))),
        })
        .collect()
}

/// Choose the cell variant from the column type; the text protocol delivers bytes
fn decode_value(column: &Column, value: Value) -> Result<ColumnValue, AppError> {
    let bytes = match value {
        Value::NULL => return Ok(ColumnValue::Null),
        Value::Int(i) => return Ok(ColumnValue::Int(i)),
        Value::UInt(u) => return Ok(ColumnValue::UInt(u)),
        Value::Float(f) => return Ok(ColumnValue::Float(f as f64)),
        Value::Double(d) => return Ok(ColumnValue::Float(d)),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            return Ok(NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .and_then(|date| date.and_hms_micro_opt(hour as u32, minute as u32, second as u32, micros))
                .map(utc_timestamp)
                .unwrap_or(ColumnValue::Null));
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let hours = days * 24 + hours as u32;
            let sign = if negative { "-" } else { "" };
            return Ok(ColumnValue::Text(format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                sign, hours, minutes, seconds, micros
            )));
        }
        Value::Bytes(bytes) => bytes,
    };

    let text = || String::from_utf8_lossy(&bytes).into_owned();
    let unsigned = column.flags().contains(ColumnFlags::UNSIGNED_FLAG);

    let decoded = match column.column_type() {
        ColumnType::MYSQL_TYPE_NULL => ColumnValue::Null,
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => {
            let raw = text();
            let parsed = if unsigned {
                raw.parse::<u64>().map(ColumnValue::UInt).ok()
            } else {
                raw.parse::<i64>().map(ColumnValue::Int).ok()
            };
            parsed.ok_or_else(|| {
                AppError::Decode(format!("column {} holds non-integer {:?}", column.name_str(), raw))
            })?
        }
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
            let raw = text();
            raw.parse::<f64>().map(ColumnValue::Float).map_err(|_| {
                AppError::Decode(format!("column {} holds non-float {:?}", column.name_str(), raw))
            })?
        }
        ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2
        | ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2 => {
            let raw = text();
            // zero dates and other out of range values keep their server text
            NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f")
                .map(utc_timestamp)
                .unwrap_or(ColumnValue::Text(raw))
        }
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
            let raw = text();
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(utc_timestamp)
                .unwrap_or(ColumnValue::Text(raw))
        }
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_BIT
            if column.flags().contains(ColumnFlags::BINARY_FLAG) =>
        {
            ColumnValue::Bytes(bytes.clone())
        }
        ColumnType::MYSQL_TYPE_GEOMETRY => ColumnValue::Unsupported("geometry".to_string()),
        _ => ColumnValue::Text(text()),
    };

    Ok(decoded)
}

fn utc_timestamp(naive: NaiveDateTime) -> ColumnValue {
    let utc = FixedOffset::east_opt(0).map(|offset| offset.from_utc_datetime(&naive));
    match utc {
        Some(ts) => ColumnValue::Timestamp(ts),
        None => ColumnValue::Text(naive.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, ty: ColumnType, flags: ColumnFlags) -> Column {
        Column::new(ty).with_name(name.as_bytes()).with_flags(flags)
    }

    fn text(value: &str) -> Value {
        Value::Bytes(value.as_bytes().to_vec())
    }

    #[test]
    fn test_integers_follow_signedness() {
        let signed = column("id", ColumnType::MYSQL_TYPE_LONGLONG, ColumnFlags::empty());
        let unsigned = column("id", ColumnType::MYSQL_TYPE_LONGLONG, ColumnFlags::UNSIGNED_FLAG);

        assert_eq!(decode_value(&signed, text("-7")).unwrap(), ColumnValue::Int(-7));
        assert_eq!(
            decode_value(&unsigned, text("18446744073709551615")).unwrap(),
            ColumnValue::UInt(u64::MAX)
        );
        assert!(matches!(decode_value(&signed, text("abc")), Err(AppError::Decode(_))));
    }

    #[test]
    fn test_datetime_and_zero_date() {
        let col = column("created", ColumnType::MYSQL_TYPE_DATETIME, ColumnFlags::empty());

        let decoded = decode_value(&col, text("2024-01-02 03:04:05")).unwrap();
        assert_eq!(decoded.render().unwrap(), "2024-01-02 03:04:05 +00:00");

        let zero = decode_value(&col, text("0000-00-00 00:00:00")).unwrap();
        assert_eq!(zero, ColumnValue::Text("0000-00-00 00:00:00".into()));
    }

    #[test]
    fn test_null_text_and_geometry() {
        let name = column("name", ColumnType::MYSQL_TYPE_VAR_STRING, ColumnFlags::empty());
        let shape = column("shape", ColumnType::MYSQL_TYPE_GEOMETRY, ColumnFlags::BINARY_FLAG);

        assert_eq!(decode_value(&name, Value::NULL).unwrap(), ColumnValue::Null);
        assert_eq!(decode_value(&name, text("x")).unwrap(), ColumnValue::Text("x".into()));
        assert!(decode_value(&shape, Value::Bytes(vec![0, 1])).unwrap().render().is_none());
    }

    #[test]
    fn test_describe_column_type_name() {
        let col = column("total", ColumnType::MYSQL_TYPE_NEWDECIMAL, ColumnFlags::empty());
        assert_eq!(describe_column(&col), ColumnDescriptor::new("total", "newdecimal"));
    }
}
