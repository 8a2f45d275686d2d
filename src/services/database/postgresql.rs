// PostgreSQL connection using a deadpool-postgres pool
use std::error::Error;
use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use tokio_postgres::types::{FromSql, FromSqlOwned, Type};
use tokio_postgres::{NoTls, Row, SimpleQueryMessage};

use crate::api::middleware::AppError;
use crate::models::StoreConfig;
use crate::services::database::adapter::{
    ArrayValue, BoxedCursor, BufferedCursor, ColumnDescriptor, ColumnValue, SqlConnection,
};
use crate::services::dialect::Dialect;

pub struct PostgresConnection {
    pool: Pool,
    database: String,
}

impl PostgresConnection {
    /// Create a pool for `database` and verify a client can be checked out
    pub async fn connect(store: &StoreConfig, database: &str, max_pool_size: usize) -> Result<Self, AppError> {
        let (host, port) = store.host_and_port(Dialect::Postgres);

        let mut cfg = PoolConfig::new();
        cfg.host = Some(host.clone());
        cfg.port = Some(port);
        cfg.user = Some(store.username.clone()).filter(|u| !u.is_empty());
        cfg.password = Some(store.password.clone()).filter(|p| !p.is_empty());
        cfg.dbname = Some(database.to_string()).filter(|d| !d.is_empty());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            AppError::Connection(format!("Failed to create connection pool: {}", e))
        })?;
        pool.resize(max_pool_size);

        let conn = Self {
            pool,
            database: database.to_string(),
        };
        conn.ping().await?;

        tracing::info!("Connected to PostgreSQL {}:{} database {:?}", host, port, database);
        Ok(conn)
    }

    async fn client(&self) -> Result<Object, AppError> {
        self.pool.get().await.map_err(|e| {
            AppError::Connection(format!(
                "Failed to get connection from pool for {:?}: {}",
                self.database, e
            ))
        })
    }
}

fn query_error(e: tokio_postgres::Error) -> AppError {
    let details = match e.as_db_error() {
        Some(db_error) => format!("Code: {}, Message: {}", db_error.code().code(), db_error.message()),
        None => e.to_string(),
    };
    AppError::Database(format!("Query execution failed: {}", details))
}

#[async_trait::async_trait]
impl SqlConnection for PostgresConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    /// Prepared statements with no result columns are left to `execute`
    async fn fetch(&self, sql: &str) -> Result<Option<BoxedCursor>, AppError> {
        let client = self.client().await?;
        let statement = client.prepare(sql).await.map_err(query_error)?;
        if statement.columns().is_empty() {
            return Ok(None);
        }

        let columns = statement
            .columns()
            .iter()
            .map(|c| ColumnDescriptor::new(c.name(), c.type_().name()))
            .collect();
        let rows = client.query(&statement, &[]).await.map_err(query_error)?;

        Ok(Some(BufferedCursor::boxed(columns, rows, decode_row)))
    }

    /// Simple query protocol; every value arrives as text
    async fn execute(&self, sql: &str) -> Result<BoxedCursor, AppError> {
        let client = self.client().await?;
        let messages = client.simple_query(sql).await.map_err(query_error)?;

        let mut columns: Vec<ColumnDescriptor> = Vec::new();
        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                if columns.is_empty() {
                    columns = row
                        .columns()
                        .iter()
                        .map(|c| ColumnDescriptor::new(c.name(), "text"))
                        .collect();
                }
                let values: Vec<ColumnValue> = (0..row.len())
                    .map(|idx| match row.get(idx) {
                        Some(text) => ColumnValue::Text(text.to_string()),
                        None => ColumnValue::Null,
                    })
                    .collect();
                rows.push(values);
            }
        }

        Ok(BufferedCursor::boxed(columns, rows, |_, row| Ok(row)))
    }

    async fn ping(&self) -> Result<(), AppError> {
        let client = self.client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| AppError::Connection(format!("PostgreSQL ping failed: {}", e)))
    }

    async fn close(&self) {
        self.pool.close();
    }
}

fn decode_row(_: &[ColumnDescriptor], row: Row) -> Result<Vec<ColumnValue>, AppError> {
    (0..row.len()).map(|idx| decode_value(&row, idx)).collect()
}

fn get<T: FromSqlOwned>(row: &Row, idx: usize) -> Result<Option<T>, AppError> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        AppError::Decode(format!("column {} could not be decoded: {}", row.columns()[idx].name(), e))
    })
}

fn or_null<T>(value: Option<T>, wrap: impl FnOnce(T) -> ColumnValue) -> ColumnValue {
    value.map(wrap).unwrap_or(ColumnValue::Null)
}

fn decode_value(row: &Row, idx: usize) -> Result<ColumnValue, AppError> {
    let ty = row.columns()[idx].type_().clone();

    let value = match ty {
        Type::BOOL => or_null(get::<bool>(row, idx)?, ColumnValue::Bool),
        Type::INT2 => or_null(get::<i16>(row, idx)?, |v| ColumnValue::Int(v as i64)),
        Type::INT4 => or_null(get::<i32>(row, idx)?, |v| ColumnValue::Int(v as i64)),
        Type::INT8 => or_null(get::<i64>(row, idx)?, ColumnValue::Int),
        Type::OID => or_null(get::<u32>(row, idx)?, |v| ColumnValue::UInt(v as u64)),
        Type::FLOAT4 => or_null(get::<f32>(row, idx)?, |v| ColumnValue::Float(v as f64)),
        Type::FLOAT8 => or_null(get::<f64>(row, idx)?, ColumnValue::Float),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            or_null(get::<String>(row, idx)?, ColumnValue::Text)
        }
        Type::CHAR => or_null(get::<i8>(row, idx)?, |v| ColumnValue::Text(char::from(v as u8).to_string())),
        Type::UUID => or_null(get::<uuid::Uuid>(row, idx)?, |v| ColumnValue::Text(v.to_string())),
        Type::TIME => or_null(get::<NaiveTime>(row, idx)?, |v| ColumnValue::Text(v.to_string())),
        Type::NUMERIC | Type::INTERVAL | Type::TIMETZ | Type::INET | Type::CIDR => {
            or_null(get::<WireText>(row, idx)?, |v| ColumnValue::Text(v.0))
        }
        Type::BYTEA => or_null(get::<Vec<u8>>(row, idx)?, ColumnValue::Bytes),
        Type::TIMESTAMP => or_null(get::<NaiveDateTime>(row, idx)?, utc_timestamp),
        Type::TIMESTAMPTZ => or_null(get::<DateTime<Utc>>(row, idx)?, |ts| {
            ColumnValue::Timestamp(ts.fixed_offset())
        }),
        Type::DATE => or_null(get::<NaiveDate>(row, idx)?, |date| match date.and_hms_opt(0, 0, 0) {
            Some(naive) => utc_timestamp(naive),
            None => ColumnValue::Text(date.to_string()),
        }),
        Type::INT2_ARRAY => or_null(get::<Vec<i16>>(row, idx)?, |v| {
            ColumnValue::Array(ArrayValue::Int(v.into_iter().map(i64::from).collect()))
        }),
        Type::INT4_ARRAY => or_null(get::<Vec<i32>>(row, idx)?, |v| {
            ColumnValue::Array(ArrayValue::Int(v.into_iter().map(i64::from).collect()))
        }),
        Type::INT8_ARRAY => or_null(get::<Vec<i64>>(row, idx)?, |v| ColumnValue::Array(ArrayValue::Int(v))),
        Type::FLOAT4_ARRAY => or_null(get::<Vec<f32>>(row, idx)?, |v| {
            ColumnValue::Array(ArrayValue::Float(v.into_iter().map(f64::from).collect()))
        }),
        Type::FLOAT8_ARRAY => or_null(get::<Vec<f64>>(row, idx)?, |v| {
            ColumnValue::Array(ArrayValue::Float(v))
        }),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            or_null(get::<Vec<String>>(row, idx)?, |v| ColumnValue::Array(ArrayValue::Text(v)))
        }
        Type::JSON | Type::JSONB => or_null(get::<serde_json::Value>(row, idx)?, |v| {
            ColumnValue::Text(v.to_string())
        }),
        other => ColumnValue::Unsupported(other.name().to_string()),
    };

    Ok(value)
}

fn utc_timestamp(naive: NaiveDateTime) -> ColumnValue {
    match FixedOffset::east_opt(0) {
        Some(offset) => ColumnValue::Timestamp(offset.from_utc_datetime(&naive)),
        None => ColumnValue::Text(naive.to_string()),
    }
}

type WireError = Box<dyn Error + Sync + Send>;

/// Server text rendering of types read from their binary wire format
struct WireText(String);

impl<'a> FromSql<'a> for WireText {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, WireError> {
        let mut reader = WireReader(raw);
        let text = match *ty {
            Type::NUMERIC => numeric_text(&mut reader)?,
            Type::INTERVAL => interval_text(&mut reader)?,
            Type::TIMETZ => timetz_text(&mut reader)?,
            Type::INET | Type::CIDR => inet_text(&mut reader)?,
            _ => return Err(format!("no text rendering for {}", ty).into()),
        };
        Ok(WireText(text))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(*ty, Type::NUMERIC | Type::INTERVAL | Type::TIMETZ | Type::INET | Type::CIDR)
    }
}

struct WireReader<'a>(&'a [u8]);

impl WireReader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        if self.0.len() < N {
            return Err("value is shorter than its wire format".into());
        }
        let (head, rest) = self.0.split_at(N);
        self.0 = rest;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(head);
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(u8::from_be_bytes(self.take()?))
    }

    fn i16(&mut self) -> Result<i16, WireError> {
        Ok(i16::from_be_bytes(self.take()?))
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    fn i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    fn i64(&mut self) -> Result<i64, WireError> {
        Ok(i64::from_be_bytes(self.take()?))
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Base 10000 digits with a weight and display scale, rendered exactly
fn numeric_text(reader: &mut WireReader<'_>) -> Result<String, WireError> {
    let ndigits = reader.i16()?;
    let weight = i32::from(reader.i16()?);
    let sign = reader.u16()?;
    let scale = usize::from(reader.u16()?);
    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits.max(0))
        .map(|_| reader.u16())
        .collect::<Result<Vec<u16>, _>>()?;
    let digit = |idx: i32| {
        usize::try_from(idx)
            .ok()
            .and_then(|idx| digits.get(idx).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&digit(0).to_string());
        for idx in 1..=weight {
            text.push_str(&format!("{:04}", digit(idx)));
        }
    }

    if scale > 0 {
        let mut fraction = String::new();
        let mut idx = weight + 1;
        while fraction.len() < scale {
            fraction.push_str(&format!("{:04}", digit(idx)));
            idx += 1;
        }
        fraction.truncate(scale);
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}

/// Months, days and microseconds in the server's default interval style
fn interval_text(reader: &mut WireReader<'_>) -> Result<String, WireError> {
    let micros = reader.i64()?;
    let days = reader.i32()?;
    let months = reader.i32()?;

    let mut parts = Vec::new();
    for (value, unit) in [(months / 12, "year"), (months % 12, "mon"), (days, "day")] {
        if value != 0 {
            let plural = if value.abs() == 1 { "" } else { "s" };
            parts.push(format!("{} {}{}", value, unit, plural));
        }
    }

    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let total = micros.unsigned_abs();
        let (secs, fraction) = (total / 1_000_000, total % 1_000_000);
        let mut clock = format!("{}{:02}:{:02}:{:02}", sign, secs / 3600, secs / 60 % 60, secs % 60);
        if fraction != 0 {
            clock.push_str(format!(".{:06}", fraction).trim_end_matches('0'));
        }
        parts.push(clock);
    }
    Ok(parts.join(" "))
}

/// Time of day in microseconds plus a zone stored as seconds west of UTC
fn timetz_text(reader: &mut WireReader<'_>) -> Result<String, WireError> {
    let micros = reader.i64()?;
    let zone = reader.i32()?;

    let secs = u32::try_from(micros / 1_000_000)?;
    let nanos = u32::try_from(micros % 1_000_000 * 1_000)?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).ok_or("time of day out of range")?;
    let offset = FixedOffset::west_opt(zone).ok_or("zone offset out of range")?;
    Ok(format!("{}{}", time.format("%H:%M:%S%.f"), offset))
}

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

/// Address with its prefix length; host addresses of `inet` omit the prefix
fn inet_text(reader: &mut WireReader<'_>) -> Result<String, WireError> {
    let family = reader.u8()?;
    let bits = reader.u8()?;
    let is_cidr = reader.u8()? != 0;
    let _len = reader.u8()?;

    let (address, full) = match family {
        PGSQL_AF_INET => (Ipv4Addr::from(reader.take::<4>()?).to_string(), 32),
        PGSQL_AF_INET6 => (Ipv6Addr::from(reader.take::<16>()?).to_string(), 128),
        other => return Err(format!("unknown address family {}", other).into()),
    };

    if is_cidr || bits != full {
        Ok(format!("{}/{}", address, bits))
    } else {
        Ok(address)
    }
}
