// SQLite connection over a single rusqlite handle
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle};
use tokio::sync::Mutex;

use crate::api::middleware::AppError;
use crate::models::StoreConfig;
use crate::services::database::adapter::{
    empty_cursor, BoxedCursor, BufferedCursor, ColumnDescriptor, ColumnValue, SqlConnection,
};
use crate::services::dialect::Dialect;

const ZONED_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%:z"];
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteConnection {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteConnection {
    /// Open `<url>/<database>.db`, or `<database>.db` when the store has no url
    pub fn open(store: &StoreConfig, database: &str) -> Result<Self, AppError> {
        let path = database_path(&store.url, database);
        let conn = Connection::open(&path).map_err(|e| {
            AppError::Connection(format!("Failed to open SQLite database {}: {}", path.display(), e))
        })?;

        tracing::info!("Opened SQLite database {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Run `work` on the blocking pool while holding the connection.
    ///
    /// Dropping the returned future interrupts the statement in progress, so a
    /// cancelled or timed out query releases the connection promptly.
    async fn blocking<T, F>(&self, work: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AppError> + Send + 'static,
    {
        let conn = self.conn.clone().lock_owned().await;
        let guard = InterruptOnDrop(Some(conn.get_interrupt_handle()));
        let outcome = tokio::task::spawn_blocking(move || work(&*conn)).await;
        guard.disarm();

        outcome.map_err(|e| AppError::Internal(format!("SQLite worker failed: {}", e)))?
    }
}

struct InterruptOnDrop(Option<InterruptHandle>);

impl InterruptOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            tracing::debug!("Interrupting abandoned SQLite statement");
            handle.interrupt();
        }
    }
}

pub fn database_path(dir: &str, database: &str) -> PathBuf {
    let file = format!("{}.db", database);
    let dir = dir.trim_start_matches("sqlite:").trim_start_matches("//");
    if dir.is_empty() {
        PathBuf::from(file)
    } else {
        Path::new(dir).join(file)
    }
}

fn decode_ref(value: ValueRef<'_>) -> ColumnValue {
    match value {
        ValueRef::Null => ColumnValue::Null,
        ValueRef::Integer(i) => ColumnValue::Int(i),
        ValueRef::Real(f) => ColumnValue::Float(f),
        ValueRef::Text(text) => ColumnValue::Text(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => ColumnValue::Bytes(blob.to_vec()),
    }
}

/// Decode a cell from the declared column type, falling back to its storage class
fn decode_cell(declared: Option<&str>, value: ValueRef<'_>) -> ColumnValue {
    match (declared, value) {
        (_, ValueRef::Null) => ColumnValue::Null,
        (Some("boolean" | "bool"), ValueRef::Integer(i)) => ColumnValue::Bool(i != 0),
        (Some("date" | "datetime" | "timestamp"), ValueRef::Text(text)) => {
            let text = String::from_utf8_lossy(text);
            match parse_timestamp(&text) {
                Some(ts) => ColumnValue::Timestamp(ts),
                None => ColumnValue::Text(text.into_owned()),
            }
        }
        (Some("date" | "datetime" | "timestamp"), ValueRef::Integer(epoch)) => {
            // 13 digit values are milliseconds
            let ts = if epoch.abs() >= 1_000_000_000_000 {
                DateTime::from_timestamp_millis(epoch)
            } else {
                DateTime::from_timestamp(epoch, 0)
            };
            match ts {
                Some(ts) => ColumnValue::Timestamp(ts.fixed_offset()),
                None => ColumnValue::Int(epoch),
            }
        }
        (_, value) => decode_ref(value),
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim().trim_end_matches('Z');
    ZONED_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .or_else(|| {
                    NaiveDate::parse_from_str(text, "%Y-%m-%d")
                        .ok()
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                })
                .map(|naive| naive.and_utc().fixed_offset())
        })
}

fn read_rows(conn: &Connection, sql: &str) -> Result<Option<BoxedCursor>, AppError> {
    let mut stmt = conn.prepare(sql)?;
    let column_count = stmt.column_count();
    if column_count == 0 {
        return Ok(None);
    }

    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let declared: Vec<Option<String>> = stmt
        .columns()
        .iter()
        .map(|column| column.decl_type().map(|ty| ty.trim().to_lowercase()))
        .collect();
    // expression columns have no declared type; the first row's storage class names them
    let mut storage_classes: Vec<String> = Vec::new();
    let mut buffered: Vec<Vec<ColumnValue>> = Vec::new();

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for (idx, declared_type) in declared.iter().enumerate() {
            let value = row
                .get_ref(idx)
                .map_err(|e| AppError::Decode(format!("column {} could not be read: {}", idx, e)))?;
            if buffered.is_empty() {
                storage_classes.push(value.data_type().to_string().to_lowercase());
            }
            values.push(decode_cell(declared_type.as_deref(), value));
        }
        buffered.push(values);
    }

    let columns = names
        .into_iter()
        .zip(declared)
        .enumerate()
        .map(|(idx, (name, declared_type))| {
            let type_name = declared_type
                .or_else(|| storage_classes.get(idx).cloned())
                .unwrap_or_else(|| "null".to_string());
            ColumnDescriptor::new(name, type_name)
        })
        .collect();

    Ok(Some(BufferedCursor::boxed(columns, buffered, |_, row| Ok(row))))
}

#[async_trait::async_trait]
impl SqlConnection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    /// Statements without result columns are left to `execute`
    async fn fetch(&self, sql: &str) -> Result<Option<BoxedCursor>, AppError> {
        let sql = sql.to_string();
        self.blocking(move |conn| read_rows(conn, &sql)).await
    }

    async fn execute(&self, sql: &str) -> Result<BoxedCursor, AppError> {
        let sql = sql.to_string();
        self.blocking(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(empty_cursor())
        })
        .await
    }

    async fn ping(&self) -> Result<(), AppError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| AppError::Connection(format!("SQLite ping failed: {}", e)))
    }

    async fn close(&self) {
        tracing::debug!("Closing SQLite database {}", self.path.display());
        self.conn.lock().await.flush_prepared_statement_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::context::QueryContext;
    use crate::services::database::mock::test_store;
    use crate::services::materializer;
    use std::time::Duration;

    fn open_in(dir: &tempfile::TempDir) -> SqliteConnection {
        let mut store = test_store("atest");
        store.driver = "sqlite".to_string();
        store.url = dir.path().to_string_lossy().into_owned();
        SqliteConnection::open(&store, "atest").unwrap()
    }

    #[test]
    fn test_database_path() {
        assert_eq!(database_path("", "atest"), PathBuf::from("atest.db"));
        assert_eq!(database_path("/var/data", "atest"), PathBuf::from("/var/data/atest.db"));
        assert_eq!(database_path("sqlite://tmp", "x"), PathBuf::from("tmp/x.db"));
    }

    #[tokio::test]
    async fn test_ddl_has_no_cursor_and_rows_decode() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_in(&dir);

        assert!(conn
            .fetch("CREATE TABLE t (id INTEGER, name TEXT, score REAL, raw BLOB)")
            .await
            .unwrap()
            .is_none());
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT, score REAL, raw BLOB)")
            .await
            .unwrap();
        conn.execute("INSERT INTO t VALUES (42, 'x', 1.5, x'6869'), (7, NULL, NULL, NULL)")
            .await
            .unwrap();

        let mut cursor = conn.fetch("SELECT * FROM t ORDER BY id DESC").await.unwrap().unwrap();
        assert_eq!(cursor.columns()[0], ColumnDescriptor::new("id", "integer"));
        assert_eq!(
            cursor.next_row().unwrap().unwrap(),
            vec![
                ColumnValue::Int(42),
                ColumnValue::Text("x".into()),
                ColumnValue::Float(1.5),
                ColumnValue::Bytes(b"hi".to_vec()),
            ]
        );
        assert_eq!(cursor.next_row().unwrap().unwrap()[1], ColumnValue::Null);
        assert!(cursor.next_row().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tables_listing_skips_internal_tables() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_in(&dir);
        conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT); CREATE TABLE orders (id INTEGER)")
            .await
            .unwrap();

        let sql = Dialect::Sqlite.show_tables_for("atest");
        let result = materializer::execute(&conn, &sql, &QueryContext::new()).await.unwrap();
        let mut names: Vec<&str> = result.items.iter().filter_map(|row| row.get("table_name")).collect();
        names.sort();
        assert_eq!(names, vec!["orders", "users"]);
    }

    #[tokio::test]
    async fn test_syntax_error_is_database_error() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_in(&dir);
        let err = conn.fetch("SELEC 1").await.err().unwrap();
        assert!(matches!(err, AppError::Database(_)));
    }

    #[tokio::test]
    async fn test_declared_types_pick_the_variant() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_in(&dir);
        conn.execute(
            "CREATE TABLE u (active BOOLEAN, created DATETIME, born DATE, seen TIMESTAMP, label TEXT); \
             INSERT INTO u VALUES (1, '2024-01-02 03:04:05', '1990-05-06', 1700000000, 'not a date')",
        )
        .await
        .unwrap();

        let result = materializer::execute(&conn, "SELECT *, 1 + 1 AS two FROM u", &QueryContext::new())
            .await
            .unwrap();
        let row = &result.items[0];
        assert_eq!(row.get("active"), Some("true"));
        assert_eq!(row.get("created"), Some("2024-01-02 03:04:05 +00:00"));
        assert_eq!(row.get("born"), Some("1990-05-06 00:00:00 +00:00"));
        assert_eq!(row.get("seen"), Some("2023-11-14 22:13:20 +00:00"));
        assert_eq!(row.get("label"), Some("not a date"));
        assert_eq!(row.get("two"), Some("2"));

        let mut cursor = conn.fetch("SELECT active, created, 1 + 1 AS two FROM u").await.unwrap().unwrap();
        let types: Vec<&str> = cursor.columns().iter().map(|c| c.type_name.as_str()).collect();
        assert_eq!(types, vec!["boolean", "datetime", "integer"]);
        assert_eq!(cursor.next_row().unwrap().unwrap()[0], ColumnValue::Bool(true));
    }

    #[test]
    fn test_unparseable_datetime_stays_text() {
        assert_eq!(
            decode_cell(Some("datetime"), ValueRef::Text(b"yesterday")),
            ColumnValue::Text("yesterday".into())
        );
        assert_eq!(
            decode_cell(Some("timestamp"), ValueRef::Text(b"2024-01-02T03:04:05.5+02:00"))
                .render()
                .unwrap(),
            "2024-01-02 03:04:05.500 +02:00"
        );
        assert_eq!(decode_cell(Some("boolean"), ValueRef::Integer(0)), ColumnValue::Bool(false));
        assert_eq!(decode_cell(None, ValueRef::Integer(1)), ColumnValue::Int(1));
    }

    #[tokio::test]
    async fn test_timeout_interrupts_running_statement() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_in(&dir);
        let endless = "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n) SELECT count(*) FROM n";

        let ctx = QueryContext::with_timeout(Duration::from_millis(50));
        let outcome = tokio::time::timeout(Duration::from_secs(10), ctx.run(conn.fetch(endless)))
            .await
            .unwrap();
        assert!(matches!(outcome, Err(AppError::Timeout)));

        // the interrupted statement gives the connection back
        tokio::time::timeout(Duration::from_secs(10), conn.ping())
            .await
            .unwrap()
            .unwrap();
    }
}
