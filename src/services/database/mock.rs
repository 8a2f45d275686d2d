// Scripted in-memory connection used by the unit tests.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::middleware::AppError;
use crate::models::StoreConfig;
use crate::services::database::adapter::{
    empty_cursor, BoxedCursor, BufferedCursor, ColumnDescriptor, ColumnValue, SqlConnection,
};
use crate::services::database::ConnectionProvider;
use crate::services::dialect::Dialect;

type MockRow = Result<Vec<ColumnValue>, String>;

#[derive(Debug, Clone)]
pub enum MockResult {
    Rows {
        columns: Vec<(String, String)>,
        rows: Vec<MockRow>,
    },
    /// The row path yields no cursor, forcing the generic execution path
    NoCursor,
    Error(String),
}

impl MockResult {
    pub fn rows(columns: &[(&str, &str)], rows: Vec<Vec<ColumnValue>>) -> Self {
        MockResult::Rows {
            columns: columns
                .iter()
                .map(|(name, ty)| (name.to_string(), ty.to_string()))
                .collect(),
            rows: rows.into_iter().map(Ok).collect(),
        }
    }

    /// Single text column result
    pub fn column(name: &str, values: &[&str]) -> Self {
        Self::rows(
            &[(name, "varchar")],
            values
                .iter()
                .map(|v| vec![ColumnValue::Text(v.to_string())])
                .collect(),
        )
    }

    pub fn error(message: &str) -> Self {
        MockResult::Error(message.to_string())
    }

    fn into_cursor(self) -> Result<Option<BoxedCursor>, AppError> {
        match self {
            MockResult::Rows { columns, rows } => {
                let columns = columns
                    .into_iter()
                    .map(|(name, ty)| ColumnDescriptor::new(name, ty))
                    .collect();
                Ok(Some(BufferedCursor::boxed(columns, rows, decode_mock_row)))
            }
            MockResult::NoCursor => Ok(None),
            MockResult::Error(message) => Err(AppError::Database(message)),
        }
    }
}

fn decode_mock_row(_: &[ColumnDescriptor], row: MockRow) -> Result<Vec<ColumnValue>, AppError> {
    row.map_err(AppError::Decode)
}

pub struct MockConnection {
    dialect: Dialect,
    responses: HashMap<String, MockResult>,
    delays: HashMap<String, Duration>,
    fetched: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
    ping_error: Option<String>,
    closed: AtomicBool,
}

impl MockConnection {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            responses: HashMap::new(),
            delays: HashMap::new(),
            fetched: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            ping_error: None,
            closed: AtomicBool::new(false),
        }
    }

    pub fn on(mut self, sql: &str, result: MockResult) -> Self {
        self.responses.insert(sql.to_string(), result);
        self
    }

    pub fn with_delay(mut self, sql: &str, delay: Duration) -> Self {
        self.delays.insert(sql.to_string(), delay);
        self
    }

    pub fn with_ping_error(mut self, message: &str) -> Self {
        self.ping_error = Some(message.to_string());
        self
    }

    /// Statements seen by the row path
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    /// Statements seen by the generic execution path
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn respond(&self, sql: &str) -> Result<Option<BoxedCursor>, AppError> {
        if let Some(delay) = self.delays.get(sql) {
            tokio::time::sleep(*delay).await;
        }
        match self.responses.get(sql) {
            Some(result) => result.clone().into_cursor(),
            None => Err(AppError::Database(format!("unexpected statement: {}", sql))),
        }
    }
}

#[async_trait::async_trait]
impl SqlConnection for MockConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn fetch(&self, sql: &str) -> Result<Option<BoxedCursor>, AppError> {
        self.fetched.lock().unwrap().push(sql.to_string());
        self.respond(sql).await
    }

    async fn execute(&self, sql: &str) -> Result<BoxedCursor, AppError> {
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(self.respond(sql).await?.unwrap_or_else(empty_cursor))
    }

    async fn ping(&self) -> Result<(), AppError> {
        match &self.ping_error {
            Some(message) => Err(AppError::Connection(message.clone())),
            None => Ok(()),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Provider handing out scripted connections keyed by database name
#[derive(Default)]
pub struct MockProvider {
    connections: Mutex<HashMap<String, Arc<MockConnection>>>,
    connects: AtomicUsize,
}

impl MockProvider {
    pub fn with(self, database: &str, conn: Arc<MockConnection>) -> Self {
        self.connections.lock().unwrap().insert(database.to_string(), conn);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ConnectionProvider for MockProvider {
    async fn connect(
        &self,
        store: &StoreConfig,
        database: &str,
    ) -> Result<Arc<dyn SqlConnection>, AppError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let conn = self.connections.lock().unwrap().get(database).cloned();
        match conn {
            Some(conn) => Ok(conn as Arc<dyn SqlConnection>),
            None => Err(AppError::Connection(format!(
                "failed to connect to {} database {:?}",
                store.url, database
            ))),
        }
    }
}

pub fn test_store(database: &str) -> StoreConfig {
    StoreConfig {
        name: "test-store".to_string(),
        url: "localhost:3306".to_string(),
        username: "root".to_string(),
        password: "root".to_string(),
        driver: "mysql".to_string(),
        database: database.to_string(),
    }
}
