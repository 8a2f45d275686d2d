// Driver layer: one `SqlConnection` implementation per supported dialect
pub mod adapter;
pub mod mysql;
pub mod postgresql;
pub mod sqlite;
pub mod tdengine;

#[cfg(test)]
pub mod mock;

pub use adapter::{BoxedCursor, ColumnDescriptor, ColumnValue, RowCursor, SqlConnection};
pub use mysql::MySqlConnection;
pub use postgresql::PostgresConnection;
pub use sqlite::SqliteConnection;
pub use tdengine::TDengineConnection;

use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::StoreConfig;
use crate::services::dialect::Dialect;

/// Opens dialect-bound connections for a store
#[async_trait::async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(
        &self,
        store: &StoreConfig,
        database: &str,
    ) -> Result<Arc<dyn SqlConnection>, AppError>;
}

/// Provider backed by the real database drivers
#[derive(Debug, Clone)]
pub struct DriverConnector {
    max_pool_size: usize,
}

impl DriverConnector {
    pub fn new(max_pool_size: usize) -> Self {
        Self {
            max_pool_size: max_pool_size.max(1),
        }
    }
}

impl Default for DriverConnector {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait::async_trait]
impl ConnectionProvider for DriverConnector {
    async fn connect(
        &self,
        store: &StoreConfig,
        database: &str,
    ) -> Result<Arc<dyn SqlConnection>, AppError> {
        let dialect: Dialect = store.driver.parse()?;

        let conn: Arc<dyn SqlConnection> = match dialect {
            Dialect::MySql => Arc::new(MySqlConnection::connect(store, database, self.max_pool_size).await?),
            Dialect::Postgres => {
                Arc::new(PostgresConnection::connect(store, database, self.max_pool_size).await?)
            }
            Dialect::Sqlite => Arc::new(SqliteConnection::open(store, database)?),
            Dialect::TDengine => Arc::new(TDengineConnection::connect(store, database).await?),
        };

        Ok(conn)
    }
}
