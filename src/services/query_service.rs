use std::sync::Arc;
use std::time::Instant;

use crate::api::middleware::{AppError, QueryFailure};
use crate::models::{DataQuery, ExtensionStatus, QueryResult, Record, StoreConfig, NATIVE_SQL_LABEL};
use crate::services::connection_pool::ConnectionRegistry;
use crate::services::context::QueryContext;
use crate::services::database::{ConnectionProvider, SqlConnection};
use crate::services::dialect::SHOW_TABLES;
use crate::services::discovery::MetadataDiscovery;
use crate::services::materializer;

/// Entry point for data queries against one configured store
pub struct QueryService {
    store: StoreConfig,
    registry: ConnectionRegistry,
    provider: Arc<dyn ConnectionProvider>,
}

impl QueryService {
    pub fn new(store: StoreConfig, provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            store,
            registry: ConnectionRegistry::new(),
            provider,
        }
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    async fn connection(&self, database: &str) -> Result<Arc<dyn SqlConnection>, AppError> {
        self.registry
            .get_or_connect(&self.store, database, self.provider.as_ref())
            .await
    }

    /// Run a data query together with metadata discovery
    ///
    /// Databases and tables are discovered alongside the statement. When `sql`
    /// holds no statement, only blanks, separators or comments, only metadata is
    /// returned. When the statement fails, the returned
    /// failure still carries the metadata discovered so far.
    pub async fn query(&self, query: DataQuery, ctx: &QueryContext) -> Result<QueryResult, QueryFailure> {
        let database = self.store.resolve_database(&query.key).to_string();
        let conn = self.connection(&database).await?;

        let mut discovery = MetadataDiscovery::start(conn.clone(), &query.key, ctx);

        if materializer::split_statements(&query.sql).is_empty() {
            return Ok(QueryResult::with_meta(discovery.finish().await));
        }

        let dialect = conn.dialect();
        let native_sql = if query.sql.trim() == SHOW_TABLES {
            dialect.show_tables_for(&database)
        } else {
            dialect.translate(&query.sql)
        };
        tracing::debug!(dialect = %dialect, "translated query: {}", native_sql);

        discovery.spawn_labels(native_sql.clone());

        let started = Instant::now();
        let outcome = materializer::execute_script(conn.as_ref(), &native_sql, ctx).await;
        let elapsed = started.elapsed();

        let mut meta = discovery.finish().await;
        meta.labels.push(Record::new(NATIVE_SQL_LABEL, native_sql));

        match outcome {
            Ok(data) => {
                meta.duration = Some(format!("{:?}", elapsed));
                let result = match data {
                    Some(mut data) => {
                        meta.labels.append(&mut data.meta.labels);
                        QueryResult {
                            data: data.data,
                            items: data.items,
                            meta,
                        }
                    }
                    None => QueryResult::with_meta(meta),
                };
                tracing::info!(
                    "query on {:?} returned {} rows in {:?}",
                    database,
                    result.items.len(),
                    elapsed
                );
                Ok(result)
            }
            Err(error) => {
                tracing::warn!("query on {:?} failed: {}", database, error);
                Err(QueryFailure::with_partial(error, QueryResult::with_meta(meta)))
            }
        }
    }

    /// Check that the default database of the store is reachable
    pub async fn verify(&self, ctx: &QueryContext) -> ExtensionStatus {
        let database = &self.store.database;
        let result: Result<(), AppError> = async {
            let conn = self.connection(database).await?;
            if let Err(e) = ctx.run(conn.ping()).await {
                // a broken connection must not stay cached
                self.registry.evict(&self.store.name, database).await;
                return Err(e);
            }
            Ok(())
        }
        .await;

        if let Err(e) = &result {
            tracing::warn!("store {:?} is not ready: {}", self.store.name, e);
        }
        ExtensionStatus::from_result(result)
    }

    /// Close every connection held by this service
    pub async fn shutdown(&self) {
        self.registry.close_all().await;
    }
}
