// Metadata discovery
//
// Enumerates databases, the current database with its tables, and auxiliary
// labels. Each class of discovery runs as its own task and returns a typed
// partial result; the results are merged only after every task has been joined.
// Failures are logged and leave the corresponding field empty.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::api::middleware::AppError;
use crate::models::{DataMeta, Record, Row};
use crate::services::context::QueryContext;
use crate::services::database::adapter::SqlConnection;
use crate::services::dialect::{CURRENT_DATABASE, SHOW_DATABASES};
use crate::services::materializer;

/// Column names carrying database names across dialects
const DATABASE_COLUMNS: [&str; 2] = ["Database", "name"];
/// Column names carrying table names across dialects, besides `Tables_in_<db>`
const TABLE_COLUMNS: [&str; 3] = ["table_name", "Tables", "tablename"];

pub const SQL_TYPE_LABEL: &str = "sql_type";
pub const VERSION_LABEL: &str = "version";

/// Result of the current-database and tables unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TablesDiscovery {
    pub current_database: String,
    pub tables: Vec<String>,
}

/// Output of one discovery task
#[derive(Debug)]
enum DiscoveryUnit {
    Databases(Vec<String>),
    Tables(TablesDiscovery),
    Labels(Vec<Record>),
}

/// A running set of discovery tasks against one connection.
///
/// Dropping it aborts whatever is still running, so no task outlives its caller.
pub struct MetadataDiscovery {
    conn: Arc<dyn SqlConnection>,
    ctx: QueryContext,
    requested_database: String,
    units: JoinSet<DiscoveryUnit>,
}

impl MetadataDiscovery {
    /// Spawn the databases and current-database+tables units
    pub fn start(conn: Arc<dyn SqlConnection>, requested_database: &str, ctx: &QueryContext) -> Self {
        let mut units = JoinSet::new();

        {
            let conn = conn.clone();
            let ctx = ctx.clone();
            units.spawn(async move {
                let databases = match databases(conn.as_ref(), &ctx).await {
                    Ok(databases) => databases,
                    Err(e) => {
                        tracing::warn!("failed to query databases: {}", e);
                        Vec::new()
                    }
                };
                DiscoveryUnit::Databases(databases)
            });
        }

        {
            let conn = conn.clone();
            let ctx = ctx.clone();
            let requested = requested_database.to_string();
            units.spawn(async move {
                DiscoveryUnit::Tables(current_database_and_tables(conn.as_ref(), &requested, &ctx).await)
            });
        }

        Self {
            conn,
            ctx: ctx.clone(),
            requested_database: requested_database.to_string(),
            units,
        }
    }

    /// Spawn the labels unit for a translated data query
    pub fn spawn_labels(&mut self, native_sql: String) {
        let conn = self.conn.clone();
        let ctx = self.ctx.clone();
        self.units
            .spawn(async move { DiscoveryUnit::Labels(labels(conn.as_ref(), &native_sql, &ctx).await) });
    }

    /// Wait for every spawned unit and merge their results
    pub async fn finish(mut self) -> DataMeta {
        let mut meta = DataMeta {
            current_database: self.requested_database.clone(),
            ..Default::default()
        };

        while let Some(joined) = self.units.join_next().await {
            match joined {
                Ok(DiscoveryUnit::Databases(databases)) => meta.databases = databases,
                Ok(DiscoveryUnit::Tables(found)) => {
                    meta.current_database = found.current_database;
                    meta.tables = found.tables;
                }
                Ok(DiscoveryUnit::Labels(labels)) => meta.labels = labels,
                Err(e) => tracing::warn!("discovery task did not complete: {}", e),
            }
        }

        meta
    }
}

/// Run every metadata-only unit and return the merged result
pub async fn discover(conn: Arc<dyn SqlConnection>, requested_database: &str, ctx: &QueryContext) -> DataMeta {
    MetadataDiscovery::start(conn, requested_database, ctx).finish().await
}

/// Sorted, distinct database names
pub async fn databases(conn: &dyn SqlConnection, ctx: &QueryContext) -> Result<Vec<String>, AppError> {
    let sql = conn.dialect().translate(SHOW_DATABASES);
    let result = materializer::execute(conn, &sql, ctx).await?;
    Ok(collect_names(&result.items, |key| DATABASE_COLUMNS.contains(&key)))
}

/// Sorted, distinct table names of `database`
pub async fn tables(conn: &dyn SqlConnection, database: &str, ctx: &QueryContext) -> Result<Vec<String>, AppError> {
    let sql = conn.dialect().show_tables_for(database);
    let result = materializer::execute(conn, &sql, ctx).await?;
    let per_database = format!("Tables_in_{}", database);
    Ok(collect_names(&result.items, |key| {
        key == per_database || TABLE_COLUMNS.contains(&key)
    }))
}

/// Name of the database the connection is attached to
pub async fn current_database(conn: &dyn SqlConnection, ctx: &QueryContext) -> Result<String, AppError> {
    let sql = conn.dialect().translate(CURRENT_DATABASE);
    let result = materializer::execute(conn, &sql, ctx).await?;
    result
        .items
        .first()
        .and_then(|row| row.data.first())
        .map(|record| record.value.clone())
        .ok_or_else(|| AppError::Database("current database query returned no rows".to_string()))
}

async fn current_database_and_tables(
    conn: &dyn SqlConnection,
    requested: &str,
    ctx: &QueryContext,
) -> TablesDiscovery {
    let mut current = requested.to_string();
    if current.is_empty() {
        match current_database(conn, ctx).await {
            Ok(name) => current = name,
            Err(e) => tracing::warn!("failed to query current database: {}", e),
        }
    }

    let tables = match tables(conn, &current, ctx).await {
        Ok(tables) => tables,
        Err(e) => {
            tracing::warn!("failed to query tables of {:?}: {}", current, e);
            Vec::new()
        }
    };

    TablesDiscovery {
        current_database: current,
        tables,
    }
}

/// Plan type and server version labels for a data query
pub async fn labels(conn: &dyn SqlConnection, native_sql: &str, ctx: &QueryContext) -> Vec<Record> {
    let dialect = conn.dialect();
    let mut labels = Vec::new();

    match materializer::execute(conn, &dialect.explain_sql(native_sql), ctx).await {
        Ok(plan) if plan.items.len() == 1 => {
            if let Some(kind) = plan.items[0].get("type") {
                labels.push(Record::new(SQL_TYPE_LABEL, kind));
            }
        }
        Ok(plan) => tracing::debug!("explain returned {} rows, no plan label", plan.items.len()),
        Err(e) => tracing::warn!("failed to explain query: {}", e),
    }

    match materializer::execute(conn, dialect.version_sql(), ctx).await {
        Ok(version) => {
            if let Some(value) = version.items.first().and_then(|row| row.get("version")) {
                labels.push(Record::new(VERSION_LABEL, value));
            }
        }
        Err(e) => tracing::warn!("failed to query server version: {}", e),
    }

    labels
}

/// Distinct values of matching columns, sorted lexicographically
pub fn collect_names<F>(rows: &[Row], matches: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    rows.iter()
        .flat_map(|row| row.data.iter())
        .filter(|record| matches(&record.key))
        .map(|record| record.value.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
