use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::api::middleware::AppError;
use crate::models::StoreConfig;
use crate::services::database::{ConnectionProvider, SqlConnection};

/// Registry key: store identity plus the database the connection is bound to
type RegistryKey = (String, String);

/// Connection registry owned by a query service.
///
/// Keeps one live connection per (store, database). A connection is closed when
/// it is evicted or when the registry is shut down.
pub struct ConnectionRegistry {
    entries: Arc<RwLock<HashMap<RegistryKey, Arc<dyn SqlConnection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn key(store: &StoreConfig, database: &str) -> RegistryKey {
        (store.name.clone(), database.to_string())
    }

    /// Get the cached connection for (`store`, `database`) or open a new one
    /// This method is safe to call concurrently from multiple tasks
    pub async fn get_or_connect(
        &self,
        store: &StoreConfig,
        database: &str,
        provider: &dyn ConnectionProvider,
    ) -> Result<Arc<dyn SqlConnection>, AppError> {
        let key = Self::key(store, database);

        // Fast path: cache hit under the read lock
        {
            let entries = self.entries.read().await;
            if let Some(conn) = entries.get(&key) {
                tracing::debug!("Using cached connection for store {:?} database {:?}", store.name, database);
                return Ok(conn.clone());
            }
        }

        let mut entries = self.entries.write().await;

        // Double-check in case another task connected while we were waiting
        if let Some(conn) = entries.get(&key) {
            tracing::debug!("Connection opened by another task for store {:?}", store.name);
            return Ok(conn.clone());
        }

        tracing::info!(
            "Opening connection to {} ({}) database {:?} for store {:?}",
            mask_credentials(&store.url),
            store.driver,
            database,
            store.name
        );

        let conn = provider.connect(store, database).await.map_err(|e| {
            tracing::error!("Failed to connect store {:?}: {}", store.name, e);
            e
        })?;
        entries.insert(key, conn.clone());

        Ok(conn)
    }

    /// Drop and close the connection of (`store_name`, `database`)
    pub async fn evict(&self, store_name: &str, database: &str) -> bool {
        let removed = self
            .entries
            .write()
            .await
            .remove(&(store_name.to_string(), database.to_string()));

        match removed {
            Some(conn) => {
                tracing::info!("Evicted connection of store {:?} database {:?}", store_name, database);
                conn.close().await;
                true
            }
            None => false,
        }
    }

    /// Close every cached connection
    pub async fn close_all(&self) {
        let drained: Vec<(RegistryKey, Arc<dyn SqlConnection>)> = self.entries.write().await.drain().collect();
        for ((store_name, database), conn) in drained {
            tracing::info!("Closing connection of store {:?} database {:?}", store_name, database);
            conn.close().await;
        }
    }

    /// Number of cached connections
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Mask credentials in a store URL for safe logging
pub fn mask_credentials(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed_url) if parsed_url.has_host() => {
            let mut masked = parsed_url.clone();
            if parsed_url.password().is_some() {
                let _ = masked.set_password(Some("***"));
            }
            masked.to_string()
        }
        // host:port style addresses carry no credentials
        _ => match url.rsplit_once('@') {
            Some((_, address)) => format!("***@{}", address),
            None => url.to_string(),
        },
    }
}
