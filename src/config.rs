use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::models::StoreConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub query: QueryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    pub pool_size: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Environment variables mapped onto config keys
const OVERRIDES: [(&str, &str); 10] = [
    ("HOST", "server.host"),
    ("RUST_LOG", "logging.level"),
    ("DB_NAME", "store.name"),
    ("DB_URL", "store.url"),
    ("DB_USERNAME", "store.username"),
    ("DB_PASSWORD", "store.password"),
    ("DB_DRIVER", "store.driver"),
    ("DB_DATABASE", "store.database"),
    ("DB_POOL_SIZE", "query.pool_size"),
    ("QUERY_TIMEOUT_SECS", "query.timeout_secs"),
];

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 7071)?
            .set_default("store.name", "default")?
            .set_default("store.url", "localhost:3306")?
            .set_default("store.username", "root")?
            .set_default("store.password", "")?
            .set_default("store.driver", "mysql")?
            .set_default("store.database", "atest")?
            .set_default("query.pool_size", 16)?
            .set_default("query.timeout_secs", 30)?
            .set_default("logging.level", "info")?;

        // Load from environment variables
        for (var, key) in OVERRIDES {
            if let Ok(value) = env::var(var) {
                builder = builder.set_override(key, value)?;
            }
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(7071))?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query.timeout_secs)
    }
}
