use serde::{Deserialize, Serialize};

use crate::services::dialect::Dialect;

/// Connection settings of one backing store.
///
/// `name` is the store identity used as the connection registry key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    /// `host[:port]` for network stores, a directory for SQLite
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Database used when a request does not name one
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_driver() -> String {
    "mysql".to_string()
}

fn default_database() -> String {
    "atest".to_string()
}

impl StoreConfig {
    /// Database a request should target, falling back to the store default
    pub fn resolve_database<'a>(&'a self, key: &'a str) -> &'a str {
        if key.is_empty() {
            &self.database
        } else {
            key
        }
    }

    /// Split `url` into host and port, using the dialect's default port when absent
    pub fn host_and_port(&self, dialect: Dialect) -> (String, u16) {
        let default_port = dialect.default_port().unwrap_or_default();
        let address = self
            .url
            .trim_start_matches("tcp(")
            .trim_end_matches(')');
        match address.rsplit_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (address.to_string(), default_port),
            },
            None => (address.to_string(), default_port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(url: &str) -> StoreConfig {
        StoreConfig {
            name: "local".to_string(),
            url: url.to_string(),
            username: "root".to_string(),
            password: "secret".to_string(),
            driver: default_driver(),
            database: default_database(),
        }
    }

    #[test]
    fn test_resolve_database() {
        let store = store("localhost:3306");
        assert_eq!(store.resolve_database(""), "atest");
        assert_eq!(store.resolve_database("orders"), "orders");
    }

    #[test]
    fn test_host_and_port() {
        assert_eq!(store("db:5433").host_and_port(Dialect::Postgres), ("db".to_string(), 5433));
        assert_eq!(store("db").host_and_port(Dialect::Postgres), ("db".to_string(), 5432));
        assert_eq!(store("db").host_and_port(Dialect::MySql), ("db".to_string(), 3306));
        assert_eq!(store("taos").host_and_port(Dialect::TDengine), ("taos".to_string(), 6041));
        assert_eq!(
            store("tcp(127.0.0.1:3307)").host_and_port(Dialect::MySql),
            ("127.0.0.1".to_string(), 3307)
        );
    }

    #[test]
    fn test_password_is_not_serialized() {
        let json = serde_json::to_string(&store("localhost")).unwrap();
        assert!(!json.contains("secret"));
    }
}
