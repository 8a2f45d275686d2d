pub mod connection_pool;
pub mod context;
pub mod database;
pub mod dialect;
pub mod discovery;
pub mod materializer;
pub mod query_service;

pub use connection_pool::ConnectionRegistry;
pub use context::QueryContext;
pub use database::{ConnectionProvider, DriverConnector};
pub use dialect::{Dialect, LogicalType};
pub use discovery::MetadataDiscovery;
pub use query_service::QueryService;
