pub mod connection;
pub mod metadata;
pub mod query;

pub use connection::*;
pub use metadata::*;
pub use query::*;
