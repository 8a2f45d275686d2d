pub mod query;

use std::sync::Arc;

use crate::config::Config;
use crate::services::QueryService;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub query_service: Arc<QueryService>,
}
