use axum::{extract::State, Json};
use tracing::Instrument;

use crate::api::handlers::AppState;
use crate::api::middleware::QueryFailure;
use crate::models::{DataQuery, ExtensionStatus, QueryResult};
use crate::services::QueryContext;

/// Execute a data query or metadata request against the configured store
pub async fn execute_query(
    State(state): State<AppState>,
    Json(payload): Json<DataQuery>,
) -> Result<Json<QueryResult>, QueryFailure> {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("query", %request_id, key = %payload.key);

    async move {
        tracing::info!("Executing query: {}", payload.sql.trim());
        let ctx = QueryContext::with_timeout(state.config.query_timeout());
        let result = state.query_service.query(payload, &ctx).await?;
        Ok::<_, QueryFailure>(Json(result))
    }
    .instrument(span)
    .await
}

/// Report whether the default database of the store is reachable
pub async fn verify(State(state): State<AppState>) -> Json<ExtensionStatus> {
    let ctx = QueryContext::with_timeout(state.config.query_timeout());
    Json(state.query_service.verify(&ctx).await)
}
