use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::QueryResult;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Query timeout: deadline exceeded")]
    Timeout,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code used in error responses
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Decode(_) => "DECODE_ERROR",
            AppError::Cancelled => "CANCELLED",
            AppError::Timeout => "TIMEOUT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Connection(_) => StatusCode::BAD_REQUEST,
            AppError::Cancelled | AppError::Timeout => StatusCode::REQUEST_TIMEOUT,
            AppError::Database(_) | AppError::Decode(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// A failed facade call.
///
/// `partial` carries whatever discovery already produced when the data branch
/// failed; it is `None` when the connection could not be acquired.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct QueryFailure {
    #[source]
    pub error: AppError,
    pub partial: Option<Box<QueryResult>>,
}

impl QueryFailure {
    pub fn with_partial(error: AppError, partial: QueryResult) -> Self {
        Self {
            error,
            partial: Some(Box::new(partial)),
        }
    }
}

impl From<AppError> for QueryFailure {
    fn from(error: AppError) -> Self {
        Self {
            error,
            partial: None,
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<QueryResult>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        QueryFailure::from(self).into_response()
    }
}

impl IntoResponse for QueryFailure {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let mut detail = ErrorDetail::new(self.error.code(), self.error.to_string());
        match &self.error {
            AppError::Connection(_) => {
                detail = detail.with_details("Check the store address, credentials and driver.");
            }
            AppError::Timeout => {
                detail = detail.with_details("Consider simplifying the query or raising QUERY_TIMEOUT_SECS.");
            }
            _ => {}
        }

        let body = Json(ErrorResponse {
            error: detail,
            partial: self.partial.map(|partial| *partial),
        });

        (status, body).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}
