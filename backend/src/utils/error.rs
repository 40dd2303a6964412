use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::services::query_analyzer::AnalysisError;

/// API error carrying a stable numeric code
#[derive(Error, Debug)]
pub enum ApiError {
    // Analysis input errors 1xxx
    #[error("Analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    // Query service errors 2xxx
    #[error("Failed to connect to query service: {message}")]
    ClusterConnectionFailed { message: String },

    #[error("Query service rejected the statement: {message}")]
    ClusterQueryFailed { message: String },

    #[error("Query service returned an unexpected response: {0}")]
    ClusterBadResponse(String),

    // Resource errors 3xxx
    #[error("Session {session_id} not found")]
    SessionNotFound { session_id: String },

    // Validation errors 4xxx
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // System errors 5xxx
    #[error("Internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn cluster_connection_failed(message: impl Into<String>) -> Self {
        Self::ClusterConnectionFailed { message: message.into() }
    }

    pub fn cluster_query_failed(message: impl Into<String>) -> Self {
        Self::ClusterQueryFailed { message: message.into() }
    }

    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound { session_id: session_id.into() }
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    pub fn error_code(&self) -> i32 {
        match self {
            Self::Analysis(AnalysisError::InvalidJson(_)) => 1001,
            Self::Analysis(AnalysisError::NotAnArray(_)) => 1002,
            Self::Analysis(AnalysisError::EmptyInput) => 1003,

            Self::ClusterConnectionFailed { .. } => 2001,
            Self::ClusterQueryFailed { .. } => 2002,
            Self::ClusterBadResponse(_) => 2003,

            Self::SessionNotFound { .. } => 3001,

            Self::ValidationError(_) => 4001,
            Self::InvalidInput(_) => 4002,

            Self::InternalError(_) | Self::Other(_) => 5001,
        }
    }

    fn status(&self) -> StatusCode {
        match self.error_code() {
            1001..=1999 => StatusCode::UNPROCESSABLE_ENTITY,
            2001..=2999 => StatusCode::BAD_GATEWAY,
            3000..=3999 => StatusCode::NOT_FOUND,
            4001..=4999 => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub code: i32,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }

        let body = ApiErrorResponse { code: self.error_code(), message: self.to_string() };
        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::validation_error(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::Analysis(AnalysisError::EmptyInput).status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ApiError::session_not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::cluster_connection_failed("down").status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ApiError::validation_error("bad").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::internal_error("oops").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ApiError::Analysis(AnalysisError::NotAnArray("string")).error_code(), 1002);
        assert_eq!(ApiError::session_not_found("abc").error_code(), 3001);
        assert_eq!(ApiError::session_not_found("abc").to_string(), "Session abc not found");
    }
}
