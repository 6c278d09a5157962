//! Shared API types and utilities
//!
//! Request and response bodies for the batch endpoints, plus the error type
//! every handler returns.

use axum::{http::StatusCode, response::Json};
use mailbatch_core::{BatchError, BatchReport, BatchStats, InputRow, RowResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Request body for `POST /v1/batch`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequestBody {
    /// Decoded spreadsheet rows
    pub rows: Vec<InputRow>,
    pub email_column: Option<String>,
    /// `MAIL FROM` for the SMTP probe; falls back to the configured default
    pub sender: Option<String>,
    /// Session to stream progress to
    pub session_id: Option<String>,
    #[serde(default)]
    pub disabled_stages: Vec<String>,
}

/// Query string of `POST /v1/batch/csv`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvBatchQuery {
    pub email_column: Option<String>,
    pub sender: Option<String>,
    pub session_id: Option<String>,
    /// Comma-separated stage names
    pub disabled_stages: Option<String>,
}

/// Response body for the batch endpoints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_id: Uuid,
    pub stats: BatchStats,
    pub output_ref: Option<String>,
    pub results: Vec<RowResult>,
}

impl From<BatchReport> for BatchResponse {
    fn from(report: BatchReport) -> Self {
        Self {
            batch_id: report.batch_id,
            stats: report.stats,
            output_ref: report.output_ref,
            results: report.rows,
        }
    }
}

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    pub request_id: String,
    pub timestamp: String,
    pub details: Option<HashMap<String, String>>,
}

/// Result type for API handlers
pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    InvalidRequest(String),
    DuplicateSession(String),
    BatchFailed(String),
    InternalError(String),
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::DuplicateSession(session_id) => ApiError::DuplicateSession(session_id),
            BatchError::BatchIo(e) => ApiError::BatchFailed(e.to_string()),
            BatchError::ConfigurationError(msg) => ApiError::InternalError(msg),
            BatchError::InternalError(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_code, message, details) = match self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg, None),
            ApiError::DuplicateSession(session_id) => (
                StatusCode::CONFLICT,
                "DUPLICATE_SESSION",
                "Session already has a live subscriber".to_string(),
                Some(HashMap::from([("session_id".to_string(), session_id)])),
            ),
            ApiError::BatchFailed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "BATCH_FAILED", msg, None),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg, None),
        };

        let error_response = ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            request_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            details,
        };

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_body_deserialization() {
        let body: BatchRequestBody = serde_json::from_value(json!({
            "rows": [{"email": "a@example.com", "name": "Ada"}],
            "emailColumn": "email",
            "sessionId": "s1"
        }))
        .unwrap();

        assert_eq!(body.rows.len(), 1);
        assert_eq!(body.email_column.as_deref(), Some("email"));
        assert_eq!(body.session_id.as_deref(), Some("s1"));
        assert_eq!(body.sender, None);
        assert!(body.disabled_stages.is_empty());
    }

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (ApiError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::DuplicateSession("s1".into()), StatusCode::CONFLICT),
            (ApiError::BatchFailed("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::InternalError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn test_batch_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert!(matches!(
            ApiError::from(BatchError::BatchIo(io)),
            ApiError::BatchFailed(msg) if msg == "disk full"
        ));
        assert!(matches!(
            ApiError::from(BatchError::DuplicateSession("s1".into())),
            ApiError::DuplicateSession(id) if id == "s1"
        ));
    }
}
