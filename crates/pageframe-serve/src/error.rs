//! API error responses.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use pageframe_core::ErrorReport;

/// A classified pipeline failure, rendered as JSON.
#[derive(Debug, thiserror::Error)]
#[error("{} ({})", .0.message, .0.code)]
pub struct ApiError(pub ErrorReport);

impl From<ErrorReport> for ApiError {
    fn from(report: ErrorReport) -> Self {
        Self(report)
    }
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
    code: &'a str,
    suggestions: &'a [String],
    url: &'a str,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = &self.0;
        let status =
            StatusCode::from_u16(report.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(code = %report.code, url = %report.target_url, "embed request failed");
        }

        let body = ErrorResponse {
            error: &report.message,
            code: &report.code,
            suggestions: &report.suggestions,
            url: &report.target_url,
            timestamp: report.timestamp,
            details: report.details.as_deref(),
        };

        let mut response = (status, Json(body)).into_response();
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        );
        response
    }
}
