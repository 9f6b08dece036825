//! Proxy and embed handlers.
//!
//! Both take the target as the `url` query parameter and run it through the
//! pipeline. The only difference is the [`EmbedMode`]. A query string that
//! does not parse is answered like an invalid target URL.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use pageframe_core::{
    CacheStatus, EmbedError, EmbedMode, EmbedRequest, ProxyResponse, ValidationError,
    error_report,
};

use crate::error::ApiError;
use crate::state::AppState;

static X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Query parameters shared by `/proxy` and `/embed`.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetQuery {
    /// The page to embed.
    pub url: Option<String>,
}

/// `GET /proxy?url=<target>`
pub async fn proxy_handler(
    State(state): State<AppState>,
    query: Result<Query<TargetQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|rejection| rejected_query(&state, &rejection))?;
    handle(&state, EmbedMode::Proxy, query).await
}

/// `GET /embed?url=<target>`
pub async fn embed_handler(
    State(state): State<AppState>,
    query: Result<Query<TargetQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|rejection| rejected_query(&state, &rejection))?;
    handle(&state, EmbedMode::Embed, query).await
}

async fn handle(state: &AppState, mode: EmbedMode, query: TargetQuery) -> Result<Response, ApiError> {
    let request = EmbedRequest {
        target_url: query.url.unwrap_or_default(),
        mode,
    };

    let response = state.proxy.handle(&request).await?;
    Ok(build_response(&response))
}

/// `INVALID_URL` report for a query string that failed to deserialize.
fn rejected_query(state: &AppState, rejection: &QueryRejection) -> ApiError {
    let reason = rejection.body_text();
    tracing::debug!(%reason, "rejected query string");

    let error = EmbedError::Validation(ValidationError::InvalidUrl(reason.clone()));
    let report = error_report(&error, "");
    if state.config.proxy.expose_diagnostics {
        ApiError(report.with_details(reason))
    } else {
        ApiError(report)
    }
}

/// HTML response with cache status and hardening headers.
fn build_response(response: &ProxyResponse) -> Response {
    let mut headers = HeaderMap::new();

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(
        X_CACHE.clone(),
        HeaderValue::from_static(response.cache_status.as_str()),
    );

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));

    let hash = xxhash_rust::xxh3::xxh3_64(response.html.as_bytes());
    let etag = format!("\"{}\"", hex_fmt::HexFmt(&hash.to_be_bytes()));
    if let Ok(val) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, val);
    }

    // Placeholder content must not be cached anywhere.
    let cache_control = match response.cache_status {
        CacheStatus::Fallback => "no-store",
        CacheStatus::Hit | CacheStatus::Miss => "private, max-age=60",
    };
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));

    (StatusCode::OK, headers, response.html.to_string()).into_response()
}
