//! Prometheus metrics helpers for pageframe.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pageframe_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9091, handle).await.unwrap();
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: `proxy_`
//! - Suffix: unit or type (`_total`, `_bytes`, `_seconds`)
//! - Labels: only low-cardinality values (`mode`, `code`), never URLs

use std::net::SocketAddr;

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
/// Returns a handle that can be used with [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if a recorder is already
/// installed instead of panicking.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_metrics();
    Some(handle)
}

/// Start the Prometheus metrics HTTP server.
///
/// Binds `0.0.0.0:{port}` before returning, then serves `/metrics` from a
/// background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    Ok(())
}

/// Register descriptions for all pageframe metrics.
fn register_metrics() {
    describe_counter!(
        "proxy_requests_total",
        "Embed requests received, labelled by mode (proxy, embed)"
    );
    describe_counter!(
        "proxy_cache_hits_total",
        "Requests answered from the proxy or page cache"
    );
    describe_counter!(
        "proxy_cache_misses_total",
        "Requests that required a fetch and rewrite"
    );
    describe_counter!(
        "proxy_fetch_errors_total",
        "Failed requests, labelled by error code"
    );
    describe_counter!(
        "proxy_fallback_total",
        "Demo fallback pages served after DNS failures"
    );
    describe_counter!(
        "proxy_rewrite_failures_total",
        "Rewrites that failed and served the original markup"
    );

    describe_histogram!(
        "proxy_fetch_duration_seconds",
        "Wall time of outbound fetches, including failures"
    );
    describe_histogram!(
        "proxy_rewrite_duration_seconds",
        "Wall time of HTML rewriting"
    );
    describe_histogram!("proxy_body_bytes", "Size of fetched response bodies");
}
