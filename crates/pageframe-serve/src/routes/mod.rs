//! Route definitions for the embedding proxy.
//!
//! ## Routes
//!
//! - `GET /proxy?url=<target>` - Rewritten target page
//! - `GET /embed?url=<target>` - Wrapper page framing `/proxy`
//! - `GET /health` - Health check (JSON)
//! - `GET /robots.txt` - Crawler instructions

mod health;
mod proxy;

use axum::Router;
use axum::response::IntoResponse;
use axum::routing::get;

use crate::state::AppState;

/// Build the complete router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/proxy", get(proxy::proxy_handler))
        .route("/embed", get(proxy::embed_handler))
        .route("/health", get(health::health_check))
        .route("/robots.txt", get(robots_txt))
        .with_state(state)
}

/// Keep crawlers away from proxied copies of other sites.
async fn robots_txt() -> impl IntoResponse {
    (
        [("content-type", "text/plain; charset=utf-8")],
        "User-agent: *\nDisallow: /proxy\nDisallow: /embed\n",
    )
}
