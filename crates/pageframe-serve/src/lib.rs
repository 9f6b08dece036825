//! Pageframe Serve - HTTP surface for the website-embedding proxy.
//!
//! Fetches a target page on the server, rewrites it for display inside the
//! caller's own site, and answers with the rewritten HTML or a structured JSON
//! error. The pipeline itself lives in `pageframe-core`.
//!
//! # Architecture
//!
//! - **Config**: environment variables (optionally from a `.env` file)
//! - **AppState**: the shared `EmbedProxy` pipeline and configuration
//! - **Routes**: `/proxy`, `/embed`, `/health`, `/robots.txt`
//!
//! # Security
//!
//! - Targets are checked by the SSRF guard before any network call and on
//!   every redirect hop
//! - Tracking scripts and embeds are stripped from proxied pages
//! - Responses carry `nosniff`, `SAMEORIGIN` framing and `no-referrer`
//!
//! Rate limiting and authentication are expected in front of this service.

pub mod config;
mod error;
mod routes;
pub mod state;

pub use config::Config;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
