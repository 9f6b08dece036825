//! Core pipeline for the pageframe website-embedding proxy.
//!
//! This crate provides:
//! - SSRF guard for target URLs (pure, no I/O)
//! - Outbound page fetching with bounded timeout, redirects and body size
//! - Short-TTL content caches built on moka
//! - HTML rewriting: tracker removal, URL absolutization, base tag and banner injection
//! - Classification of failures into stable, caller-facing error reports
//! - Prometheus metrics helpers
//!
//! # Flow
//!
//! ```text
//! request -> validate -> cache lookup -> (miss) fetch -> rewrite -> cache store -> response
//!                 \                          \
//!                  +--------------------------+--> classify -> error report | demo fallback
//! ```
//!
//! The HTTP surface lives in `pageframe-serve`; everything here is usable
//! without a router.

pub mod cache;
pub mod classify;
pub mod config;
mod error;
pub mod fetch;
pub mod metrics;
pub mod pipeline;
pub mod rewrite;
pub mod validate;

pub use cache::{CacheEntry, ContentCache, spawn_sweeper};
pub use classify::{Classification, DEMO_HOSTS, ErrorReport, FallbackPage, classify, error_report};
pub use config::ProxyConfig;
pub use error::{EmbedError, FetchError, ValidationError};
pub use fetch::{FetchedPage, Fetcher, HttpFetcher};
pub use pipeline::{CacheStatus, EmbedMode, EmbedProxy, EmbedRequest, ProxyResponse};
pub use rewrite::{RewriteStrategy, Rewriter};
pub use validate::{HostPolicy, validate};
