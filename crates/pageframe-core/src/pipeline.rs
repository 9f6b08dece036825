//! The embedding pipeline.
//!
//! [`EmbedProxy`] owns the host policy, the fetcher, the rewriter and both
//! caches. It is created once at startup, shared through application state
//! and cleared with [`EmbedProxy::shutdown`].

use std::sync::Arc;

use maud::{DOCTYPE, html};
use metrics::counter;
use url::Url;

use crate::cache::ContentCache;
use crate::classify::{Classification, ErrorReport, classify};
use crate::config::ProxyConfig;
use crate::error::{EmbedError, FetchError};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::rewrite::Rewriter;
use crate::validate::{HostPolicy, validate};

/// What the caller wants back for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    /// The rewritten target page itself.
    Proxy,
    /// A wrapper page that loads the proxied page in a same-origin iframe.
    Embed,
}

impl EmbedMode {
    /// Label used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::Embed => "embed",
        }
    }
}

/// One embed request: the raw target string as the caller sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedRequest {
    pub target_url: String,
    pub mode: EmbedMode,
}

impl EmbedRequest {
    pub fn proxy(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            mode: EmbedMode::Proxy,
        }
    }

    pub fn embed(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            mode: EmbedMode::Embed,
        }
    }
}

/// Where a response body came from. Sent as `X-Cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Placeholder content for an unreachable demo host.
    Fallback,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Fallback => "FALLBACK",
        }
    }
}

/// A successful pipeline result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub html: Arc<str>,
    pub cache_status: CacheStatus,
}

/// The validate, cache, fetch, rewrite and classify pipeline.
pub struct EmbedProxy {
    config: ProxyConfig,
    policy: HostPolicy,
    fetcher: Arc<dyn Fetcher>,
    rewriter: Rewriter,
    proxy_cache: ContentCache,
    page_cache: ContentCache,
}

impl std::fmt::Debug for EmbedProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbedProxy")
            .field("policy", &self.policy)
            .field("rewriter", &self.rewriter)
            .field("proxy_cache", &self.proxy_cache)
            .field("page_cache", &self.page_cache)
            .finish_non_exhaustive()
    }
}

impl EmbedProxy {
    /// Build the pipeline with the production HTTP fetcher.
    pub fn new(config: ProxyConfig) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::new(&config)?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    /// Build the pipeline around any [`Fetcher`].
    pub fn with_fetcher(config: ProxyConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let proxy_cache = ContentCache::new("proxy", config.cache_capacity, config.cache_ttl());
        let page_cache =
            ContentCache::new("pages", config.cache_capacity, config.page_cache_ttl());

        Self {
            policy: config.host_policy(),
            rewriter: Rewriter::new(config.streaming_threshold_bytes),
            fetcher,
            proxy_cache,
            page_cache,
            config,
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Cache of rewritten target pages.
    pub fn proxy_cache(&self) -> &ContentCache {
        &self.proxy_cache
    }

    /// Cache of embed wrapper pages.
    pub fn page_cache(&self) -> &ContentCache {
        &self.page_cache
    }

    /// Handles to both caches, for the background sweeper.
    pub fn caches(&self) -> Vec<ContentCache> {
        vec![self.proxy_cache.clone(), self.page_cache.clone()]
    }

    /// Run one request through the pipeline.
    ///
    /// Failures come back as classified [`ErrorReport`]s, except DNS failures
    /// for demo hosts, which succeed with [`CacheStatus::Fallback`].
    pub async fn handle(&self, request: &EmbedRequest) -> Result<ProxyResponse, ErrorReport> {
        counter!("proxy_requests_total", "mode" => request.mode.as_str()).increment(1);

        let target = request.target_url.trim();
        let result = if target.is_empty() {
            Err(EmbedError::MissingUrl)
        } else {
            match request.mode {
                EmbedMode::Proxy => self.proxy(target).await,
                EmbedMode::Embed => self.embed(target).await,
            }
        };

        match result {
            Ok(response) => Ok(response),
            Err(e) => self.handle_failure(e, target),
        }
    }

    /// Drop everything cached.
    pub async fn shutdown(&self) {
        self.proxy_cache.clear().await;
        self.page_cache.clear().await;
        tracing::info!("embed caches cleared");
    }

    async fn proxy(&self, target: &str) -> Result<ProxyResponse, EmbedError> {
        let url = validate(target, self.policy)?;

        let (html, inserted) = self
            .proxy_cache
            .get_or_try_insert_with(target, self.fetch_and_rewrite(&url))
            .await
            .map_err(|e| EmbedError::Fetch((*e).clone()))?;

        Ok(ProxyResponse {
            html,
            cache_status: self.record_lookup(self.proxy_cache.name(), target, inserted),
        })
    }

    async fn fetch_and_rewrite(&self, url: &Url) -> Result<String, FetchError> {
        let page = self.fetcher.fetch(url).await?;
        Ok(self
            .rewriter
            .rewrite_page(&page.body, &page.final_url, url))
    }

    async fn embed(&self, target: &str) -> Result<ProxyResponse, EmbedError> {
        let url = validate(target, self.policy)?;

        if let Some(html) = self.page_cache.get(target).await {
            return Ok(ProxyResponse {
                html,
                cache_status: self.record_lookup(self.page_cache.name(), target, false),
            });
        }

        let html: Arc<str> = self.wrapper_page(&url, target).into();
        self.page_cache
            .set(target, Arc::clone(&html), self.page_cache.default_ttl())
            .await;

        Ok(ProxyResponse {
            html,
            cache_status: self.record_lookup(self.page_cache.name(), target, true),
        })
    }

    fn record_lookup(&self, cache: &'static str, target: &str, inserted: bool) -> CacheStatus {
        if inserted {
            counter!("proxy_cache_misses_total").increment(1);
            tracing::debug!(cache, url = target, "cache miss");
            CacheStatus::Miss
        } else {
            counter!("proxy_cache_hits_total").increment(1);
            tracing::debug!(cache, url = target, "cache hit");
            CacheStatus::Hit
        }
    }

    /// Same-origin wrapper loading the proxied page in an iframe.
    fn wrapper_page(&self, url: &Url, target: &str) -> String {
        let origin = url.origin().ascii_serialization();
        let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
        let frame_src = format!("{}?url={}", self.config.proxy_path, encoded);

        html! {
            (DOCTYPE)
            html lang="en" {
                head {
                    meta charset="utf-8";
                    meta name="viewport" content="width=device-width, initial-scale=1";
                    meta name="robots" content="noindex, nofollow";
                    title { (origin) }
                    style {
                        "html,body{margin:0;height:100%}"
                        "iframe{display:block;border:0;width:100%;height:100%}"
                    }
                }
                body {
                    iframe src=(frame_src) title=(origin) referrerpolicy="no-referrer" {}
                }
            }
        }
        .into_string()
    }

    fn handle_failure(&self, error: EmbedError, target: &str) -> Result<ProxyResponse, ErrorReport> {
        match classify(&error, target) {
            Classification::Fallback(page) => {
                counter!("proxy_fallback_total").increment(1);
                tracing::warn!(url = target, host = %page.host, "serving placeholder for unresolvable demo host");

                let html = match Url::parse(target) {
                    Ok(base) => self.rewriter.rewrite(&page.html, &base),
                    Err(_) => page.html,
                };
                Ok(ProxyResponse {
                    html: html.into(),
                    cache_status: CacheStatus::Fallback,
                })
            }
            Classification::Report(mut report) => {
                match &error {
                    EmbedError::Fetch(FetchError::Other(_)) => {
                        tracing::error!(url = target, error = %error, "embed failed");
                    }
                    EmbedError::Fetch(_) => {
                        tracing::warn!(url = target, code = %report.code, error = %error, "embed failed");
                    }
                    EmbedError::MissingUrl | EmbedError::Validation(_) => {
                        tracing::debug!(url = target, code = %report.code, "embed rejected");
                    }
                }
                if let EmbedError::Fetch(_) = error {
                    counter!("proxy_fetch_errors_total", "code" => report.code.clone()).increment(1);
                }

                if self.config.expose_diagnostics {
                    report = report.with_details(format!("{error:?}"));
                }
                Err(report)
            }
        }
    }
}
