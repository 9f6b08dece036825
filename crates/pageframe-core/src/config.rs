//! Typed pipeline configuration.

use std::time::Duration;

use crate::validate::HostPolicy;

/// Configuration for the embedding pipeline.
///
/// Every field has a documented default (see [`ProxyConfig::default`]).
/// The server crate fills this from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Total time budget for one outbound fetch, including waiting for a
    /// connection permit and reading the body. Default: 8000.
    pub timeout_ms: u64,

    /// Maximum number of redirects followed per fetch. Default: 5.
    pub max_redirects: usize,

    /// Maximum accepted response body size. Default: 20 MiB.
    pub max_body_bytes: u64,

    /// TTL of rewritten pages in the proxy cache. Default: 5 minutes.
    pub cache_ttl_ms: u64,

    /// TTL of wrapper pages in the page cache. Default: 10 minutes.
    pub page_cache_ttl_ms: u64,

    /// Maximum entries per cache. Default: 1000.
    pub cache_capacity: u64,

    /// Period of the background cache sweep. Default: 60 seconds.
    pub cache_sweep_interval_ms: u64,

    /// Concurrent outbound fetches across all hosts. Default: 256.
    pub max_connections: usize,

    /// Concurrent outbound fetches per target host. Default: 16.
    pub max_connections_per_host: usize,

    /// Documents larger than this are rewritten with the pattern strategy
    /// instead of the element-rewriting strategy. Default: 2 MiB.
    pub streaming_threshold_bytes: usize,

    /// Allow loopback targets (`localhost`, `127.0.0.0/8`, `::1`).
    /// Only for local testing. Default: false.
    pub allow_loopback: bool,

    /// Attach raw diagnostic text to error reports. Never enable in
    /// production. Default: false.
    pub expose_diagnostics: bool,

    /// Path the embed wrapper page points its iframe at. Default: `/proxy`.
    pub proxy_path: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 8_000,
            max_redirects: 5,
            max_body_bytes: 20 * 1024 * 1024,
            cache_ttl_ms: 5 * 60 * 1000,
            page_cache_ttl_ms: 10 * 60 * 1000,
            cache_capacity: 1_000,
            cache_sweep_interval_ms: 60_000,
            max_connections: 256,
            max_connections_per_host: 16,
            streaming_threshold_bytes: 2 * 1024 * 1024,
            allow_loopback: false,
            expose_diagnostics: false,
            proxy_path: "/proxy".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Fetch timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Proxy cache TTL as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Page cache TTL as a [`Duration`].
    pub fn page_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.page_cache_ttl_ms)
    }

    /// Sweep period as a [`Duration`].
    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_interval_ms)
    }

    /// Host policy derived from `allow_loopback`.
    pub fn host_policy(&self) -> HostPolicy {
        HostPolicy {
            allow_loopback: self.allow_loopback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(8));
        assert_eq!(config.max_redirects, 5);
        assert_eq!(config.max_body_bytes, 20 * 1024 * 1024);
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.page_cache_ttl(), Duration::from_secs(600));
        assert!(!config.allow_loopback);
        assert!(!config.expose_diagnostics);
        assert_eq!(config.proxy_path, "/proxy");
    }

    #[test]
    fn restricted_policy_by_default() {
        assert_eq!(ProxyConfig::default().host_policy(), HostPolicy::RESTRICTED);

        let config = ProxyConfig {
            allow_loopback: true,
            ..ProxyConfig::default()
        };
        assert_eq!(config.host_policy(), HostPolicy::PERMISSIVE);
    }
}
