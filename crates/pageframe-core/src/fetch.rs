//! Outbound page fetching.
//!
//! [`HttpFetcher`] issues exactly one GET per call (no retries) with
//! browser-like headers, a total timeout, a bounded redirect chain whose hops
//! are re-checked by the SSRF guard, and a bounded body size enforced while
//! streaming. Concurrency is capped globally and per target host.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, redirect};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use url::Url;

use crate::config::ProxyConfig;
use crate::error::{FetchError, ValidationError};
use crate::validate::validate;

/// User agent sent with every fetch. Sites serve degraded pages or block
/// requests without a browser-looking agent.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

const BROWSER_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Per-host limiters are pruned once the map grows past this many hosts.
const HOST_LIMITER_PRUNE_THRESHOLD: usize = 1024;

/// A successfully fetched document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Decoded body (invalid UTF-8 is replaced).
    pub body: String,
    /// `Content-Type` header, if the target sent one.
    pub content_type: Option<String>,
    /// HTTP status (always 2xx).
    pub status: u16,
    /// URL after following redirects.
    pub final_url: Url,
}

/// Source of target pages. The pipeline only talks to this trait so tests can
/// substitute a fixed fetcher.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`. Non-2xx responses are errors.
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

/// Reasons the redirect policy stops a chain.
#[derive(Debug, thiserror::Error)]
enum RedirectRejection {
    #[error("too many redirects")]
    TooMany,
    #[error("redirect target rejected: {0}")]
    Blocked(ValidationError),
}

/// Production fetcher on a shared keep-alive `reqwest` client.
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    max_redirects: usize,
    max_body_bytes: u64,
    global_limit: Arc<Semaphore>,
    per_host_limit: usize,
    host_limits: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HttpFetcher {
    /// Build the shared client from configuration.
    pub fn new(config: &ProxyConfig) -> Result<Self, FetchError> {
        let policy = config.host_policy();
        let max_redirects = config.max_redirects;

        let redirect_policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > max_redirects {
                return attempt.error(RedirectRejection::TooMany);
            }
            match validate(attempt.url().as_str(), policy) {
                Ok(_) => attempt.follow(),
                Err(e) => attempt.error(RedirectRejection::Blocked(e)),
            }
        });

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE),
        );

        let timeout = config.timeout();
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .redirect(redirect_policy)
            .pool_max_idle_per_host(config.max_connections_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| FetchError::Other(format!("failed to build HTTP client: {e}")))?;

        tracing::debug!(
            timeout_ms = config.timeout_ms,
            max_redirects,
            max_body_bytes = config.max_body_bytes,
            max_connections = config.max_connections,
            max_connections_per_host = config.max_connections_per_host,
            "http fetcher initialized"
        );

        Ok(Self {
            client,
            timeout,
            max_redirects,
            max_body_bytes: config.max_body_bytes,
            global_limit: Arc::new(Semaphore::new(config.max_connections.max(1))),
            per_host_limit: config.max_connections_per_host.max(1),
            host_limits: Mutex::new(HashMap::new()),
        })
    }

    fn host_limiter(&self, url: &Url) -> Arc<Semaphore> {
        let host = url.host_str().unwrap_or_default().to_string();
        let mut limits = self.host_limits.lock();

        if limits.len() > HOST_LIMITER_PRUNE_THRESHOLD {
            // Only the map holds idle limiters.
            limits.retain(|_, sem| Arc::strong_count(sem) > 1);
        }

        Arc::clone(
            limits
                .entry(host)
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit))),
        )
    }

    async fn acquire(
        &self,
        url: &Url,
    ) -> Result<(OwnedSemaphorePermit, OwnedSemaphorePermit), FetchError> {
        let closed =
            |_: AcquireError| FetchError::Other("connection limiter closed".to_string());
        let global = Arc::clone(&self.global_limit)
            .acquire_owned()
            .await
            .map_err(closed)?;
        let host = self.host_limiter(url).acquire_owned().await.map_err(closed)?;
        Ok((global, host))
    }

    async fn fetch_inner(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let _permits = self.acquire(url).await?;

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.transport_error(&e, url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if let Some(ct) = &content_type
            && !is_markup_content_type(ct)
        {
            return Err(FetchError::UnsupportedContentType(ct.clone()));
        }

        // Reject before reading when the size is announced.
        if let Some(len) = response.content_length()
            && len > self.max_body_bytes
        {
            return Err(FetchError::ContentTooLarge {
                limit: self.max_body_bytes,
            });
        }

        let final_url = response.url().clone();
        let mut body: Vec<u8> = Vec::new();

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.transport_error(&e, url))?
        {
            if body.len() as u64 + chunk.len() as u64 > self.max_body_bytes {
                // Dropping the response aborts the transfer.
                return Err(FetchError::ContentTooLarge {
                    limit: self.max_body_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        histogram!("proxy_body_bytes").record(body.len() as f64);

        Ok(FetchedPage {
            body: String::from_utf8_lossy(&body).into_owned(),
            content_type,
            status: status.as_u16(),
            final_url,
        })
    }

    /// Map a transport error onto the fetch error kinds.
    fn transport_error(&self, err: &reqwest::Error, url: &Url) -> FetchError {
        if err.is_timeout() {
            return FetchError::Timeout(self.timeout);
        }

        if err.is_redirect() {
            return match find_cause::<RedirectRejection>(err) {
                Some(RedirectRejection::Blocked(e)) => FetchError::RedirectBlocked(e.clone()),
                _ => FetchError::TooManyRedirects(self.max_redirects),
            };
        }

        if let Some(io) = find_cause::<std::io::Error>(err) {
            use std::io::ErrorKind;
            match io.kind() {
                ErrorKind::ConnectionRefused => return FetchError::ConnectionRefused,
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe => return FetchError::ConnectionReset,
                ErrorKind::TimedOut => return FetchError::Timeout(self.timeout),
                _ => {}
            }
        }

        let chain = error_chain_text(err);
        if is_dns_failure(&chain) {
            return FetchError::Dns {
                host: url.host_str().unwrap_or_default().to_string(),
            };
        }
        if chain.contains("connection refused") {
            return FetchError::ConnectionRefused;
        }
        if chain.contains("connection reset") {
            return FetchError::ConnectionReset;
        }

        FetchError::Other(err.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let started = Instant::now();

        // The client timeout covers the request itself; this one also covers
        // waiting for a connection permit.
        let result = tokio::time::timeout(self.timeout, self.fetch_inner(url))
            .await
            .unwrap_or(Err(FetchError::Timeout(self.timeout)));

        histogram!("proxy_fetch_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(page) => tracing::debug!(
                url = %url,
                final_url = %page.final_url,
                bytes = page.body.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "fetched target"
            ),
            Err(e) => tracing::debug!(url = %url, error = %e, "fetch failed"),
        }

        result
    }
}

/// Whether a `Content-Type` names a document the rewriter can handle.
fn is_markup_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    mime.is_empty()
        || mime == "text/html"
        || mime == "text/plain"
        || mime == "application/xhtml+xml"
        || mime == "text/xml"
        || mime == "application/xml"
}

/// Find the first error of type `T` in the source chain.
fn find_cause<'a, T: StdError + 'static>(err: &'a (dyn StdError + 'static)) -> Option<&'a T> {
    let mut current: Option<&'a (dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<T>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}

/// Lowercased messages of the whole source chain, joined.
fn error_chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut parts = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        parts.push(e.to_string().to_lowercase());
        current = e.source();
    }
    parts.join(": ")
}

fn is_dns_failure(chain: &str) -> bool {
    chain.contains("dns error")
        || chain.contains("failed to lookup address")
        || chain.contains("name or service not known")
        || chain.contains("no such host")
        || chain.contains("nodename nor servname")
        || chain.contains("temporary failure in name resolution")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> ProxyConfig {
        ProxyConfig {
            allow_loopback: true,
            timeout_ms: 2_000,
            ..ProxyConfig::default()
        }
    }

    fn fetcher(config: &ProxyConfig) -> HttpFetcher {
        HttpFetcher::new(config).unwrap()
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    "<html><body>hello</body></html>",
                    "text/html; charset=utf-8",
                ),
            )
            .expect(1)
            .mount(&server)
            .await;

        let page = fetcher(&test_config())
            .fetch(&url(&server, "/page"))
            .await
            .unwrap();

        assert_eq!(page.status, 200);
        assert_eq!(page.body, "<html><body>hello</body></html>");
        assert_eq!(
            page.content_type.as_deref(),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(page.final_url.path(), "/page");
    }

    #[tokio::test]
    async fn test_sends_browser_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let page = fetcher(&test_config()).fetch(&url(&server, "/")).await;
        assert!(page.is_ok(), "{page:?}");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let headers = &requests[0].headers;
        assert_eq!(headers["user-agent"], BROWSER_USER_AGENT);
        assert_eq!(headers["accept-language"], BROWSER_ACCEPT_LANGUAGE);
    }

    #[tokio::test]
    async fn test_upstream_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .mount(&server)
            .await;

        let err = fetcher(&test_config())
            .fetch(&url(&server, "/missing"))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::UpstreamStatus(404));
    }

    #[tokio::test]
    async fn test_announced_body_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("x".repeat(4096), "text/html"),
            )
            .mount(&server)
            .await;

        let config = ProxyConfig {
            max_body_bytes: 1024,
            ..test_config()
        };
        let err = fetcher(&config)
            .fetch(&url(&server, "/big"))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::ContentTooLarge { limit: 1024 });
    }

    /// Serves one chunked response of `total` bytes with no Content-Length.
    async fn chunked_server(total: usize) -> Url {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;

            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            let chunk = vec![b'x'; 1024];
            for _ in 0..total / chunk.len() {
                let frame = [format!("{:x}\r\n", chunk.len()).as_bytes(), &chunk[..], &b"\r\n"[..]].concat();
                if socket.write_all(&frame).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
        });
        Url::parse(&format!("http://{addr}/stream")).unwrap()
    }

    #[tokio::test]
    async fn test_chunked_body_too_large_is_aborted() {
        let target = chunked_server(50 * 1024).await;
        let config = ProxyConfig {
            max_body_bytes: 2048,
            ..test_config()
        };

        let err = fetcher(&config).fetch(&target).await.unwrap_err();
        assert_eq!(err, FetchError::ContentTooLarge { limit: 2048 });
    }

    #[tokio::test]
    async fn test_chunked_body_under_limit_is_read() {
        let target = chunked_server(4 * 1024).await;
        let config = ProxyConfig {
            max_body_bytes: 8 * 1024,
            ..test_config()
        };

        let page = fetcher(&config).fetch(&target).await.unwrap();
        assert_eq!(page.body.len(), 4 * 1024);
    }

    #[tokio::test]
    async fn test_body_at_limit_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(1024)))
            .mount(&server)
            .await;

        let config = ProxyConfig {
            max_body_bytes: 1024,
            ..test_config()
        };
        let page = fetcher(&config).fetch(&url(&server, "/")).await.unwrap();
        assert_eq!(page.body.len(), 1024);
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let config = ProxyConfig {
            timeout_ms: 200,
            ..test_config()
        };
        let err = fetcher(&config)
            .fetch(&url(&server, "/slow"))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout(Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let target = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();

        let err = fetcher(&test_config()).fetch(&target).await.unwrap_err();
        assert_eq!(err, FetchError::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_dns_failure() {
        let target = Url::parse("http://pageframe-test.invalid/").unwrap();

        let err = fetcher(&test_config()).fetch(&target).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Dns {
                host: "pageframe-test.invalid".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unsupported_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(vec![0x89, 0x50, 0x4e, 0x47], "image/png"),
            )
            .mount(&server)
            .await;

        let err = fetcher(&test_config())
            .fetch(&url(&server, "/logo.png"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::UnsupportedContentType("image/png".to_string())
        );
    }

    #[tokio::test]
    async fn test_follows_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let page = fetcher(&test_config())
            .fetch(&url(&server, "/old"))
            .await
            .unwrap();
        assert_eq!(page.body, "moved");
        assert_eq!(page.final_url.path(), "/new");
    }

    #[tokio::test]
    async fn test_too_many_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
            .mount(&server)
            .await;

        let config = ProxyConfig {
            max_redirects: 2,
            ..test_config()
        };
        let err = fetcher(&config)
            .fetch(&url(&server, "/loop"))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::TooManyRedirects(2));
    }

    #[tokio::test]
    async fn test_redirect_to_private_host_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "http://169.254.169.254/latest/meta-data/"),
            )
            .mount(&server)
            .await;

        let err = fetcher(&test_config())
            .fetch(&url(&server, "/redirect"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, FetchError::RedirectBlocked(ValidationError::DisallowedHost { .. })),
            "{err:?}"
        );
    }

    #[test]
    fn test_is_markup_content_type() {
        assert!(is_markup_content_type("text/html"));
        assert!(is_markup_content_type("TEXT/HTML; charset=ISO-8859-1"));
        assert!(is_markup_content_type("application/xhtml+xml"));
        assert!(is_markup_content_type("text/plain"));
        assert!(!is_markup_content_type("application/json"));
        assert!(!is_markup_content_type("image/jpeg"));
        assert!(!is_markup_content_type("application/octet-stream"));
    }

    #[test]
    fn test_dns_failure_detection() {
        assert!(is_dns_failure(
            "error sending request: client error (connect): dns error: failed to lookup address information: name or service not known"
        ));
        assert!(!is_dns_failure("connection refused"));
    }

    #[test]
    fn test_host_limiters_are_shared_per_host() {
        let fetcher = fetcher(&test_config());
        let a = fetcher.host_limiter(&Url::parse("https://a.example/x").unwrap());
        let a2 = fetcher.host_limiter(&Url::parse("https://a.example/y").unwrap());
        let b = fetcher.host_limiter(&Url::parse("https://b.example/").unwrap());

        assert!(Arc::ptr_eq(&a, &a2));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.available_permits(), test_config().max_connections_per_host);
    }
}
