//! Maps pipeline failures to caller-facing error reports.
//!
//! Every failure becomes an [`ErrorReport`] with a stable code, an HTTP
//! status, a message and suggestions. The one exception is a DNS failure for
//! a host in [`DEMO_HOSTS`], which yields a labeled placeholder page so demos
//! keep working on machines without outbound DNS.

use chrono::{DateTime, Utc};
use maud::{DOCTYPE, html};
use serde::Serialize;
use url::Url;

use crate::error::{EmbedError, FetchError, ValidationError};

/// Hosts that get placeholder content when their name does not resolve.
pub const DEMO_HOSTS: &[&str] = &[
    "example.com",
    "www.example.com",
    "example.org",
    "www.example.org",
    "example.net",
    "www.example.net",
];

/// Structured, caller-visible description of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    /// Stable machine code, e.g. `DNS_ERROR` or `HTTP_404`.
    pub code: String,
    /// HTTP status to answer with.
    pub status: u16,
    /// Human readable summary.
    pub message: String,
    /// One to four things the caller can try.
    pub suggestions: Vec<String>,
    /// The target URL as the caller supplied it.
    pub target_url: String,
    /// When the failure was classified.
    pub timestamp: DateTime<Utc>,
    /// Raw diagnostic text; only set in diagnostic mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorReport {
    fn new(
        code: impl Into<String>,
        status: u16,
        message: impl Into<String>,
        suggestions: &[&str],
        target_url: &str,
    ) -> Self {
        Self {
            code: code.into(),
            status,
            message: message.into(),
            suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
            target_url: target_url.to_string(),
            timestamp: Utc::now(),
            details: None,
        }
    }

    /// Attach raw diagnostic text.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Placeholder content for an unreachable demo host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPage {
    /// Unrewritten placeholder HTML.
    pub html: String,
    /// The demo host it stands in for.
    pub host: String,
}

/// Outcome of classifying a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Answer with a structured error.
    Report(ErrorReport),
    /// Answer with placeholder content instead.
    Fallback(FallbackPage),
}

/// Classify `error` for the request that targeted `target_url`.
pub fn classify(error: &EmbedError, target_url: &str) -> Classification {
    if let EmbedError::Fetch(FetchError::Dns { .. }) = error
        && let Some(host) = demo_host(target_url)
    {
        return Classification::Fallback(FallbackPage {
            html: fallback_html(&host, target_url),
            host,
        });
    }

    Classification::Report(error_report(error, target_url))
}

/// Host of `target_url` if it is exactly one of [`DEMO_HOSTS`].
fn demo_host(target_url: &str) -> Option<String> {
    let url = Url::parse(target_url.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    DEMO_HOSTS.contains(&host.as_str()).then_some(host)
}

/// Structured report for `error`, without the demo-host fallback.
pub fn error_report(error: &EmbedError, target_url: &str) -> ErrorReport {
    match error {
        EmbedError::MissingUrl => ErrorReport::new(
            "MISSING_URL",
            400,
            "No target URL was given",
            &["Pass the page to embed as the url query parameter, e.g. /proxy?url=https://example.com"],
            target_url,
        ),
        EmbedError::Validation(e) => validation_report(e, target_url),
        EmbedError::Fetch(e) => fetch_report(e, target_url),
    }
}

fn validation_report(error: &ValidationError, target_url: &str) -> ErrorReport {
    match error {
        ValidationError::InvalidUrl(_) => ErrorReport::new(
            error.code(),
            400,
            "The target is not a valid absolute URL",
            &[
                "Include the scheme, e.g. https://example.com",
                "Percent-encode the url parameter",
            ],
            target_url,
        ),
        ValidationError::DisallowedScheme(scheme) => ErrorReport::new(
            error.code(),
            400,
            format!("The '{scheme}' scheme cannot be embedded"),
            &["Only http and https pages can be embedded"],
            target_url,
        ),
        ValidationError::DisallowedHost { .. } => ErrorReport::new(
            error.code(),
            403,
            "The target host is on a private or local network",
            &[
                "Embed a publicly reachable address",
                "Local addresses are only allowed when loopback access is enabled",
            ],
            target_url,
        ),
    }
}

fn fetch_report(error: &FetchError, target_url: &str) -> ErrorReport {
    match error {
        FetchError::Dns { host } => ErrorReport::new(
            "DNS_ERROR",
            404,
            format!("The domain '{host}' could not be found"),
            &[
                "Check the domain for typos",
                "Make sure the site exists and is online",
                "Try again later if the domain was registered recently",
            ],
            target_url,
        ),
        FetchError::ConnectionRefused => ErrorReport::new(
            "CONNECTION_REFUSED",
            502,
            "The website refused the connection",
            &[
                "The site may be down for maintenance",
                "Check that the port in the URL is correct",
                "Try again in a few minutes",
            ],
            target_url,
        ),
        FetchError::ConnectionReset => ErrorReport::new(
            "CONNECTION_RESET",
            502,
            "The connection was reset by the website",
            &[
                "The site may be blocking automated requests",
                "Try again in a few minutes",
            ],
            target_url,
        ),
        FetchError::Timeout(after) => ErrorReport::new(
            "TIMEOUT",
            504,
            format!(
                "The website took longer than {}s to respond",
                after.as_secs_f64()
            ),
            &[
                "The site may be slow or overloaded",
                "Try again in a few minutes",
                "Try a lighter page on the same site",
            ],
            target_url,
        ),
        FetchError::ContentTooLarge { limit } => ErrorReport::new(
            "CONTENT_TOO_LARGE",
            413,
            format!("The page is larger than {}", human_size(*limit)),
            &[
                "Embed a smaller page",
                "Link to the page directly instead",
            ],
            target_url,
        ),
        FetchError::UpstreamStatus(status) => upstream_report(*status, target_url),
        FetchError::TooManyRedirects(max) => ErrorReport::new(
            "TOO_MANY_REDIRECTS",
            502,
            format!("The website redirected more than {max} times"),
            &[
                "Use the final address of the page",
                "The site may have a redirect loop",
            ],
            target_url,
        ),
        FetchError::RedirectBlocked(_) => ErrorReport::new(
            "REDIRECT_BLOCKED",
            403,
            "The website redirected to a private or local address",
            &["Embed a page that does not redirect to an internal host"],
            target_url,
        ),
        FetchError::UnsupportedContentType(content_type) => ErrorReport::new(
            "UNSUPPORTED_CONTENT_TYPE",
            415,
            format!("The target is '{content_type}', not an HTML page"),
            &[
                "Embed an HTML page",
                "Link to files such as images or PDFs directly",
            ],
            target_url,
        ),
        FetchError::Other(_) => ErrorReport::new(
            "UNKNOWN_ERROR",
            500,
            "The page could not be loaded",
            &[
                "Check that the URL is correct",
                "Try again in a few minutes",
            ],
            target_url,
        ),
    }
}

/// Whole MB, KB, or bytes, whichever unit `bytes` fills.
fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    match bytes {
        b if b >= MB => format!("{} MB", b / MB),
        b if b >= KB => format!("{} KB", b / KB),
        b => format!("{b} bytes"),
    }
}

fn upstream_report(status: u16, target_url: &str) -> ErrorReport {
    let code = format!("HTTP_{status}");
    // Only error statuses are forwarded as-is.
    let forwarded = if (400..=599).contains(&status) {
        status
    } else {
        502
    };

    match status {
        403 => ErrorReport::new(
            code,
            forwarded,
            "The website does not allow access to this page",
            &[
                "The site may block embedding or automated access",
                "Check whether the page requires a login",
                "Link to the page directly instead",
            ],
            target_url,
        ),
        404 => ErrorReport::new(
            code,
            forwarded,
            "The page was not found on the website",
            &[
                "Check the path for typos",
                "The page may have moved; try the site's home page",
            ],
            target_url,
        ),
        500..=599 => ErrorReport::new(
            code,
            forwarded,
            format!("The website had a server error ({status})"),
            &[
                "The problem is on the website's side",
                "Try again in a few minutes",
            ],
            target_url,
        ),
        _ => ErrorReport::new(
            code,
            forwarded,
            format!("The website answered with HTTP {status}"),
            &["Check that the URL is correct", "Try again later"],
            target_url,
        ),
    }
}

fn fallback_html(host: &str, target_url: &str) -> String {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                title { "Placeholder for " (host) }
            }
            body {
                main {
                    p { strong { "Placeholder content" } }
                    h1 { (host) }
                    p {
                        "This is generated demo content. " (host)
                        " could not be resolved from this server, so the real page was not loaded."
                    }
                    p {
                        "Requested: " code { (target_url) }
                    }
                    p {
                        a href="/" { "Home" }
                    }
                }
            }
        }
    }
    .into_string()
}
