//! Error types for the embedding pipeline.

use std::time::Duration;

use thiserror::Error;

/// Reasons a target URL is rejected before any network call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The input is not an absolute URL with a host.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The scheme is something other than http or https.
    #[error("scheme '{0}' is not allowed")]
    DisallowedScheme(String),

    /// The host points at loopback, a private range, or the local network.
    #[error("host '{host}' is not allowed: {reason}")]
    DisallowedHost {
        /// The rejected host as it appeared in the parsed URL.
        host: String,
        /// Which rule rejected it.
        reason: &'static str,
    },
}

impl ValidationError {
    /// Stable machine code for this rejection.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "INVALID_URL",
            Self::DisallowedScheme(_) => "DISALLOWED_SCHEME",
            Self::DisallowedHost { .. } => "DISALLOWED_HOST",
        }
    }
}

/// Failures of the outbound fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The target host name could not be resolved.
    #[error("DNS resolution failed for {host}")]
    Dns {
        /// Host that failed to resolve.
        host: String,
    },

    /// The target refused the TCP connection.
    #[error("connection refused")]
    ConnectionRefused,

    /// The connection was reset or aborted mid-request.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// The request did not complete within the configured timeout.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The body exceeded the configured size bound; the transfer was aborted.
    #[error("response body exceeds {limit} bytes")]
    ContentTooLarge {
        /// Configured maximum body size.
        limit: u64,
    },

    /// The target answered with a non-2xx status.
    #[error("upstream returned HTTP {0}")]
    UpstreamStatus(u16),

    /// The redirect chain was longer than allowed.
    #[error("more than {0} redirects")]
    TooManyRedirects(usize),

    /// A redirect pointed at a host the SSRF guard rejects.
    #[error("redirect blocked: {0}")]
    RedirectBlocked(ValidationError),

    /// The response is not a markup document.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// Anything the transport reported that does not fit the kinds above.
    #[error("request failed: {0}")]
    Other(String),
}

/// Any failure that ends an embed request without a rewritten page.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbedError {
    /// The `url` parameter was absent or empty.
    #[error("missing url parameter")]
    MissingUrl,

    /// The target URL was rejected by the SSRF guard.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The outbound fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_codes_are_stable() {
        assert_eq!(
            ValidationError::InvalidUrl("x".to_string()).code(),
            "INVALID_URL"
        );
        assert_eq!(
            ValidationError::DisallowedScheme("ftp".to_string()).code(),
            "DISALLOWED_SCHEME"
        );
        assert_eq!(
            ValidationError::DisallowedHost {
                host: "localhost".to_string(),
                reason: "loopback address not allowed",
            }
            .code(),
            "DISALLOWED_HOST"
        );
    }

    #[test]
    fn disallowed_host_display() {
        let err = ValidationError::DisallowedHost {
            host: "10.0.0.1".to_string(),
            reason: "private address not allowed",
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.1"));
        assert!(msg.contains("private address"));
    }

    #[test]
    fn timeout_display_uses_millis() {
        let err = FetchError::Timeout(Duration::from_millis(8000));
        assert_eq!(err.to_string(), "request timed out after 8000ms");
    }

    #[test]
    fn embed_error_is_transparent() {
        let err: EmbedError = FetchError::UpstreamStatus(503).into();
        assert_eq!(err.to_string(), "upstream returned HTTP 503");
        assert!(matches!(err, EmbedError::Fetch(FetchError::UpstreamStatus(503))));

        let err: EmbedError = ValidationError::DisallowedScheme("file".to_string()).into();
        assert!(matches!(err, EmbedError::Validation(_)));
    }
}
