//! Target URL validation (SSRF guard).
//!
//! Rules, applied in order:
//!
//! 1. The input must parse as an absolute URL with a host.
//! 2. The scheme must be `http` or `https`.
//! 3. Under the restricted policy the host must not be:
//!    - loopback (`localhost`, `*.localhost`, 127.0.0.0/8, ::1)
//!    - a private range (10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16)
//!    - an mDNS name ending in `.local`
//!    - unspecified (0.0.0.0, ::)
//!    - link-local (169.254.0.0/16 including cloud metadata, fe80::/10)
//!    - IPv6 unique local (fc00::/7)
//!    - IPv4-mapped IPv6 (::ffff:a.b.c.d) wrapping any of the IPv4 cases
//!
//! The permissive policy only lifts the loopback rule. Everything here is
//! pure: no DNS lookups, no I/O.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::error::ValidationError;

/// Which hosts the guard lets through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostPolicy {
    /// Allow `localhost` and loopback addresses.
    pub allow_loopback: bool,
}

impl HostPolicy {
    /// Production policy: loopback is rejected.
    pub const RESTRICTED: Self = Self {
        allow_loopback: false,
    };

    /// Testing policy: loopback is allowed, private ranges are still rejected.
    pub const PERMISSIVE: Self = Self {
        allow_loopback: true,
    };
}

/// Validate a raw target URL against the policy.
///
/// Returns the parsed URL on success.
///
/// # Examples
///
/// ```
/// use pageframe_core::{HostPolicy, ValidationError, validate};
///
/// assert!(validate("https://example.com/page", HostPolicy::RESTRICTED).is_ok());
/// assert!(matches!(
///     validate("ftp://example.com", HostPolicy::RESTRICTED),
///     Err(ValidationError::DisallowedScheme(_))
/// ));
/// assert!(matches!(
///     validate("http://127.0.0.1/admin", HostPolicy::RESTRICTED),
///     Err(ValidationError::DisallowedHost { .. })
/// ));
/// ```
pub fn validate(raw_url: &str, policy: HostPolicy) -> Result<Url, ValidationError> {
    let url = Url::parse(raw_url.trim())
        .map_err(|e| ValidationError::InvalidUrl(format!("{raw_url}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::DisallowedScheme(url.scheme().to_string()));
    }

    let host = url
        .host()
        .ok_or_else(|| ValidationError::InvalidUrl(format!("{raw_url}: missing host")))?;

    let rejection = match &host {
        Host::Domain(domain) => check_domain(domain, policy),
        Host::Ipv4(ip) => check_ipv4(*ip, policy),
        Host::Ipv6(ip) => check_ipv6(*ip, policy),
    };

    if let Some(reason) = rejection {
        return Err(ValidationError::DisallowedHost {
            host: host.to_string(),
            reason,
        });
    }

    Ok(url)
}

/// Check a DNS name. Returns `Some(reason)` if rejected.
fn check_domain(domain: &str, policy: HostPolicy) -> Option<&'static str> {
    // The url crate lowercases domains; a trailing dot is still the same name.
    let domain = domain.trim_end_matches('.');

    if domain.is_empty() {
        return Some("empty host not allowed");
    }

    if domain == "localhost" || domain.ends_with(".localhost") {
        return (!policy.allow_loopback).then_some("loopback address not allowed");
    }

    // .local (mDNS/Bonjour)
    if domain.ends_with(".local") {
        return Some(".local addresses not allowed");
    }

    None
}

/// Check an IPv4 literal. Returns `Some(reason)` if rejected.
fn check_ipv4(ip: Ipv4Addr, policy: HostPolicy) -> Option<&'static str> {
    if ip.is_loopback() {
        return (!policy.allow_loopback).then_some("loopback address not allowed");
    }
    if ip.is_unspecified() || ip.octets()[0] == 0 {
        return Some("unspecified address (0.0.0.0/8) not allowed");
    }
    if is_ipv4_private(ip) {
        return Some("private address not allowed");
    }
    // 169.254.0.0/16, which includes the 169.254.169.254 metadata endpoint
    if ip.is_link_local() {
        return Some("link-local address not allowed");
    }
    None
}

/// Check an IPv6 literal. Returns `Some(reason)` if rejected.
fn check_ipv6(ip: Ipv6Addr, policy: HostPolicy) -> Option<&'static str> {
    if ip.is_loopback() {
        return (!policy.allow_loopback).then_some("loopback address not allowed");
    }
    if ip.is_unspecified() {
        return Some("unspecified address (::) not allowed");
    }
    // IPv4-mapped IPv6 (::ffff:x.x.x.x) could bypass the IPv4 rules
    if let Some(v4) = ip.to_ipv4_mapped() {
        return check_ipv4(v4, policy);
    }
    let segments = ip.segments();
    // fe80::/10
    if (segments[0] & 0xffc0) == 0xfe80 {
        return Some("IPv6 link-local address not allowed");
    }
    // fc00::/7
    if (segments[0] & 0xfe00) == 0xfc00 {
        return Some("IPv6 unique local address not allowed");
    }
    None
}

fn is_ipv4_private(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    // 10.0.0.0/8
    octets[0] == 10
    // 172.16.0.0/12
    || (octets[0] == 172 && (16..=31).contains(&octets[1]))
    // 192.168.0.0/16
    || (octets[0] == 192 && octets[1] == 168)
}
