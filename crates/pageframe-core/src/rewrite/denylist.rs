//! Tracking-vendor denylist.
//!
//! Matching is substring-based. False negatives are acceptable; the patterns
//! are kept specific to avoid removing first-party scripts.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Substrings of `src` URLs that mark a script or frame as tracking.
pub const TRACKER_SRC_PATTERNS: &[&str] = &[
    "google-analytics.com",
    "googletagmanager.com",
    "/gtag/js",
    "/analytics.js",
    "/ga.js",
    "doubleclick.net",
    "connect.facebook.net",
    "facebook.com/tr",
    "platform.twitter.com/widgets",
    "hotjar.com",
    "clarity.ms",
    "mixpanel.com",
    "cdn.segment.com",
    "static.ads-twitter.com",
    "snap.licdn.com",
    "addthis.com",
    "sharethis.com",
];

/// Known tracking calls in inline script bodies.
static INLINE_TRACKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bgtag\s*\(|\bga\s*\(|_gaq\.push|dataLayer\.push|GoogleAnalyticsObject|\bfbq\s*\(|_hmt\.push|_paq\.push|\bhj\s*\(|\bclarity\s*\(|mixpanel\.init",
    )
    .expect("inline tracker regex should compile")
});

/// `<script ...>body</script>` with attributes and body captured.
static SCRIPT_ELEMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>")
        .expect("script element regex should compile")
});

static SRC_ATTR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|\s)src\s*="#).expect("src attribute regex should compile")
});

/// Whether a `src` (or `data`) URL points at a tracking vendor.
pub fn is_tracker_src(src: &str) -> bool {
    let src = src.trim().to_ascii_lowercase();
    TRACKER_SRC_PATTERNS.iter().any(|p| src.contains(p))
}

/// Whether an inline script body contains a known tracking call.
pub fn is_tracker_inline(body: &str) -> bool {
    INLINE_TRACKER_REGEX.is_match(body)
}

/// Remove inline `<script>` elements (no `src`) whose body is tracking code.
///
/// Scripts with a `src` are left for the caller's strategy to handle.
pub fn strip_inline_trackers(html: &str) -> Cow<'_, str> {
    SCRIPT_ELEMENT_REGEX.replace_all(html, |caps: &regex::Captures| {
        let attrs = &caps[1];
        let body = &caps[2];
        if !SRC_ATTR_REGEX.is_match(attrs) && is_tracker_inline(body) {
            String::new()
        } else {
            caps[0].to_string()
        }
    })
}
