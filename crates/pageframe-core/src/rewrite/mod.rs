//! HTML rewriting for embedded pages.
//!
//! [`Rewriter::rewrite`] applies, in order:
//!
//! 1. removal of tracking `<script>` elements (denylisted `src` or inline
//!    tracking calls)
//! 2. removal of denylisted `<iframe>`, `<object>` and `<embed>` elements
//! 3. absolutization of root-relative (`/x`) and dot-relative (`./x`, `../x`)
//!    `href`/`src` values on `<a>`, `<img>`, `<link>` and `<script>`
//! 4. a `<base href="origin/">` as the first child of `<head>`
//! 5. the frame style block in `<head>` and the banner as the first child of
//!    `<body>`
//!
//! Two strategies implement the same contract. Documents up to the streaming
//! threshold go through lol_html's element rewriter; larger ones are patched
//! with regexes, which is cheaper and never builds per-element state.
//!
//! Rewriting never fails: if lol_html rejects the input, the original markup
//! is returned unchanged.

pub mod denylist;
pub mod markup;
mod pattern;
mod streaming;

use std::sync::LazyLock;
use std::time::Instant;

use metrics::{counter, histogram};
use regex::Regex;
use url::Url;

/// Which implementation rewrites a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteStrategy {
    /// lol_html element handlers.
    Streaming,
    /// Regex patching for very large documents.
    Pattern,
}

/// Rewrites fetched HTML for display inside the caller's site.
#[derive(Debug, Clone)]
pub struct Rewriter {
    streaming_threshold: usize,
}

impl Default for Rewriter {
    fn default() -> Self {
        Self::new(crate::ProxyConfig::default().streaming_threshold_bytes)
    }
}

impl Rewriter {
    /// Documents longer than `streaming_threshold` bytes use the pattern strategy.
    pub fn new(streaming_threshold: usize) -> Self {
        Self {
            streaming_threshold,
        }
    }

    /// Strategy used for a document of `len` bytes.
    pub fn strategy_for(&self, len: usize) -> RewriteStrategy {
        if len > self.streaming_threshold {
            RewriteStrategy::Pattern
        } else {
            RewriteStrategy::Streaming
        }
    }

    /// Rewrite `html` fetched from `base_url`.
    pub fn rewrite(&self, html: &str, base_url: &Url) -> String {
        self.rewrite_page(html, base_url, base_url)
    }

    /// Rewrite `html` that was requested as `requested_url` and served from
    /// `final_url` after redirects.
    ///
    /// Relative URLs resolve against `final_url`; the banner links back to
    /// `requested_url`.
    pub fn rewrite_page(&self, html: &str, final_url: &Url, requested_url: &Url) -> String {
        self.run(self.strategy_for(html.len()), html, final_url, requested_url)
    }

    /// Rewrite with an explicit strategy.
    pub fn rewrite_with(&self, strategy: RewriteStrategy, html: &str, base_url: &Url) -> String {
        self.run(strategy, html, base_url, base_url)
    }

    fn run(
        &self,
        strategy: RewriteStrategy,
        html: &str,
        base_url: &Url,
        requested_url: &Url,
    ) -> String {
        let started = Instant::now();
        let ctx = RewriteContext::new(base_url, requested_url);

        let result = match strategy {
            RewriteStrategy::Streaming => streaming::rewrite(html, &ctx),
            RewriteStrategy::Pattern => Ok(pattern::rewrite(html, &ctx)),
        };

        histogram!("proxy_rewrite_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(
                    url = %base_url,
                    strategy = ?strategy,
                    error = %e,
                    "rewrite failed, serving original markup"
                );
                counter!("proxy_rewrite_failures_total").increment(1);
                html.to_string()
            }
        }
    }
}

/// Per-document values shared by both strategies.
pub(crate) struct RewriteContext {
    /// `scheme://host[:port]/`, the base for resolving relative URLs.
    origin_url: Url,
    /// `<base>` tag followed by the style block.
    head_markup: String,
    /// Banner element.
    banner_markup: String,
}

impl RewriteContext {
    pub(crate) fn new(base_url: &Url, requested_url: &Url) -> Self {
        let origin = base_url.origin().ascii_serialization();
        // Opaque origins ("null") only come from non-http URLs, which never get here.
        let origin_url = Url::parse(&format!("{origin}/")).unwrap_or_else(|_| base_url.clone());

        let head_markup = format!(
            "{}{}",
            markup::base_tag(&origin).into_string(),
            markup::style_block().into_string()
        );
        let banner_markup = markup::banner(&origin, requested_url.as_str()).into_string();

        Self {
            origin_url,
            head_markup,
            banner_markup,
        }
    }

    /// Absolute replacement for a root- or dot-relative URL, if it is one.
    pub(crate) fn absolutize(&self, value: &str) -> Option<String> {
        resolve_relative(value, &self.origin_url)
    }
}

/// Resolve `value` against `origin_url` when it is root-relative (`/x`) or
/// dot-relative (`./x`, `../x`).
///
/// Protocol-relative (`//host/x`), absolute, `mailto:`, `tel:`, `data:`,
/// `javascript:` and fragment-only values return `None`.
pub fn resolve_relative(value: &str, origin_url: &Url) -> Option<String> {
    let value = value.trim();

    if value.starts_with("//") {
        return None;
    }
    if !(value.starts_with('/') || value.starts_with("./") || value.starts_with("../")) {
        return None;
    }

    origin_url.join(value).ok().map(String::from)
}

/// `<!doctype>` and `<html>` prefix, after which head markup goes when the
/// document has no `<head>`.
static DOCUMENT_PREFIX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*(?:<!--.*?-->\s*)*(?:<!doctype[^>]*>\s*)?(?:<html\b[^>]*>)?")
        .expect("document prefix regex should compile")
});

/// Insert `snippet` after the doctype and `<html>` start tag, or at the start.
pub(crate) fn insert_at_document_start(html: &str, snippet: &str) -> String {
    let at = DOCUMENT_PREFIX_REGEX
        .find(html)
        .map(|m| m.end())
        .unwrap_or(0);

    let mut out = String::with_capacity(html.len() + snippet.len());
    out.push_str(&html[..at]);
    out.push_str(snippet);
    out.push_str(&html[at..]);
    out
}

static HEAD_CLOSE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</head\s*>").expect("head close regex should compile")
});

/// Add head markup and banner to a document missing `<head>` or `<body>`.
pub(crate) fn insert_missing(
    html: String,
    ctx: &RewriteContext,
    has_head: bool,
    has_body: bool,
) -> String {
    match (has_head, has_body) {
        (true, true) => html,
        (false, false) => insert_at_document_start(
            &html,
            &format!("{}{}", ctx.head_markup, ctx.banner_markup),
        ),
        (false, true) => insert_at_document_start(&html, &ctx.head_markup),
        (true, false) => match HEAD_CLOSE_REGEX.find(&html) {
            Some(m) => {
                let mut out = String::with_capacity(html.len() + ctx.banner_markup.len());
                out.push_str(&html[..m.end()]);
                out.push_str(&ctx.banner_markup);
                out.push_str(&html[m.end()..]);
                out
            }
            None => html + &ctx.banner_markup,
        },
    }
}
