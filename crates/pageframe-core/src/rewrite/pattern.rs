//! Regex strategy for documents too large to run through lol_html.
//!
//! Works on raw tag text. Markup inside comments or script bodies that looks
//! like a tag is treated as one.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::denylist::{is_tracker_src, strip_inline_trackers};
use super::{RewriteContext, insert_missing};

static SCRIPT_WITH_SRC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script\b[^>]*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))[^>]*>.*?</script\s*>"#)
        .expect("script src regex should compile")
});

static EMBEDDED_CONTENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<(iframe|object)\b([^>]*)>.*?</(?:iframe|object)\s*>|<embed\b([^>]*)>"#,
    )
    .expect("embedded content regex should compile")
});

static SOURCE_ATTR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\s(?:src|data)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("source attribute regex should compile")
});

static URL_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(a|link|img|script)\b[^>]*>").expect("url tag regex should compile")
});

static HREF_ATTR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\shref\s*=\s*)(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("href regex should compile")
});

static SRC_ATTR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\ssrc\s*=\s*)(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("src regex should compile")
});

static HEAD_OPEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head\b[^>]*>").expect("head regex should compile"));

static BODY_OPEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<body\b[^>]*>").expect("body regex should compile"));

/// First non-empty quoted or bare attribute value among capture groups.
fn attr_value<'h>(caps: &Captures<'h>, groups: &[usize]) -> Option<&'h str> {
    groups
        .iter()
        .find_map(|&i| caps.get(i))
        .map(|m| m.as_str())
}

pub(super) fn rewrite(html: &str, ctx: &RewriteContext) -> String {
    let html = strip_inline_trackers(html);

    let html = SCRIPT_WITH_SRC_REGEX.replace_all(&html, |caps: &Captures| {
        match attr_value(caps, &[1, 2, 3]) {
            Some(src) if is_tracker_src(src) => String::new(),
            _ => caps[0].to_string(),
        }
    });

    let html = EMBEDDED_CONTENT_REGEX.replace_all(&html, |caps: &Captures| {
        let attrs = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        let tracker = SOURCE_ATTR_REGEX
            .captures(attrs)
            .and_then(|c| attr_value(&c, &[1, 2, 3]).map(is_tracker_src))
            .unwrap_or(false);
        if tracker {
            String::new()
        } else {
            caps[0].to_string()
        }
    });

    let html = URL_TAG_REGEX.replace_all(&html, |caps: &Captures| {
        let attr_regex = if caps[1].eq_ignore_ascii_case("a") || caps[1].eq_ignore_ascii_case("link")
        {
            &*HREF_ATTR_REGEX
        } else {
            &*SRC_ATTR_REGEX
        };
        attr_regex
            .replace(&caps[0], |attr: &Captures| {
                let value = attr_value(attr, &[2, 3, 4]).unwrap_or("");
                match ctx.absolutize(value) {
                    Some(absolute) => format!("{}\"{}\"", &attr[1], absolute.replace('"', "%22")),
                    None => attr[0].to_string(),
                }
            })
            .into_owned()
    });

    let mut out = html.into_owned();

    let has_head = match HEAD_OPEN_REGEX.find(&out) {
        Some(m) => {
            out.insert_str(m.end(), &ctx.head_markup);
            true
        }
        None => false,
    };
    let has_body = match BODY_OPEN_REGEX.find(&out) {
        Some(m) => {
            out.insert_str(m.end(), &ctx.banner_markup);
            true
        }
        None => false,
    };

    insert_missing(out, ctx, has_head, has_body)
}
