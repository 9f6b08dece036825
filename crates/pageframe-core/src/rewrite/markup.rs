//! Markup injected into every rewritten page.
//!
//! All dynamic values go through maud and are escaped.

use maud::{Markup, PreEscaped, html};

/// `id` of the injected banner element.
pub const BANNER_ID: &str = "pageframe-banner";

/// `id` of the injected style block.
pub const STYLE_ID: &str = "pageframe-style";

/// Resets the page margin and reserves room for the fixed banner.
pub const FRAME_CSS: &str = r#"
html,body{margin:0!important}
body{padding-top:40px!important}
#pageframe-banner{position:fixed;top:0;left:0;right:0;height:40px;z-index:2147483647;display:flex;align-items:center;gap:.75rem;padding:0 1rem;box-sizing:border-box;background:#111;color:#eee;font:14px/1 -apple-system,BlinkMacSystemFont,"Segoe UI",Roboto,sans-serif}
#pageframe-banner strong{font-weight:600;color:#fff;overflow:hidden;text-overflow:ellipsis;white-space:nowrap}
#pageframe-banner a{margin-left:auto;color:#9cf;text-decoration:none}
#pageframe-banner a:hover{text-decoration:underline}
"#;

/// `<base href="{origin}/">`.
pub fn base_tag(origin: &str) -> Markup {
    html! {
        base href=(format!("{origin}/"));
    }
}

/// The fixed style block.
pub fn style_block() -> Markup {
    html! {
        style id=(STYLE_ID) { (PreEscaped(FRAME_CSS)) }
    }
}

/// Informational banner naming the origin and linking to the original page.
pub fn banner(origin: &str, original_url: &str) -> Markup {
    html! {
        div id=(BANNER_ID) role="note" {
            span { "Embedded copy of" }
            strong { (origin) }
            a href=(original_url) target="_blank" rel="noopener noreferrer" {
                "Open original"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_tag_has_trailing_slash() {
        let markup = base_tag("https://example.com").into_string();
        assert_eq!(markup, r#"<base href="https://example.com/">"#);
    }

    #[test]
    fn test_banner_escapes_values() {
        let markup = banner(
            "https://example.com",
            r#"https://example.com/?q="><script>alert(1)</script>"#,
        )
        .into_string();
        assert!(markup.contains(BANNER_ID));
        assert!(!markup.contains("<script>"));
        assert!(markup.contains("&quot;"));
    }

    #[test]
    fn test_style_block() {
        let markup = style_block().into_string();
        assert!(markup.starts_with(r#"<style id="pageframe-style">"#));
        assert!(markup.contains("padding-top:40px"));
    }
}
