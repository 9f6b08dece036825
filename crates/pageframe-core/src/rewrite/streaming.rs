//! lol_html element-handler strategy.

use std::cell::Cell;

use lol_html::errors::RewritingError;
use lol_html::html_content::{ContentType, Element};
use lol_html::{HtmlRewriter, Settings, element};

use super::denylist::{is_tracker_src, strip_inline_trackers};
use super::{RewriteContext, insert_missing};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub(super) fn rewrite(html: &str, ctx: &RewriteContext) -> Result<String, RewritingError> {
    let html = strip_inline_trackers(html);

    let saw_head = Cell::new(false);
    let saw_body = Cell::new(false);
    let mut output = Vec::with_capacity(html.len() + 2048);

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("script[src]", |el| {
                    if el.get_attribute("src").is_some_and(|src| is_tracker_src(&src)) {
                        el.remove();
                        return Ok(());
                    }
                    absolutize_attr(el, "src", ctx)
                }),
                element!("iframe[src], embed[src]", |el| {
                    if el.get_attribute("src").is_some_and(|src| is_tracker_src(&src)) {
                        el.remove();
                    }
                    Ok(())
                }),
                element!("object[data]", |el| {
                    if el.get_attribute("data").is_some_and(|data| is_tracker_src(&data)) {
                        el.remove();
                    }
                    Ok(())
                }),
                element!("a[href], link[href]", |el| absolutize_attr(el, "href", ctx)),
                element!("img[src]", |el| absolutize_attr(el, "src", ctx)),
                element!("head", |el| {
                    if !saw_head.replace(true) {
                        el.prepend(&ctx.head_markup, ContentType::Html);
                    }
                    Ok(())
                }),
                element!("body", |el| {
                    if !saw_body.replace(true) {
                        el.prepend(&ctx.banner_markup, ContentType::Html);
                    }
                    Ok(())
                }),
            ],
            ..Settings::new()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    rewriter.write(html.as_bytes())?;
    rewriter.end()?;

    let out = String::from_utf8_lossy(&output).into_owned();
    Ok(insert_missing(out, ctx, saw_head.get(), saw_body.get()))
}

fn absolutize_attr(el: &mut Element<'_, '_>, name: &str, ctx: &RewriteContext) -> HandlerResult {
    if let Some(value) = el.get_attribute(name)
        && let Some(absolute) = ctx.absolutize(&value)
    {
        el.set_attribute(name, &absolute)?;
    }
    Ok(())
}
