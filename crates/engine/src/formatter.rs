//! Message rendering: template substitution and Telegram-HTML sanitizing.
//!
//! Templates use `{{.Name}}` placeholders. Substitution is a single pass over
//! the template, so substituted values are never re-expanded. Placeholders
//! without a matching variable are left as written.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use feedrelay_common::types::{ContentItem, FeedMetadata};

/// Tags Telegram's HTML parse mode accepts, besides `<a href>`.
const ALLOWED_TAGS: &[&str] = &[
    "b",
    "strong",
    "i",
    "em",
    "u",
    "ins",
    "s",
    "strike",
    "del",
    "code",
    "pre",
    "blockquote",
];

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\.([A-Za-z]+)\}\}").expect("valid placeholder regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
static TAG_PARTS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^<\s*(/?)\s*([A-Za-z][A-Za-z0-9]*)([^>]*?)/?\s*>$").expect("valid tag parts regex")
});
static HREF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).expect("valid href regex")
});

/// Renders one item into the outgoing message text. Must be pure.
pub trait Formatter: Send + Sync {
    fn render(&self, item: &ContentItem, feed: &FeedMetadata, template: &str) -> String;
}

/// The default [`Formatter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateFormatter;

impl Formatter for TemplateFormatter {
    fn render(&self, item: &ContentItem, feed: &FeedMetadata, template: &str) -> String {
        let vars = template_vars(item, feed);
        substitute(template, &vars)
    }
}

/// Replace every known `{{.Name}}` in `template`.
pub fn substitute(template: &str, vars: &HashMap<&'static str, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn template_vars(item: &ContentItem, feed: &FeedMetadata) -> HashMap<&'static str, String> {
    let first_author = item.authors.first();
    let authors = item
        .authors
        .iter()
        .map(|a| match (&a.email, a.name.is_empty()) {
            (Some(email), true) => email.clone(),
            _ => a.name.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ");
    let enclosures = item
        .enclosures
        .iter()
        .map(|e| {
            let mut parts = vec![e.url.clone()];
            if !e.mime_type.is_empty() {
                parts.push(e.mime_type.clone());
            }
            if let Some(len) = e.length {
                parts.push(len.to_string());
            }
            parts.join(" | ")
        })
        .collect::<Vec<_>>()
        .join("; ");

    let mut vars = HashMap::new();
    vars.insert("Title", sanitize(&item.title));
    vars.insert("Description", sanitize(&item.summary));
    vars.insert("Content", sanitize(&item.body));
    vars.insert("Link", sanitize(&item.link));
    vars.insert("Links", sanitize(&item.links.join(", ")));
    vars.insert("Updated", item.updated_at.map(rfc2822).unwrap_or_default());
    vars.insert("UpdatedParsed", item.updated_at.map(readable).unwrap_or_default());
    vars.insert("Published", item.published_at.map(rfc2822).unwrap_or_default());
    vars.insert("PublishedParsed", item.published_at.map(readable).unwrap_or_default());
    vars.insert(
        "Author",
        sanitize(first_author.map(|a| a.name.as_str()).unwrap_or_default()),
    );
    vars.insert(
        "AuthorEmail",
        sanitize(first_author.and_then(|a| a.email.as_deref()).unwrap_or_default()),
    );
    vars.insert("Authors", sanitize(&authors));
    vars.insert("GUID", sanitize(&item.guid));
    vars.insert(
        "ImageURL",
        sanitize(item.image.as_ref().map(|i| i.url.as_str()).unwrap_or_default()),
    );
    vars.insert(
        "ImageTitle",
        sanitize(item.image.as_ref().and_then(|i| i.title.as_deref()).unwrap_or_default()),
    );
    vars.insert("Categories", sanitize(&item.categories.join(", ")));
    vars.insert("Enclosures", sanitize(&enclosures));

    vars.insert("FeedTitle", escape(&feed.title));
    vars.insert("FeedDescription", escape(&feed.description));
    vars.insert("FeedLink", escape(&feed.link));
    vars.insert("FeedLanguage", escape(&feed.language));
    vars.insert("FeedCopyright", escape(&feed.copyright));
    vars.insert("FeedGenerator", escape(&feed.generator));
    vars.insert("FeedType", escape(&feed.feed_type));
    vars.insert("FeedVersion", escape(&feed.feed_version));
    vars
}

fn rfc2822(dt: DateTime<Utc>) -> String {
    dt.to_rfc2822()
}

fn readable(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Decode entities, then escape for Telegram HTML. No tags survive.
pub fn escape(text: &str) -> String {
    html_escape::encode_text(&html_escape::decode_html_entities(text)).into_owned()
}

/// Reduce arbitrary HTML to the subset Telegram accepts.
///
/// Allowed tags are re-emitted without attributes (`<a>` keeps only `href`),
/// `<br>` becomes a newline and every other tag is dropped. Text between tags
/// is entity-decoded and re-escaped. The output is always balanced: stray
/// closing tags are dropped and unclosed ones are closed in order.
pub fn sanitize(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut open: Vec<String> = Vec::new();
    let mut last = 0;
    let mut dropped_anchors = 0usize;

    for m in TAG_RE.find_iter(html) {
        out.push_str(&escape(&html[last..m.start()]));
        last = m.end();

        let Some(parts) = TAG_PARTS_RE.captures(m.as_str()) else {
            continue;
        };
        let closing = !parts[1].is_empty();
        let name = parts[2].to_ascii_lowercase();

        match name.as_str() {
            "br" => out.push('\n'),
            "a" if closing => {
                if dropped_anchors > 0 {
                    dropped_anchors -= 1;
                } else {
                    close_tag(&mut out, &mut open, "a");
                }
            }
            "a" => match href(&parts[3]) {
                Some(url) => {
                    out.push_str("<a href=\"");
                    out.push_str(&html_escape::encode_double_quoted_attribute(&url));
                    out.push_str("\">");
                    open.push("a".to_string());
                }
                None => dropped_anchors += 1,
            },
            tag if ALLOWED_TAGS.contains(&tag) => {
                if closing {
                    close_tag(&mut out, &mut open, tag);
                } else {
                    out.push('<');
                    out.push_str(tag);
                    out.push('>');
                    open.push(tag.to_string());
                }
            }
            _ => {}
        }
    }

    out.push_str(&escape(&html[last..]));
    for tag in open.iter().rev() {
        push_close(&mut out, tag);
    }
    out
}

/// Close `tag` and everything opened inside it. Unmatched closes are dropped.
fn close_tag(out: &mut String, open: &mut Vec<String>, tag: &str) {
    let Some(pos) = open.iter().rposition(|t| t == tag) else {
        return;
    };
    for inner in open.drain(pos..).rev() {
        push_close(out, &inner);
    }
}

fn push_close(out: &mut String, tag: &str) {
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn href(attrs: &str) -> Option<String> {
    let caps = HREF_RE.captures(attrs)?;
    let raw = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
    let url = html_escape::decode_html_entities(raw.as_str()).trim().to_string();
    (!url.is_empty()).then_some(url)
}
