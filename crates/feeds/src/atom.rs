use feedrelay_common::types::{Author, ContentItem, Enclosure, FeedMetadata, Image};

use crate::xml::Node;
use crate::{FetchedFeed, parse_date};

/// Map an Atom 1.0 (`<feed>`) document.
pub(crate) fn from_tree(source_url: &str, root: &Node) -> FetchedFeed {
    let metadata = FeedMetadata {
        title: root.child_text("title"),
        description: root.child_text("subtitle"),
        link: alternate_link(root).unwrap_or_default(),
        language: root.attr("xml:lang").unwrap_or_default().to_string(),
        copyright: root.child_text("rights"),
        generator: root.child_text("generator"),
        feed_type: "atom".to_string(),
        feed_version: "1.0".to_string(),
    };

    let items = root
        .children_named("entry")
        .map(|e| map_entry(source_url, e))
        .collect();

    FetchedFeed { metadata, items }
}

fn map_entry(source_url: &str, entry: &Node) -> ContentItem {
    let updated_at = entry
        .first_text(&["updated"])
        .and_then(|s| parse_date(&s));
    // Entries without `published` fall back to `updated`.
    let published_at = entry
        .first_text(&["published"])
        .and_then(|s| parse_date(&s))
        .or(updated_at);

    let links = entry
        .children_named("link")
        .filter(|l| l.attr("rel").is_none_or(|r| r != "enclosure"))
        .filter_map(|l| l.attr("href"))
        .map(str::to_string)
        .collect();

    let enclosures = entry
        .children_named("link")
        .filter(|l| l.attr("rel") == Some("enclosure"))
        .filter_map(|l| {
            Some(Enclosure {
                url: l.attr("href")?.to_string(),
                mime_type: l.attr("type").unwrap_or_default().to_string(),
                length: l.attr("length").and_then(|v| v.trim().parse().ok()),
            })
        })
        .collect();

    let authors = entry
        .children_named("author")
        .map(|a| Author {
            name: a.child_text("name"),
            email: a.first_text(&["email"]),
        })
        .filter(|a| !a.name.is_empty() || a.email.is_some())
        .collect();

    let categories = entry
        .children_named("category")
        .filter_map(|c| c.attr("label").or_else(|| c.attr("term")))
        .map(str::to_string)
        .collect();

    let image = entry
        .child("media:thumbnail")
        .and_then(|t| t.attr("url"))
        .map(|url| Image {
            url: url.to_string(),
            title: None,
        });

    ContentItem {
        guid: entry.child_text("id"),
        title: entry.child_text("title"),
        summary: entry.child_text("summary"),
        body: entry.child_text("content"),
        link: alternate_link(entry).unwrap_or_default(),
        links,
        published_at,
        updated_at,
        authors,
        categories,
        image,
        enclosures,
        source_url: source_url.to_string(),
    }
}

/// `rel="alternate"` link, or the first link without a `rel`.
fn alternate_link(node: &Node) -> Option<String> {
    let links: Vec<&Node> = node.children_named("link").collect();
    links
        .iter()
        .find(|l| l.attr("rel") == Some("alternate"))
        .or_else(|| links.iter().find(|l| l.attr("rel").is_none()))
        .and_then(|l| l.attr("href"))
        .map(str::to_string)
}
