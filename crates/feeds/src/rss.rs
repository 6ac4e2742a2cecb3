use chrono::{DateTime, Utc};

use feedrelay_common::types::{Author, ContentItem, Enclosure, FeedMetadata, Image};

use crate::xml::Node;
use crate::{FetchError, FetchedFeed, parse_date};

/// Map an RSS 2.0 (`<rss>`) or RSS 1.0 (`<rdf:RDF>`) document.
///
/// RSS 2.0 nests items inside `<channel>`; RSS 1.0 places them next to it.
pub(crate) fn from_tree(source_url: &str, root: &Node) -> Result<FetchedFeed, FetchError> {
    let is_rdf = root.local_name() == "RDF";
    let channel = root
        .child("channel")
        .ok_or_else(|| FetchError::Parse("RSS document has no <channel>".to_string()))?;

    let metadata = FeedMetadata {
        title: channel.child_text("title"),
        description: channel.child_text("description"),
        link: channel.child_text("link"),
        language: channel
            .first_text(&["language", "dc:language"])
            .unwrap_or_default(),
        copyright: channel
            .first_text(&["copyright", "dc:rights"])
            .unwrap_or_default(),
        generator: channel.child_text("generator"),
        feed_type: "rss".to_string(),
        feed_version: if is_rdf {
            "1.0".to_string()
        } else {
            root.attr("version").unwrap_or("2.0").to_string()
        },
    };

    let item_parent = if is_rdf { root } else { channel };
    let items = item_parent
        .children_named("item")
        .map(|it| map_item(source_url, it))
        .collect();

    Ok(FetchedFeed { metadata, items })
}

fn map_item(source_url: &str, it: &Node) -> ContentItem {
    let link = it.child_text("link");
    let mut links: Vec<String> = it
        .children_named("link")
        .map(|l| l.text.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    links.dedup();

    let guid = it
        .first_text(&["guid"])
        .or_else(|| it.attr("rdf:about").map(str::to_string))
        .unwrap_or_default();

    let published_at: Option<DateTime<Utc>> = it
        .first_text(&["pubDate", "dc:date"])
        .and_then(|s| parse_date(&s));

    let updated_at = it
        .first_text(&["atom:updated", "dcterms:modified"])
        .and_then(|s| parse_date(&s));

    let mut authors: Vec<Author> = it
        .children_named("author")
        .map(|a| parse_rss_author(a.text.trim()))
        .filter(|a| !a.name.is_empty() || a.email.is_some())
        .collect();
    authors.extend(
        it.children_named("dc:creator")
            .map(|c| c.text.trim().to_string())
            .filter(|n| !n.is_empty())
            .map(|name| Author { name, email: None }),
    );

    let categories = it
        .children_named("category")
        .chain(it.children_named("dc:subject"))
        .map(|c| c.text.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let enclosures = it
        .children_named("enclosure")
        .filter_map(|e| {
            Some(Enclosure {
                url: e.attr("url")?.to_string(),
                mime_type: e.attr("type").unwrap_or_default().to_string(),
                length: e.attr("length").and_then(|l| l.trim().parse().ok()),
            })
        })
        .collect();

    ContentItem {
        guid,
        title: it.child_text("title"),
        summary: it.child_text("description"),
        body: it.child_text("content:encoded"),
        link,
        links,
        published_at,
        updated_at,
        authors,
        categories,
        image: item_image(it),
        enclosures,
        source_url: source_url.to_string(),
    }
}

fn item_image(it: &Node) -> Option<Image> {
    if let Some(img) = it.child("image") {
        let url = img.first_text(&["url"]).unwrap_or_else(|| img.text.trim().to_string());
        if !url.is_empty() {
            return Some(Image {
                url,
                title: img.first_text(&["title"]),
            });
        }
    }
    if let Some(url) = it.child("media:thumbnail").and_then(|t| t.attr("url")) {
        return Some(Image {
            url: url.to_string(),
            title: None,
        });
    }
    it.children_named("media:content")
        .find(|m| {
            m.attr("medium") == Some("image")
                || m.attr("type").is_some_and(|t| t.starts_with("image/"))
        })
        .and_then(|m| m.attr("url"))
        .map(|url| Image {
            url: url.to_string(),
            title: None,
        })
}

/// RSS `<author>` is usually `email (Name)`; plain names are accepted too.
fn parse_rss_author(raw: &str) -> Author {
    if let Some((email, rest)) = raw.split_once('(') {
        let name = rest.trim_end().trim_end_matches(')').trim().to_string();
        let email = email.trim();
        return Author {
            name,
            email: (!email.is_empty()).then(|| email.to_string()),
        };
    }
    if raw.contains('@') && !raw.contains(' ') {
        return Author {
            name: String::new(),
            email: Some(raw.to_string()),
        };
    }
    Author {
        name: raw.to_string(),
        email: None,
    }
}
