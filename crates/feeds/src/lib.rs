//! Feed fetching and parsing.
//!
//! [`FeedFetcher`] is the seam the poller depends on; [`HttpFeedFetcher`] is
//! the production implementation. [`parse_feed`] turns an RSS 2.0, RSS 1.0
//! (RDF) or Atom document into [`ContentItem`]s in document order, which for
//! well-formed feeds is newest first.

pub mod atom;
pub mod rss;
mod xml;


use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use feedrelay_common::types::{ContentItem, FeedMetadata};

/// A fetched and parsed feed.
#[derive(Debug, Clone, Default)]
pub struct FetchedFeed {
    pub metadata: FeedMetadata,
    pub items: Vec<ContentItem>,
}

/// Source unreachable or unparsable.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Anything that can produce the current items of a source.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError>;
}

/// Fetches feeds over HTTP(S) with `reqwest`.
#[derive(Clone)]
pub struct HttpFeedFetcher {
    client: reqwest::Client,
}

impl HttpFeedFetcher {
    /// `timeout` of `None` leaves requests unbounded.
    pub fn new(timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("feedrelay/", env!("CARGO_PKG_VERSION")));
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        let feed = parse_feed(url, &body)?;

        tracing::debug!(
            source_url = url,
            feed_type = %feed.metadata.feed_type,
            items = feed.items.len(),
            "Parsed feed"
        );
        Ok(feed)
    }
}

/// Parse a feed document. `source_url` is stamped on every item.
pub fn parse_feed(source_url: &str, document: &str) -> Result<FetchedFeed, FetchError> {
    let root = xml::parse_document(document).map_err(FetchError::Parse)?;

    match root.local_name() {
        "rss" | "RDF" => rss::from_tree(source_url, &root),
        "feed" => Ok(atom::from_tree(source_url, &root)),
        other => Err(FetchError::Parse(format!(
            "unsupported root element <{other}>"
        ))),
    }
}

/// Parse RFC 2822 (RSS) or RFC 3339 (Atom, Dublin Core) timestamps.
pub(crate) fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
