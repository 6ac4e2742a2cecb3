use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Template used when a source does not configure one.
pub const DEFAULT_TEMPLATE: &str = "{{.Title}}";

/// Default poll interval for sources that omit `poll_interval_minutes`.
pub const DEFAULT_POLL_INTERVAL_MINUTES: u32 = 10;

/// Where a rendered message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.thread_id {
            Some(thread) => write!(f, "{}/{}", self.chat_id, thread),
            None => write!(f, "{}", self.chat_id),
        }
    }
}

/// One configured, independently scheduled content source.
///
/// Snapshots are immutable for the lifetime of a scheduling epoch; a
/// reconfiguration replaces the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u32,
    /// Ledger retention in days. `0` disables purging for this source.
    #[serde(default)]
    pub retention_days: u32,
    pub bot_token: String,
    pub chat_id: i64,
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub template: String,
}

fn default_poll_interval() -> u32 {
    DEFAULT_POLL_INTERVAL_MINUTES
}

impl SourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.poll_interval_minutes.max(1)) * 60)
    }

    pub fn destination(&self) -> Destination {
        Destination {
            chat_id: self.chat_id,
            thread_id: self.thread_id,
        }
    }

    /// The configured template, or [`DEFAULT_TEMPLATE`] when blank.
    pub fn template(&self) -> &str {
        if self.template.trim().is_empty() {
            DEFAULT_TEMPLATE
        } else {
            &self.template
        }
    }
}

/// An author attached to a feed item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: Option<String>,
}

/// Item-level image (RSS `<image>`, `media:thumbnail`, …).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub title: Option<String>,
}

/// A media attachment (RSS `<enclosure>`, Atom `rel="enclosure"` link).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: String,
    pub length: Option<u64>,
}

/// A single item produced by the feed parser. Read-only to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Feed-provided identifier. May be empty, in which case deduplication
    /// collapses every empty-guid item of a source onto one ledger key.
    pub guid: String,
    pub title: String,
    pub summary: String,
    pub body: String,
    pub link: String,
    pub links: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub authors: Vec<Author>,
    pub categories: Vec<String>,
    pub image: Option<Image>,
    pub enclosures: Vec<Enclosure>,
    pub source_url: String,
}

/// Feed-level (channel) metadata, handed to the formatter with each item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedMetadata {
    pub title: String,
    pub description: String,
    pub link: String,
    pub language: String,
    pub copyright: String,
    pub generator: String,
    /// `rss` or `atom`.
    pub feed_type: String,
    pub feed_version: String,
}

/// The write shape of a ledger row; `recorded_at` is stamped by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub guid: String,
    pub source_url: String,
    pub title: String,
    pub summary: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
}

impl NewLedgerEntry {
    /// Build the ledger record for a delivered item. Items without a publish
    /// date are stamped with `now`.
    pub fn from_item(item: &ContentItem, source_url: &str, now: DateTime<Utc>) -> Self {
        Self {
            guid: item.guid.clone(),
            source_url: source_url.to_string(),
            title: item.title.clone(),
            summary: item.summary.clone(),
            link: item.link.clone(),
            published_at: item.published_at.unwrap_or(now),
        }
    }
}

/// A delivered item as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub guid: String,
    pub source_url: String,
    pub title: String,
    pub summary: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn source() -> SourceConfig {
        SourceConfig {
            url: "https://example.com/rss".to_string(),
            poll_interval_minutes: 5,
            retention_days: 7,
            bot_token: "123:abc".to_string(),
            chat_id: -100,
            thread_id: Some(9),
            template: String::new(),
        }
    }

    #[test]
    fn test_blank_template_falls_back_to_title() {
        let mut cfg = source();
        assert_eq!(cfg.template(), DEFAULT_TEMPLATE);
        cfg.template = "{{.Link}}".to_string();
        assert_eq!(cfg.template(), "{{.Link}}");
    }

    #[test]
    fn test_poll_interval_in_minutes() {
        assert_eq!(source().poll_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_destination_display() {
        assert_eq!(source().destination().to_string(), "-100/9");
    }

    #[test]
    fn test_ledger_entry_defaults_published_to_now() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let item = ContentItem {
            guid: "g1".to_string(),
            title: "Hello".to_string(),
            ..Default::default()
        };
        let entry = NewLedgerEntry::from_item(&item, "https://example.com/rss", now);
        assert_eq!(entry.published_at, now);
        assert_eq!(entry.source_url, "https://example.com/rss");
    }
}
