//! Delivery ledger: the durable record of which items were delivered.
//!
//! The ledger is a set keyed by `(guid, source_url)`: inserts are
//! insert-or-ignore and rows are only ever removed by the retention purge.
//! An item is recorded only after its delivery was confirmed, so anything
//! absent from the ledger is eligible for delivery on the next poll.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use sqlx::SqlitePool;
use thiserror::Error;

use feedrelay_common::types::{LedgerEntry, NewLedgerEntry};

/// Ledger storage unavailable.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ledger database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Whether `(guid, source_url)` was already delivered.
    async fn has(&self, guid: &str, source_url: &str) -> Result<bool, StoreError>;

    /// Record a delivered item. A second record for the same key is ignored.
    async fn record(&self, entry: &NewLedgerEntry) -> Result<(), StoreError>;

    /// Delete entries of `source_url` recorded more than `retention_days`
    /// ago and return how many were removed. `0` removes nothing.
    async fn purge(&self, source_url: &str, retention_days: u32) -> Result<u64, StoreError>;
}

fn purge_threshold(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(retention_days))
}

/// SQLite-backed ledger. Every call commits before returning.
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All entries for a source, oldest recorded first.
    pub async fn entries(&self, source_url: &str) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT guid, source_url, title, summary, link, published_at, recorded_at
            FROM ledger_entries
            WHERE source_url = ?1
            ORDER BY recorded_at, id
            "#,
        )
        .bind(source_url)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn has(&self, guid: &str, source_url: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM ledger_entries WHERE guid = ?1 AND source_url = ?2")
                .bind(guid)
                .bind(source_url)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.is_some())
    }

    async fn record(&self, entry: &NewLedgerEntry) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ledger_entries (guid, source_url, title, summary, link, published_at, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (guid, source_url) DO NOTHING
            "#,
        )
        .bind(&entry.guid)
        .bind(&entry.source_url)
        .bind(&entry.title)
        .bind(&entry.summary)
        .bind(&entry.link)
        .bind(entry.published_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                guid = %entry.guid,
                source_url = %entry.source_url,
                "Ledger entry already present"
            );
        }
        Ok(())
    }

    async fn purge(&self, source_url: &str, retention_days: u32) -> Result<u64, StoreError> {
        if retention_days == 0 {
            return Ok(0);
        }

        let threshold = purge_threshold(Utc::now(), retention_days);
        let result =
            sqlx::query("DELETE FROM ledger_entries WHERE source_url = ?1 AND recorded_at < ?2")
                .bind(source_url)
                .bind(threshold)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}

/// In-process ledger with the same semantics, without durability.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<(String, String), LedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Insert with an explicit `recorded_at`, ignoring existing keys.
    pub fn record_at(&self, entry: &NewLedgerEntry, recorded_at: DateTime<Utc>) {
        self.entries
            .lock()
            .entry((entry.guid.clone(), entry.source_url.clone()))
            .or_insert_with(|| LedgerEntry {
                guid: entry.guid.clone(),
                source_url: entry.source_url.clone(),
                title: entry.title.clone(),
                summary: entry.summary.clone(),
                link: entry.link.clone(),
                published_at: entry.published_at,
                recorded_at,
            });
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn has(&self, guid: &str, source_url: &str) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .lock()
            .contains_key(&(guid.to_string(), source_url.to_string())))
    }

    async fn record(&self, entry: &NewLedgerEntry) -> Result<(), StoreError> {
        self.record_at(entry, Utc::now());
        Ok(())
    }

    async fn purge(&self, source_url: &str, retention_days: u32) -> Result<u64, StoreError> {
        if retention_days == 0 {
            return Ok(0);
        }
        let threshold = purge_threshold(Utc::now(), retention_days);
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(_, url), e| url != source_url || e.recorded_at >= threshold);
        Ok((before - entries.len()) as u64)
    }
}
