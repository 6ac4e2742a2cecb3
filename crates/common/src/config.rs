use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::AppError;
use crate::types::{DEFAULT_TEMPLATE, Destination, SourceConfig};

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string for the delivery ledger
    pub database_url: String,

    /// Maximum number of SQLite connections in the pool (default: 5)
    pub db_max_connections: u32,

    /// Path to the TOML file listing the configured sources
    pub feeds_config_path: PathBuf,

    /// Admin API bind address (default: 0.0.0.0:8080)
    pub listen_addr: String,

    /// Key required on mutating admin routes. Unset disables them.
    pub admin_api_key: Option<String>,

    /// Telegram Bot API base URL
    pub telegram_api_base: String,

    /// Retention sweep period in hours (default: 24)
    pub sweep_interval_hours: u64,

    /// Optional timeout applied to outbound HTTP requests. Unset means none.
    pub http_timeout_secs: Option<u64>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://feedrelay.db".to_string()),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            feeds_config_path: std::env::var("FEEDS_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/feeds.toml")),
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            admin_api_key: std::env::var("ADMIN_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            telegram_api_base: std::env::var("TELEGRAM_API_BASE")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            sweep_interval_hours: std::env::var("SWEEP_INTERVAL_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SWEEP_INTERVAL_HOURS must be a valid u64"))?,
            http_timeout_secs: match std::env::var("HTTP_TIMEOUT_SECS") {
                Ok(v) => Some(
                    v.parse()
                        .map_err(|_| anyhow::anyhow!("HTTP_TIMEOUT_SECS must be a valid u64"))?,
                ),
                Err(_) => None,
            },
        })
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_hours.max(1) * 3600)
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.http_timeout_secs.map(Duration::from_secs)
    }
}

/// Destination used by the admin "send test message" route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDestination {
    pub bot_token: String,
    pub chat_id: i64,
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub template: String,
}

impl TestDestination {
    pub fn destination(&self) -> Destination {
        Destination {
            chat_id: self.chat_id,
            thread_id: self.thread_id,
        }
    }

    pub fn template(&self) -> &str {
        if self.template.trim().is_empty() {
            DEFAULT_TEMPLATE
        } else {
            &self.template
        }
    }
}

/// Parsed contents of the feeds file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default)]
    pub feeds: Vec<SourceConfig>,
    #[serde(default)]
    pub test_destination: Option<TestDestination>,
}

impl FeedsConfig {
    /// Parse and validate a TOML feeds document.
    pub fn from_toml(content: &str) -> Result<Self, AppError> {
        let cfg: FeedsConfig = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("invalid feeds file: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), AppError> {
        let mut seen = HashSet::new();
        for feed in &self.feeds {
            let url = feed.url.trim();
            if url.is_empty() {
                return Err(AppError::Config("feed url must not be empty".to_string()));
            }
            if !seen.insert(url) {
                return Err(AppError::Config(format!("duplicate feed url: {url}")));
            }
            if feed.poll_interval_minutes < 1 {
                return Err(AppError::Config(format!(
                    "{url}: poll_interval_minutes must be at least 1"
                )));
            }
            if feed.bot_token.trim().is_empty() || feed.chat_id == 0 {
                return Err(AppError::Config(format!(
                    "{url}: bot_token and chat_id are required"
                )));
            }
        }
        Ok(())
    }
}

/// Owns the current feeds snapshot and publishes replacements.
///
/// Readers get immutable `Arc` snapshots; a failed reload leaves the previous
/// snapshot in place.
pub struct ConfigStore {
    path: PathBuf,
    tx: watch::Sender<Arc<FeedsConfig>>,
}

impl ConfigStore {
    /// Read and validate the feeds file at `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let cfg = read_feeds_file(&path)?;
        tracing::info!(
            path = %path.display(),
            sources = cfg.feeds.len(),
            "Loaded feeds configuration"
        );
        let (tx, _rx) = watch::channel(Arc::new(cfg));
        Ok(Self { path, tx })
    }

    /// Build a store around an already-parsed configuration.
    pub fn from_config(path: impl Into<PathBuf>, cfg: FeedsConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(cfg));
        Self {
            path: path.into(),
            tx,
        }
    }

    pub fn current(&self) -> Arc<FeedsConfig> {
        self.tx.borrow().clone()
    }

    pub fn sources(&self) -> Vec<SourceConfig> {
        self.tx.borrow().feeds.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<FeedsConfig>> {
        self.tx.subscribe()
    }

    /// Re-read the feeds file and publish the new snapshot.
    pub fn reload(&self) -> Result<Arc<FeedsConfig>, AppError> {
        let cfg = Arc::new(read_feeds_file(&self.path)?);
        self.tx.send_replace(cfg.clone());
        tracing::info!(
            path = %self.path.display(),
            sources = cfg.feeds.len(),
            "Reloaded feeds configuration"
        );
        Ok(cfg)
    }
}

fn read_feeds_file(path: &Path) -> Result<FeedsConfig, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("reading {}: {e}", path.display())))?;
    FeedsConfig::from_toml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[feeds]]
url = "https://example.com/rss.xml"
poll_interval_minutes = 15
retention_days = 30
bot_token = "123:abc"
chat_id = -1001
thread_id = 42
template = "<b>{{.Title}}</b>"

[[feeds]]
url = "https://example.org/atom.xml"
bot_token = "456:def"
chat_id = 77

[test_destination]
bot_token = "999:zzz"
chat_id = 5
"#;

    #[test]
    fn test_parse_feeds_file_with_defaults() {
        let cfg = FeedsConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.feeds.len(), 2);
        assert_eq!(cfg.feeds[0].thread_id, Some(42));
        assert_eq!(cfg.feeds[1].poll_interval_minutes, 10);
        assert_eq!(cfg.feeds[1].retention_days, 0);
        assert_eq!(cfg.feeds[1].template(), "{{.Title}}");
        assert_eq!(cfg.test_destination.unwrap().chat_id, 5);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let doc = r#"
[[feeds]]
url = "https://example.com/rss.xml"
poll_interval_minutes = 0
bot_token = "123:abc"
chat_id = 1
"#;
        let err = FeedsConfig::from_toml(doc).unwrap_err();
        assert!(err.to_string().contains("poll_interval_minutes"));
    }

    #[test]
    fn test_rejects_duplicate_urls_and_missing_credentials() {
        let dup = r#"
[[feeds]]
url = "https://a"
bot_token = "t"
chat_id = 1

[[feeds]]
url = "https://a"
bot_token = "t"
chat_id = 1
"#;
        assert!(FeedsConfig::from_toml(dup).is_err());

        let no_chat = r#"
[[feeds]]
url = "https://a"
bot_token = "t"
chat_id = 0
"#;
        assert!(FeedsConfig::from_toml(no_chat).is_err());
    }

    #[test]
    fn test_reload_keeps_previous_snapshot_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let store = ConfigStore::load(&path).unwrap();
        let mut rx = store.subscribe();
        assert_eq!(store.sources().len(), 2);

        std::fs::write(&path, "feeds = 3").unwrap();
        assert!(store.reload().is_err());
        assert_eq!(store.sources().len(), 2);
        assert!(!rx.has_changed().unwrap());

        std::fs::write(
            &path,
            "[[feeds]]\nurl = \"https://only\"\nbot_token = \"t\"\nchat_id = 1\n",
        )
        .unwrap();
        let cfg = store.reload().unwrap();
        assert_eq!(cfg.feeds.len(), 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().feeds[0].url, "https://only");
    }
}
