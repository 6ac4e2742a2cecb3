//! Configured sources and configuration reload.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use feedrelay_common::error::AppError;
use feedrelay_common::types::SourceConfig;
use feedrelay_scheduler::SourceState;

use crate::middleware::auth::AdminAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/sources", get(list_sources))
        .route("/api/sources/reload", post(reload_sources))
}

/// A configured source as exposed over HTTP. The bot token is masked.
#[derive(Debug, Serialize)]
pub struct SourceView {
    pub url: String,
    pub poll_interval_minutes: u32,
    pub retention_days: u32,
    pub bot_token: String,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub template: String,
    pub state: Option<SourceState>,
    pub last_poll: Option<DateTime<Utc>>,
}

impl SourceView {
    fn new(source: &SourceConfig) -> Self {
        Self {
            url: source.url.clone(),
            poll_interval_minutes: source.poll_interval_minutes,
            retention_days: source.retention_days,
            bot_token: mask_token(&source.bot_token),
            chat_id: source.chat_id,
            thread_id: source.thread_id,
            template: source.template().to_string(),
            state: None,
            last_poll: None,
        }
    }
}

/// Keep the bot id (before `:`), hide the secret.
pub fn mask_token(token: &str) -> String {
    match token.split_once(':') {
        Some((bot_id, _)) => format!("{bot_id}:***"),
        None if token.is_empty() => String::new(),
        None => "***".to_string(),
    }
}

/// GET /api/sources: configured sources merged with scheduler state.
async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceView>> {
    let statuses = state.scheduler.snapshot();
    let views = state
        .store
        .sources()
        .iter()
        .map(|source| {
            let mut view = SourceView::new(source);
            if let Some(status) = statuses.iter().find(|s| s.url == source.url) {
                view.state = Some(status.state);
                view.last_poll = status.last_poll;
            }
            view
        })
        .collect();
    Json(views)
}

/// POST /api/sources/reload: re-read the feeds file and restart scheduling.
async fn reload_sources(
    State(state): State<AppState>,
    _admin: AdminAuth,
) -> Result<Json<serde_json::Value>, AppError> {
    let sources = state.reload_sources().await?;
    tracing::info!(sources, "Sources reloaded via admin API");
    Ok(Json(json!({ "status": "reloaded", "sources": sources })))
}

#[cfg(test)]
mod tests {
    use super::mask_token;

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("123456:AAE-secret"), "123456:***");
        assert_eq!(mask_token("opaque"), "***");
        assert_eq!(mask_token(""), "");
    }
}
