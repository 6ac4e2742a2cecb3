//! Feed inspection and test delivery.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use feedrelay_common::error::AppError;
use feedrelay_common::types::{ContentItem, FeedMetadata};
use feedrelay_feeds::FetchedFeed;
use feedrelay_notifier::SendError;

use crate::middleware::auth::AdminAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/feeds/check", get(check_feed))
        .route("/api/feeds/test", post(send_test))
}

#[derive(Debug, Deserialize)]
pub struct CheckParams {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct FeedCheck {
    pub metadata: FeedMetadata,
    pub items: Vec<ContentItem>,
}

#[derive(Debug, Deserialize)]
pub struct TestSendRequest {
    pub url: String,
    #[serde(default)]
    pub item_index: usize,
}

async fn fetch(state: &AppState, url: &str) -> Result<FetchedFeed, AppError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(AppError::Validation("url is required".to_string()));
    }
    state
        .fetcher
        .fetch(url)
        .await
        .map_err(|e| AppError::Fetch(e.to_string()))
}

/// GET /api/feeds/check?url=: fetch and parse without delivering anything.
async fn check_feed(
    State(state): State<AppState>,
    Query(params): Query<CheckParams>,
) -> Result<Json<FeedCheck>, AppError> {
    let feed = fetch(&state, &params.url).await?;
    Ok(Json(FeedCheck {
        metadata: feed.metadata,
        items: feed.items,
    }))
}

/// POST /api/feeds/test: render one item and send it to the test destination.
///
/// Bypasses the ledger, so the same item can be sent repeatedly.
async fn send_test(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(req): Json<TestSendRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let config = state.store.current();
    let target = config
        .test_destination
        .as_ref()
        .ok_or_else(|| AppError::Config("no [test_destination] configured".to_string()))?;

    let feed = fetch(&state, &req.url).await?;
    let item = feed.items.get(req.item_index).ok_or_else(|| {
        AppError::NotFound(format!(
            "item {} not found ({} items in feed)",
            req.item_index,
            feed.items.len()
        ))
    })?;

    let text = state
        .formatter
        .render(item, &feed.metadata, target.template());
    let destination = target.destination();

    state
        .sender
        .send(&target.bot_token, &destination, &text, &state.shutdown)
        .await
        .map_err(|e| match e {
            SendError::Cancelled => AppError::Internal("shutting down".to_string()),
            other => AppError::Delivery(other.to_string()),
        })?;

    tracing::info!(
        source_url = %req.url,
        guid = %item.guid,
        %destination,
        "Test message sent"
    );
    Ok(Json(json!({ "status": "sent", "guid": item.guid, "text": text })))
}
