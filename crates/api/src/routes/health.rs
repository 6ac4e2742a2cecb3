//! Liveness endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use feedrelay_scheduler::SourceState;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sources = state.scheduler.snapshot();
    let active = sources
        .iter()
        .filter(|s| matches!(s.state, SourceState::Armed | SourceState::Firing))
        .count();

    Json(json!({
        "status": "ok",
        "service": "feedrelay",
        "version": env!("CARGO_PKG_VERSION"),
        "sources": sources.len(),
        "active_sources": active,
    }))
}
