pub mod feeds;
pub mod health;
pub mod sources;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(sources::router())
        .merge(feeds::router())
        .with_state(state)
}
