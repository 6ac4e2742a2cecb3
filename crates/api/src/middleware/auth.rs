//! Admin key check for mutating routes.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use feedrelay_common::error::AppError;

use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Proof that the request carried the configured admin key.
///
/// Add as a handler argument to protect a route. When `ADMIN_API_KEY` is
/// unset every protected route is rejected.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let expected = state.config.admin_api_key.clone();
        let provided = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        async move {
            let Some(expected) = expected else {
                return Err(AppError::Auth(
                    "Admin routes are disabled; set ADMIN_API_KEY".to_string(),
                ));
            };

            match provided {
                Some(key) if keys_match(key.as_bytes(), expected.as_bytes()) => Ok(AdminAuth),
                _ => Err(AppError::Auth("Missing or invalid X-API-Key header".to_string())),
            }
        }
    }
}

/// Length-then-content comparison that does not stop at the first mismatch.
fn keys_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
