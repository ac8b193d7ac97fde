pub mod config_apis;
pub mod confluence;
pub mod context_engine;
pub mod contexts;
pub mod extraction;
pub mod system;
pub mod ws;

use axum::http::HeaderMap;

/// Caller identity seam. Authentication is an external collaborator; the
/// router trusts the identity header it injects upstream of this service.
pub fn caller_user_id(headers: &HeaderMap) -> i64 {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

pub fn caller_is_admin(headers: &HeaderMap) -> bool {
    headers
        .get("x-user-admin")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}
