//! System endpoints: LLM status and the caller's active background tasks.

use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;

use crate::services::task_registry::TaskInfo;
use crate::AppState;

use super::caller_user_id;

/// GET /api/llm/status
pub async fn llm_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "available": state.gateway.is_available(),
        "default_provider": state.gateway.default_provider(),
        "default_model": state.gateway.default_model(),
    }))
}

/// GET /api/tasks
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<Vec<TaskInfo>> {
    let user_id = caller_user_id(&headers);
    Json(state.task_registry.list_by_user(user_id))
}
