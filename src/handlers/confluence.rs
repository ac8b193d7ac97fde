//! Wiki ingest endpoints.

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::SubmitRunResponse;
use crate::utils::ApiResult;
use crate::AppState;

use super::caller_user_id;

#[derive(Debug, Deserialize)]
pub struct SubmitConfluenceRequest {
    pub org_id: String,
    pub space_key: String,
}

/// POST /api/confluence/runs
pub async fn submit_extraction(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SubmitConfluenceRequest>,
) -> ApiResult<Json<SubmitRunResponse>> {
    let user_id = caller_user_id(&headers);
    let run_id = state
        .confluence_service
        .start_extraction(user_id, req.org_id, req.space_key)
        .await?;
    Ok(Json(SubmitRunResponse::started(run_id)))
}
