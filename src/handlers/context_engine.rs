//! Context-tree engine endpoints.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{ContextTreeRun, RestructureRequest, SubmitRunResponse, SubmitTreeRequest};
use crate::services::context_engine::restructure::RestructureProposal;
use crate::services::context_engine::TreeNode;
use crate::utils::ApiResult;
use crate::AppState;

use super::caller_user_id;

/// POST /api/context-tree/runs
pub async fn submit_tree_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SubmitTreeRequest>,
) -> ApiResult<Json<SubmitRunResponse>> {
    let user_id = caller_user_id(&headers);
    let run_id = state
        .context_engine_service
        .start_tree_generation(user_id, req)
        .await?;
    Ok(Json(SubmitRunResponse::started(run_id)))
}

/// GET /api/context-tree/runs/:id
pub async fn get_tree_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<ContextTreeRun>> {
    Ok(Json(state.context_engine_service.store().get_run(&run_id).await?))
}

/// POST /api/context-tree/runs/:id/cancel
pub async fn cancel_tree_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let cancelled = state.task_registry.cancel(&format!("context-tree-{}", run_id));
    Ok(Json(serde_json::json!({"run_id": run_id, "cancelled": cancelled})))
}

/// POST /api/context-tree/runs/:id/restructure
pub async fn propose_restructure(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Json(req): Json<RestructureRequest>,
) -> ApiResult<Json<RestructureProposal>> {
    let proposal = state
        .context_engine_service
        .propose(&run_id, &req.node_ids, &req.instruction)
        .await?;
    Ok(Json(proposal))
}

#[derive(Debug, Deserialize)]
pub struct ApplyRestructureRequest {
    pub new_tree: TreeNode,
}

/// POST /api/context-tree/runs/:id/restructure/apply
pub async fn apply_restructure(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Json(req): Json<ApplyRestructureRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .context_engine_service
        .apply_restructure(&run_id, &req.new_tree)
        .await?;
    Ok(Json(serde_json::json!({"run_id": run_id, "applied": true})))
}
