//! SQL corpus pipeline endpoints: submit/list/get/cancel extraction runs,
//! trigger analysis, trigger document generation.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use crate::models::{
    AnalysisRun, ExtractionRun, SubmitAnalysisRequest, SubmitDocGenerationRequest,
    SubmitExtractionRequest, SubmitRunResponse,
};
use crate::utils::{ApiError, ApiResult};
use crate::AppState;

use super::caller_user_id;

/// POST /api/extraction/runs
pub async fn submit_extraction(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SubmitExtractionRequest>,
) -> ApiResult<Json<SubmitRunResponse>> {
    let user_id = caller_user_id(&headers);
    let workspace = state.config.workspace.resolve(&req.cluster).ok_or_else(|| {
        ApiError::validation_error(format!(
            "Cluster '{}' is not configured or its token is missing",
            req.cluster
        ))
    })?;

    let run_id = state
        .databricks_service
        .start_extraction(user_id, workspace, req.root_path, req.modified_since, req.notebook_limit)
        .await?;
    Ok(Json(SubmitRunResponse::started(run_id)))
}

/// GET /api/extraction/runs
pub async fn list_extraction_runs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ExtractionRun>>> {
    let user_id = caller_user_id(&headers);
    Ok(Json(state.databricks_service.store().list_extraction_runs(user_id).await?))
}

/// GET /api/extraction/runs/:id
pub async fn get_extraction_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<ExtractionRun>> {
    Ok(Json(state.databricks_service.store().get_extraction_run(&run_id).await?))
}

/// POST /api/extraction/runs/:id/cancel
pub async fn cancel_extraction_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let cancelled = state.task_registry.cancel(&format!("extraction-{}", run_id));
    Ok(Json(serde_json::json!({"run_id": run_id, "cancelled": cancelled})))
}

/// DELETE /api/extraction/runs/:id
pub async fn delete_extraction_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.databricks_service.store().delete_extraction_run(&run_id).await?;
    Ok(Json(serde_json::json!({"deleted": run_id})))
}

/// POST /api/extraction/runs/:id/analyze
pub async fn submit_analysis(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Json(req): Json<SubmitAnalysisRequest>,
) -> ApiResult<Json<SubmitRunResponse>> {
    let user_id = caller_user_id(&headers);
    let analysis_id = state
        .databricks_service
        .start_analysis(user_id, &run_id, req.org_id)
        .await?;
    Ok(Json(SubmitRunResponse::started(analysis_id)))
}

/// GET /api/analysis/:id
pub async fn get_analysis_run(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<String>,
) -> ApiResult<Json<AnalysisRun>> {
    Ok(Json(state.databricks_service.store().get_analysis_run(&analysis_id).await?))
}

/// POST /api/analysis/:id/cancel
pub async fn cancel_analysis_run(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let cancelled = state.task_registry.cancel(&format!("analysis-{}", analysis_id));
    Ok(Json(serde_json::json!({"run_id": analysis_id, "cancelled": cancelled})))
}

/// POST /api/analysis/:id/docs
pub async fn submit_doc_generation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(analysis_id): Path<String>,
    Json(req): Json<SubmitDocGenerationRequest>,
) -> ApiResult<Json<SubmitRunResponse>> {
    let user_id = caller_user_id(&headers);
    let run_id = state
        .databricks_service
        .start_doc_generation(user_id, &analysis_id, req)
        .await?;
    Ok(Json(SubmitRunResponse::started(run_id)))
}
