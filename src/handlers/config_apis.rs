//! Configuration-object pipeline endpoints.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use crate::models::{
    ConfigAnalysisRun, ConfigExtractionRun, SubmitConfigDocsRequest,
    SubmitConfigExtractionRequest, SubmitRunResponse,
};
use crate::services::config_apis::categories::{available_categories, ConfigCategory};
use crate::utils::ApiResult;
use crate::AppState;

use super::caller_user_id;

/// GET /api/config-apis/categories
pub async fn list_categories() -> Json<Vec<ConfigCategory>> {
    Json(available_categories())
}

/// POST /api/config-apis/runs
pub async fn submit_extraction(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SubmitConfigExtractionRequest>,
) -> ApiResult<Json<SubmitRunResponse>> {
    let user_id = caller_user_id(&headers);
    let run_id = state
        .config_api_service
        .start_extraction(user_id, req.host, req.org_id, req.token, req.categories, req.params)
        .await?;
    Ok(Json(SubmitRunResponse::started(run_id)))
}

/// GET /api/config-apis/runs
pub async fn list_extraction_runs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ConfigExtractionRun>>> {
    let user_id = caller_user_id(&headers);
    Ok(Json(state.config_api_service.store().list_extraction_runs(user_id).await?))
}

/// GET /api/config-apis/runs/:id
pub async fn get_extraction_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<ConfigExtractionRun>> {
    Ok(Json(state.config_api_service.store().get_extraction_run(&run_id).await?))
}

/// POST /api/config-apis/runs/:id/cancel
pub async fn cancel_extraction_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let cancelled = state.task_registry.cancel(&format!("config-extraction-{}", run_id));
    Ok(Json(serde_json::json!({"run_id": run_id, "cancelled": cancelled})))
}

/// POST /api/config-apis/runs/:id/analyze
pub async fn submit_analysis(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> ApiResult<Json<SubmitRunResponse>> {
    let user_id = caller_user_id(&headers);
    let analysis_id = state.config_api_service.start_analysis(user_id, &run_id).await?;
    Ok(Json(SubmitRunResponse::started(analysis_id)))
}

/// GET /api/config-apis/analysis/:id
pub async fn get_analysis_run(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<String>,
) -> ApiResult<Json<ConfigAnalysisRun>> {
    Ok(Json(state.config_api_service.store().get_analysis_run(&analysis_id).await?))
}

/// POST /api/config-apis/analysis/:id/docs
pub async fn submit_doc_generation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(analysis_id): Path<String>,
    Json(req): Json<SubmitConfigDocsRequest>,
) -> ApiResult<Json<SubmitRunResponse>> {
    let user_id = caller_user_id(&headers);
    let run_id = state
        .config_api_service
        .start_doc_generation(user_id, &analysis_id, req)
        .await?;
    Ok(Json(SubmitRunResponse::started(run_id)))
}
