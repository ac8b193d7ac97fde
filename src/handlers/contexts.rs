//! Context-document listing endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{ContextDoc, ContextDocSummary};
use crate::utils::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListContextsQuery {
    pub org_id: String,
}

/// GET /api/contexts?org_id=...
pub async fn list_contexts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListContextsQuery>,
) -> ApiResult<Json<Vec<ContextDocSummary>>> {
    let docs = state.doc_store.list_for_org(&query.org_id).await?;
    Ok(Json(docs.iter().map(ContextDocSummary::from).collect()))
}

/// GET /api/contexts/:id
pub async fn get_context(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<i64>,
) -> ApiResult<Json<ContextDoc>> {
    Ok(Json(state.doc_store.get(doc_id).await?))
}
