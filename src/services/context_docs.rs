//! Shared store for authored context documents.
//!
//! Both analytic pipelines write here and the context-tree collector reads
//! from here. Saving a doc supersedes the previous active doc in the same
//! (org, source, slot).

use sqlx::SqlitePool;

use crate::models::ContextDoc;
use crate::utils::{ApiError, ApiResult};

/// Everything persisted alongside one authored document.
#[derive(Debug, Clone, Default)]
pub struct NewContextDoc {
    pub source_type: String,
    pub source_run_id: String,
    pub org_id: String,
    pub doc_key: String,
    pub doc_name: String,
    pub doc_content: String,
    pub provider_used: String,
    pub model_used: String,
    pub system_prompt_used: String,
    pub payload_sent: String,
    pub warnings_json: Option<String>,
}

#[derive(Clone)]
pub struct ContextDocStore {
    pool: SqlitePool,
}

impl ContextDocStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, doc: &NewContextDoc) -> ApiResult<i64> {
        let token_count = (doc.doc_content.split_whitespace().count() as f64 * 1.3) as i64;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE context_docs SET status = 'superseded'
             WHERE org_id = ? AND source_type = ? AND doc_key = ? AND status = 'active'",
        )
        .bind(&doc.org_id)
        .bind(&doc.source_type)
        .bind(&doc.doc_key)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query(
            "INSERT INTO context_docs (source_type, source_run_id, org_id, doc_key, doc_name,
             doc_content, provider_used, model_used, system_prompt_used, payload_sent,
             token_count, status, warnings_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)",
        )
        .bind(&doc.source_type)
        .bind(&doc.source_run_id)
        .bind(&doc.org_id)
        .bind(&doc.doc_key)
        .bind(&doc.doc_name)
        .bind(&doc.doc_content)
        .bind(&doc.provider_used)
        .bind(&doc.model_used)
        .bind(&doc.system_prompt_used)
        .bind(&doc.payload_sent)
        .bind(token_count)
        .bind(&doc.warnings_json)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    /// Active docs for one source type, newest first.
    pub async fn list_active(&self, org_id: &str, source_type: &str) -> ApiResult<Vec<ContextDoc>> {
        Ok(sqlx::query_as(
            "SELECT * FROM context_docs
             WHERE org_id = ? AND source_type = ? AND status = 'active'
             ORDER BY created_at DESC",
        )
        .bind(org_id)
        .bind(source_type)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn list_for_org(&self, org_id: &str) -> ApiResult<Vec<ContextDoc>> {
        Ok(sqlx::query_as(
            "SELECT * FROM context_docs WHERE org_id = ? ORDER BY created_at DESC",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get(&self, id: i64) -> ApiResult<ContextDoc> {
        sqlx::query_as("SELECT * FROM context_docs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Context doc {}", id)))
    }
}
