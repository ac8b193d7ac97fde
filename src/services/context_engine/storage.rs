//! Persistence facade for context-tree runs.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::ContextTreeRun;
use crate::utils::{ApiError, ApiResult};

#[derive(Clone)]
pub struct TreeRunStore {
    pool: SqlitePool,
}

impl TreeRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_run(&self, user_id: i64, org_id: &str) -> ApiResult<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO context_tree_runs (id, user_id, org_id, status) VALUES (?, ?, ?, 'running')",
        )
        .bind(&id)
        .bind(user_id)
        .bind(org_id)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Persist the append-only progress log.
    pub async fn save_progress(&self, run_id: &str, progress_json: &str) -> ApiResult<()> {
        sqlx::query("UPDATE context_tree_runs SET progress_data_json = ? WHERE id = ?")
            .bind(progress_json)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn save_completion(
        &self,
        run_id: &str,
        tree_data_json: &str,
        input_sources_json: &str,
        input_context_count: i64,
        model_used: &str,
        provider_used: &str,
        token_usage_json: &str,
        system_prompt_used: &str,
        progress_json: &str,
    ) -> ApiResult<()> {
        sqlx::query(
            "UPDATE context_tree_runs SET status = 'completed', completed_at = CURRENT_TIMESTAMP,
             tree_data_json = ?, input_sources_json = ?, input_context_count = ?,
             model_used = ?, provider_used = ?, token_usage_json = ?,
             system_prompt_used = ?, progress_data_json = ?
             WHERE id = ?",
        )
        .bind(tree_data_json)
        .bind(input_sources_json)
        .bind(input_context_count)
        .bind(model_used)
        .bind(provider_used)
        .bind(token_usage_json)
        .bind(system_prompt_used)
        .bind(progress_json)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_terminal(
        &self,
        run_id: &str,
        status: &str,
        error_message: Option<&str>,
        progress_json: &str,
    ) -> ApiResult<()> {
        sqlx::query(
            "UPDATE context_tree_runs SET status = ?, error_message = ?,
             progress_data_json = ?, completed_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(status)
        .bind(error_message)
        .bind(progress_json)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace the stored tree (restructure apply).
    pub async fn update_tree(&self, run_id: &str, tree_data_json: &str) -> ApiResult<()> {
        sqlx::query("UPDATE context_tree_runs SET tree_data_json = ? WHERE id = ?")
            .bind(tree_data_json)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> ApiResult<ContextTreeRun> {
        sqlx::query_as("SELECT * FROM context_tree_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::run_not_found(run_id))
    }

    pub async fn list_runs(&self, org_id: &str) -> ApiResult<Vec<ContextTreeRun>> {
        Ok(sqlx::query_as(
            "SELECT * FROM context_tree_runs WHERE org_id = ? ORDER BY started_at DESC LIMIT 50",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?)
    }
}
