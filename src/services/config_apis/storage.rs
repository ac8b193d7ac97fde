//! Persistence facade for the configuration-object pipeline.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{ConfigAnalysisRun, ConfigExtractionRun};
use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Clone, Default)]
pub struct ConfigExtractionCounters {
    pub categories_requested: i64,
    pub categories_completed: i64,
    pub api_calls: i64,
    pub api_failures: i64,
    pub items_extracted: i64,
}

#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
}

impl ConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_extraction_run(
        &self,
        run_id: &str,
        user_id: i64,
        host: &str,
        org_id: &str,
        categories_json: &str,
        params_json: &str,
    ) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO config_extraction_runs
             (id, user_id, host, org_id, categories_json, params_json, status)
             VALUES (?, ?, ?, ?, ?, ?, 'running')",
        )
        .bind(run_id)
        .bind(user_id)
        .bind(host)
        .bind(org_id)
        .bind(categories_json)
        .bind(params_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete_extraction_run(
        &self,
        run_id: &str,
        extracted_data_json: &str,
        api_results_json: &str,
        counters: &ConfigExtractionCounters,
    ) -> ApiResult<()> {
        sqlx::query(
            "UPDATE config_extraction_runs SET status = 'completed', completed_at = CURRENT_TIMESTAMP,
             extracted_data_json = ?, api_results_json = ?,
             categories_requested = ?, categories_completed = ?,
             api_calls = ?, api_failures = ?, items_extracted = ?
             WHERE id = ?",
        )
        .bind(extracted_data_json)
        .bind(api_results_json)
        .bind(counters.categories_requested)
        .bind(counters.categories_completed)
        .bind(counters.api_calls)
        .bind(counters.api_failures)
        .bind(counters.items_extracted)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_extraction_terminal(
        &self,
        run_id: &str,
        status: &str,
        error_message: Option<&str>,
    ) -> ApiResult<()> {
        sqlx::query(
            "UPDATE config_extraction_runs SET status = ?, error_message = ?,
             completed_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(status)
        .bind(error_message)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_extraction_run(&self, run_id: &str) -> ApiResult<ConfigExtractionRun> {
        sqlx::query_as("SELECT * FROM config_extraction_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::run_not_found(run_id))
    }

    pub async fn list_extraction_runs(&self, user_id: i64) -> ApiResult<Vec<ConfigExtractionRun>> {
        Ok(sqlx::query_as(
            "SELECT * FROM config_extraction_runs WHERE user_id = ?
             ORDER BY started_at DESC LIMIT 100",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // -- analysis runs --

    pub async fn create_analysis_run(
        &self,
        config_extraction_run_id: &str,
        org_id: &str,
    ) -> ApiResult<ConfigAnalysisRun> {
        let id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;
        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM config_analysis_runs
             WHERE config_extraction_run_id = ? AND org_id = ?",
        )
        .bind(config_extraction_run_id)
        .bind(org_id)
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO config_analysis_runs (id, config_extraction_run_id, org_id, version, status)
             VALUES (?, ?, ?, ?, 'running')",
        )
        .bind(&id)
        .bind(config_extraction_run_id)
        .bind(org_id)
        .bind(version)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_analysis_run(&id).await
    }

    pub async fn complete_analysis_run(&self, id: &str, analysis_data_json: &str) -> ApiResult<()> {
        sqlx::query(
            "UPDATE config_analysis_runs SET status = 'completed',
             completed_at = CURRENT_TIMESTAMP, analysis_data_json = ? WHERE id = ?",
        )
        .bind(analysis_data_json)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_analysis_terminal(
        &self,
        id: &str,
        status: &str,
        error_message: Option<&str>,
    ) -> ApiResult<()> {
        sqlx::query(
            "UPDATE config_analysis_runs SET status = ?, error_message = ?,
             completed_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(status)
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_analysis_run(&self, id: &str) -> ApiResult<ConfigAnalysisRun> {
        sqlx::query_as("SELECT * FROM config_analysis_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::run_not_found(id))
    }
}
