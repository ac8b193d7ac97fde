//! Persistence facade for the SQL corpus pipeline.
//!
//! Every operation acquires a connection from the pool, performs minimal
//! work, and returns it; nothing here is held across an LLM call. Writes
//! for extraction artifacts are bulk-inserted inside one transaction.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{AnalysisRun, ExtractionRun};
use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Clone, Default)]
pub struct ExtractionSummary {
    pub total_notebooks: i64,
    pub processed_notebooks: i64,
    pub skipped_notebooks: i64,
    pub total_cells: i64,
    pub valid_sqls: i64,
    pub unique_hashes: i64,
    pub api_failures: i64,
}

/// Row shape for bulk-inserting extracted statements.
#[derive(Debug, Clone, Default)]
pub struct NewExtractedSql {
    pub org_id: Option<String>,
    pub org_id_source: Option<String>,
    pub user_name: Option<String>,
    pub notebook_path: String,
    pub notebook_name: String,
    pub language: Option<String>,
    pub cell_number: i64,
    pub file_type: Option<String>,
    pub cleaned_sql: Option<String>,
    pub sql_hash: Option<String>,
    pub is_valid: bool,
    pub original_snippet: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewNotebookMetadata {
    pub notebook_path: String,
    pub notebook_name: String,
    pub user_name: Option<String>,
    pub object_id: Option<String>,
    pub language: Option<String>,
    pub created_at_str: Option<String>,
    pub modified_at_str: Option<String>,
    pub has_content: bool,
    pub file_type: Option<String>,
    pub status: String,
    pub job_ids: Option<String>,
    pub job_names: Option<String>,
    pub cont_success_run_count: Option<i64>,
    pub earliest_run_date: Option<String>,
    pub trigger_type: Option<String>,
}

#[derive(Clone)]
pub struct SqlCorpusStore {
    pool: SqlitePool,
}

impl SqlCorpusStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // -- extraction runs --

    pub async fn create_extraction_run(
        &self,
        run_id: &str,
        user_id: i64,
        workspace_url: &str,
        root_path: &str,
        modified_since: Option<&str>,
    ) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO extraction_runs (id, user_id, workspace_url, root_path, modified_since, status)
             VALUES (?, ?, ?, ?, ?, 'running')",
        )
        .bind(run_id)
        .bind(user_id)
        .bind(workspace_url)
        .bind(root_path)
        .bind(modified_since)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete_extraction_run(
        &self,
        run_id: &str,
        summary: &ExtractionSummary,
    ) -> ApiResult<()> {
        sqlx::query(
            "UPDATE extraction_runs SET status = 'completed', completed_at = CURRENT_TIMESTAMP,
             total_notebooks = ?, processed_notebooks = ?, skipped_notebooks = ?,
             total_cells = ?, valid_sqls = ?, unique_hashes = ?, api_failures = ?
             WHERE id = ?",
        )
        .bind(summary.total_notebooks)
        .bind(summary.processed_notebooks)
        .bind(summary.skipped_notebooks)
        .bind(summary.total_cells)
        .bind(summary.valid_sqls)
        .bind(summary.unique_hashes)
        .bind(summary.api_failures)
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
            "UPDATE extraction_runs SET status = ?, error_message = ?, completed_at = CURRENT_TIMESTAMP
             WHERE id = ?",
        )
        .bind(status)
        .bind(error_message)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_extraction_run(&self, run_id: &str) -> ApiResult<ExtractionRun> {
        sqlx::query_as("SELECT * FROM extraction_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::run_not_found(run_id))
    }

    pub async fn list_extraction_runs(&self, user_id: i64) -> ApiResult<Vec<ExtractionRun>> {
        Ok(sqlx::query_as(
            "SELECT * FROM extraction_runs WHERE user_id = ? ORDER BY started_at DESC LIMIT 100",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Delete a run and its children. Context docs referencing the run's
    /// analysis runs carry no foreign key, so they are removed explicitly
    /// first (unless promoted).
    pub async fn delete_extraction_run(&self, run_id: &str) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;
        let analysis_ids: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM analysis_runs WHERE extraction_run_id = ?")
                .bind(run_id)
                .fetch_all(&mut *tx)
                .await?;
        for (analysis_id,) in analysis_ids {
            sqlx::query("DELETE FROM context_docs WHERE source_run_id = ? AND status != 'active'")
                .bind(&analysis_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM extraction_runs WHERE id = ?")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // -- extraction artifacts (bulk) --

    pub async fn save_extracted_sqls(
        &self,
        run_id: &str,
        rows: &[NewExtractedSql],
    ) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO extracted_sqls (run_id, org_id, org_id_source, user_name,
                 notebook_path, notebook_name, language, cell_number, file_type,
                 cleaned_sql, sql_hash, is_valid, original_snippet)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(run_id)
            .bind(&row.org_id)
            .bind(&row.org_id_source)
            .bind(&row.user_name)
            .bind(&row.notebook_path)
            .bind(&row.notebook_name)
            .bind(&row.language)
            .bind(row.cell_number)
            .bind(&row.file_type)
            .bind(&row.cleaned_sql)
            .bind(&row.sql_hash)
            .bind(row.is_valid)
            .bind(&row.original_snippet)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn save_notebook_metadata(
        &self,
        run_id: &str,
        rows: &[NewNotebookMetadata],
    ) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO notebook_metadata (run_id, notebook_path, notebook_name, user_name,
                 object_id, language, created_at_str, modified_at_str, has_content, file_type,
                 status, job_ids, job_names, cont_success_run_count, earliest_run_date, trigger_type)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(run_id)
            .bind(&row.notebook_path)
            .bind(&row.notebook_name)
            .bind(&row.user_name)
            .bind(&row.object_id)
            .bind(&row.language)
            .bind(&row.created_at_str)
            .bind(&row.modified_at_str)
            .bind(row.has_content)
            .bind(&row.file_type)
            .bind(&row.status)
            .bind(&row.job_ids)
            .bind(&row.job_names)
            .bind(row.cont_success_run_count)
            .bind(&row.earliest_run_date)
            .bind(&row.trigger_type)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Valid SQL texts for one org within a run, as (sql, nl_question, frequency).
    pub async fn load_valid_sqls(
        &self,
        run_id: &str,
        org_id: &str,
    ) -> ApiResult<Vec<(String, Option<String>, i64)>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT cleaned_sql FROM extracted_sqls
             WHERE run_id = ? AND org_id = ? AND is_valid = TRUE AND cleaned_sql IS NOT NULL",
        )
        .bind(run_id)
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(sql,)| (sql, None, 1)).collect())
    }

    // -- analysis runs --

    /// Create an analysis run; the version is assigned atomically as
    /// max(existing)+1 within (extraction_run_id, org_id).
    pub async fn create_analysis_run(
        &self,
        extraction_run_id: &str,
        org_id: &str,
    ) -> ApiResult<AnalysisRun> {
        let id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;
        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM analysis_runs
             WHERE extraction_run_id = ? AND org_id = ?",
        )
        .bind(extraction_run_id)
        .bind(org_id)
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO analysis_runs (id, extraction_run_id, org_id, version, status)
             VALUES (?, ?, ?, ?, 'running')",
        )
        .bind(&id)
        .bind(extraction_run_id)
        .bind(org_id)
        .bind(version)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_analysis_run(&id).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn complete_analysis_run(
        &self,
        id: &str,
        total_weight: i64,
        counters_json: &str,
        literal_vals_json: &str,
        alias_conv_json: &str,
        fingerprints_json: &str,
        failures_json: &str,
        clusters_json: &str,
        classified_filters_json: &str,
    ) -> ApiResult<()> {
        sqlx::query(
            "UPDATE analysis_runs SET status = 'completed', completed_at = CURRENT_TIMESTAMP,
             total_weight = ?, counters_json = ?, literal_vals_json = ?, alias_conv_json = ?,
             fingerprints_json = ?, failures_json = ?, clusters_json = ?, classified_filters_json = ?
             WHERE id = ?",
        )
        .bind(total_weight)
        .bind(counters_json)
        .bind(literal_vals_json)
        .bind(alias_conv_json)
        .bind(fingerprints_json)
        .bind(failures_json)
        .bind(clusters_json)
        .bind(classified_filters_json)
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
            "UPDATE analysis_runs SET status = ?, error_message = ?, completed_at = CURRENT_TIMESTAMP
             WHERE id = ?",
        )
        .bind(status)
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_analysis_run(&self, id: &str) -> ApiResult<AnalysisRun> {
        sqlx::query_as("SELECT * FROM analysis_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::run_not_found(id))
    }

}
