//! SQL corpus pipeline rows: extraction runs, extracted statements, and
//! per-notebook metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::RunStatus;

/// One workspace extraction invocation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExtractionRun {
    pub id: String,
    pub user_id: i64,
    pub workspace_url: String,
    pub root_path: String,
    pub modified_since: Option<String>,
    pub total_notebooks: i64,
    pub processed_notebooks: i64,
    pub skipped_notebooks: i64,
    pub total_cells: i64,
    pub valid_sqls: i64,
    pub unique_hashes: i64,
    pub api_failures: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExtractionRun {
    pub fn status_enum(&self) -> RunStatus {
        RunStatus::parse_status(&self.status)
    }
}

/// One SQL statement extracted from one notebook cell.
///
/// `sql_hash` is sha256 over the trimmed `cleaned_sql`; rows with
/// `is_valid = false` are excluded from analysis.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExtractedSql {
    pub id: i64,
    pub run_id: String,
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

/// Metadata for every workspace object observed during a run.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotebookMetadata {
    pub id: i64,
    pub run_id: String,
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

/// Notebook processing status within a run.
pub const NOTEBOOK_STATUS_PROCESSED: &str = "Processed";
pub const NOTEBOOK_STATUS_SKIPPED_STALE: &str = "Skipped_Stale";

/// Request body for submitting an extraction run.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitExtractionRequest {
    /// Cluster key resolved through the workspace directory, e.g. "EU".
    pub cluster: String,
    #[serde(default = "default_root_path")]
    pub root_path: String,
    /// ISO date (YYYY-MM-DD) freshness cutoff.
    pub modified_since: Option<String>,
    pub notebook_limit: Option<usize>,
}

fn default_root_path() -> String {
    "/Workspace/Users".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitRunResponse {
    pub run_id: String,
    pub status: &'static str,
}

impl SubmitRunResponse {
    pub fn started(run_id: String) -> Self {
        Self { run_id, status: "started" }
    }
}
