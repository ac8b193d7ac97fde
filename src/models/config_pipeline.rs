//! Configuration-object pipeline rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::RunStatus;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ConfigExtractionRun {
    pub id: String,
    pub user_id: i64,
    pub host: String,
    pub org_id: String,
    pub categories_json: String,
    pub params_json: Option<String>,
    pub extracted_data_json: Option<String>,
    pub api_results_json: Option<String>,
    pub categories_requested: i64,
    pub categories_completed: i64,
    pub api_calls: i64,
    pub api_failures: i64,
    pub items_extracted: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConfigExtractionRun {
    pub fn status_enum(&self) -> RunStatus {
        RunStatus::parse_status(&self.status)
    }
}

/// Config analysis stores one JSON document: inventory, per-category
/// structural summaries, fingerprints, counters, clusters.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ConfigAnalysisRun {
    pub id: String,
    pub config_extraction_run_id: String,
    pub org_id: String,
    pub version: i64,
    pub status: String,
    pub analysis_data_json: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConfigAnalysisRun {
    pub fn status_enum(&self) -> RunStatus {
        RunStatus::parse_status(&self.status)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitConfigExtractionRequest {
    pub host: String,
    pub org_id: String,
    /// Platform access token for this run; never persisted.
    pub token: String,
    pub categories: Vec<String>,
    /// Per-category parameters, e.g. {"loyalty": {"program_id": 123}}.
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitConfigDocsRequest {
    #[serde(default)]
    pub inclusions: Option<serde_json::Value>,
    pub provider: Option<String>,
    pub model: Option<String>,
}
