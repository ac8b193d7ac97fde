//! SQL analysis run rows. The analysis artifacts (counters, fingerprints,
//! clusters, classified filters) are serialized to JSON columns at the
//! persistence boundary only — in-process they are the typed structures in
//! `services::databricks`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::RunStatus;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: String,
    pub extraction_run_id: String,
    pub org_id: String,
    /// Monotone per (extraction_run_id, org_id); assigned as max(existing)+1
    /// inside the creating transaction.
    pub version: i64,
    pub status: String,
    pub total_weight: i64,
    pub counters_json: Option<String>,
    pub literal_vals_json: Option<String>,
    pub alias_conv_json: Option<String>,
    pub fingerprints_json: Option<String>,
    pub failures_json: Option<String>,
    pub clusters_json: Option<String>,
    pub classified_filters_json: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisRun {
    pub fn status_enum(&self) -> RunStatus {
        RunStatus::parse_status(&self.status)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAnalysisRequest {
    pub org_id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SubmitDocGenerationRequest {
    /// Per-slot inclusion overrides: {doc_key: {section: {item: bool}}}.
    pub inclusions: Option<serde_json::Value>,
    /// Restrict focus-doc topics to these domains, if present.
    pub focus_domains: Option<Vec<String>>,
    pub provider: Option<String>,
    pub model: Option<String>,
}
