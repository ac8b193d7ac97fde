//! Context documents and context-tree runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::RunStatus;

pub const SOURCE_TYPE_DATABRICKS: &str = "databricks";
pub const SOURCE_TYPE_CONFIG_APIS: &str = "config_apis";
pub const SOURCE_TYPE_CONFLUENCE: &str = "confluence";

pub const DOC_STATUS_ACTIVE: &str = "active";
pub const DOC_STATUS_SUPERSEDED: &str = "superseded";

/// One authored context document.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ContextDoc {
    pub id: i64,
    pub source_type: String,
    pub source_run_id: String,
    pub org_id: String,
    pub doc_key: String,
    pub doc_name: String,
    pub doc_content: String,
    pub provider_used: Option<String>,
    pub model_used: Option<String>,
    pub system_prompt_used: Option<String>,
    pub payload_sent: Option<String>,
    pub token_count: Option<i64>,
    pub status: String,
    pub warnings_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A context doc stripped of audit fields, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct ContextDocSummary {
    pub id: i64,
    pub source_type: String,
    pub doc_key: String,
    pub doc_name: String,
    pub status: String,
    pub token_count: Option<i64>,
    pub created_at: String,
}

impl From<&ContextDoc> for ContextDocSummary {
    fn from(d: &ContextDoc) -> Self {
        Self {
            id: d.id,
            source_type: d.source_type.clone(),
            doc_key: d.doc_key.clone(),
            doc_name: d.doc_name.clone(),
            status: d.status.clone(),
            token_count: d.token_count,
            created_at: d.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ContextTreeRun {
    pub id: String,
    pub user_id: i64,
    pub org_id: String,
    pub input_sources_json: Option<String>,
    pub input_context_count: i64,
    pub tree_data_json: Option<String>,
    pub model_used: Option<String>,
    pub provider_used: Option<String>,
    pub token_usage_json: Option<String>,
    pub system_prompt_used: Option<String>,
    /// Append-only log of {phase, detail, status} entries.
    pub progress_data_json: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ContextTreeRun {
    pub fn status_enum(&self) -> RunStatus {
        RunStatus::parse_status(&self.status)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTreeRequest {
    pub org_id: String,
    /// Base URL of the platform hosting live contexts.
    pub base_url: Option<String>,
    /// Platform token for the live-context fetch; never persisted.
    pub token: Option<String>,
    /// Run the blueprint sanitizer instead of raw content attach.
    #[serde(default)]
    pub sanitize: bool,
    pub blueprint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestructureRequest {
    pub node_ids: Vec<String>,
    pub instruction: String,
}
