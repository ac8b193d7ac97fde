//! Context collector — gathers every context document for an organization:
//! pipeline-generated docs from the store plus live platform contexts over
//! HTTP, deduplicated by name with the generated version preferred.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::models::{SOURCE_TYPE_CONFIG_APIS, SOURCE_TYPE_CONFLUENCE, SOURCE_TYPE_DATABRICKS};
use crate::services::context_docs::ContextDocStore;
use crate::utils::ApiResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedContext {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_key: Option<String>,
    pub content: String,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionResult {
    pub sources: Vec<CollectedContext>,
    pub input_sources: Value,
    pub summary: Value,
}

/// Live-context endpoint on the downstream platform.
const LIVE_CONTEXT_PATH: &str = "/ask-aira/context/list";

pub async fn collect_all_contexts(
    doc_store: &ContextDocStore,
    org_id: &str,
    base_url: Option<&str>,
    token: Option<&str>,
) -> ApiResult<CollectionResult> {
    let databricks_docs = fetch_generated(doc_store, org_id, SOURCE_TYPE_DATABRICKS).await?;
    let config_docs = fetch_generated(doc_store, org_id, SOURCE_TYPE_CONFIG_APIS).await?;
    let confluence_docs = fetch_generated(doc_store, org_id, SOURCE_TYPE_CONFLUENCE).await?;

    let live = match (base_url, token) {
        (Some(base_url), Some(token)) if !base_url.is_empty() => {
            fetch_live_contexts(base_url, token, org_id).await
        }
        _ => Vec::new(),
    };

    // A previously uploaded generated doc also appears in the live list;
    // prefer the generated version, which carries richer metadata.
    let mut generated = databricks_docs;
    generated.extend(config_docs);
    generated.extend(confluence_docs);
    let generated_names: Vec<String> =
        generated.iter().map(|d| d.name.to_lowercase().trim().to_string()).collect();
    let live_unique: Vec<CollectedContext> = live
        .into_iter()
        .filter(|ctx| !generated_names.contains(&ctx.name.to_lowercase().trim().to_string()))
        .collect();

    let mut sources = generated;
    sources.extend(live_unique);
    sources.retain(|ctx| !ctx.content.trim().is_empty());

    let ids_for = |source: &str| -> Vec<Value> {
        sources
            .iter()
            .filter(|c| c.source == source)
            .map(|c| {
                c.doc_id
                    .map(Value::from)
                    .or_else(|| c.context_id.clone().map(Value::from))
                    .unwrap_or(Value::Null)
            })
            .collect()
    };
    let count_for =
        |source: &str| sources.iter().filter(|c| c.source == source).count();

    let input_sources = json!({
        SOURCE_TYPE_DATABRICKS: ids_for(SOURCE_TYPE_DATABRICKS),
        SOURCE_TYPE_CONFIG_APIS: ids_for(SOURCE_TYPE_CONFIG_APIS),
        SOURCE_TYPE_CONFLUENCE: ids_for(SOURCE_TYPE_CONFLUENCE),
        "platform": ids_for("platform"),
    });
    let summary = json!({
        SOURCE_TYPE_DATABRICKS: count_for(SOURCE_TYPE_DATABRICKS),
        SOURCE_TYPE_CONFIG_APIS: count_for(SOURCE_TYPE_CONFIG_APIS),
        SOURCE_TYPE_CONFLUENCE: count_for(SOURCE_TYPE_CONFLUENCE),
        "platform": count_for("platform"),
        "total": sources.len(),
    });

    tracing::info!("Collected {} contexts for org {}: {}", sources.len(), org_id, summary);

    Ok(CollectionResult { sources, input_sources, summary })
}

async fn fetch_generated(
    doc_store: &ContextDocStore,
    org_id: &str,
    source_type: &str,
) -> ApiResult<Vec<CollectedContext>> {
    let docs = doc_store.list_active(org_id, source_type).await?;
    Ok(docs
        .into_iter()
        .map(|doc| CollectedContext {
            source: source_type.to_string(),
            doc_id: Some(doc.id),
            context_id: None,
            name: if doc.doc_name.is_empty() { doc.doc_key.clone() } else { doc.doc_name },
            doc_key: Some(doc.doc_key),
            content: doc.doc_content,
            scope: "org".to_string(),
        })
        .collect())
}

/// Live contexts from the downstream platform. Failures are logged and
/// yield an empty list; the tree can still build from generated docs.
async fn fetch_live_contexts(base_url: &str, token: &str, org_id: &str) -> Vec<CollectedContext> {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Failed to build live-context client: {}", e);
            return Vec::new();
        }
    };

    let url = format!("{}{}", base_url.trim_end_matches('/'), LIVE_CONTEXT_PATH);
    let response = match client
        .get(&url)
        .bearer_auth(token)
        .header("x-cap-api-auth-org-id", org_id)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Failed to fetch live contexts: {}", e);
            return Vec::new();
        }
    };
    if !response.status().is_success() {
        tracing::warn!("Live context list failed: HTTP {}", response.status());
        return Vec::new();
    }
    let data: Value = match response.json().await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Live context list returned invalid JSON: {}", e);
            return Vec::new();
        }
    };

    let raw_list = if let Some(list) = data.as_array() {
        list.clone()
    } else {
        data["data"]
            .as_array()
            .or_else(|| data["contexts"].as_array())
            .cloned()
            .unwrap_or_default()
    };

    raw_list
        .into_iter()
        .map(|item| {
            let raw_content = item["content"]
                .as_str()
                .or_else(|| item["context"].as_str())
                .unwrap_or_default();
            CollectedContext {
                source: "platform".to_string(),
                doc_id: None,
                context_id: Some(
                    item["id"]
                        .as_str()
                        .map(String::from)
                        .or_else(|| item["id"].as_i64().map(|v| v.to_string()))
                        .or_else(|| item["contextId"].as_str().map(String::from))
                        .unwrap_or_default(),
                ),
                name: item["name"].as_str().unwrap_or("Unnamed").to_string(),
                doc_key: None,
                content: decode_opportunistically(raw_content),
                scope: item["scope"].as_str().unwrap_or("org").to_string(),
            }
        })
        .collect()
}

/// The platform stores content base64-encoded; plain text passes through.
fn decode_opportunistically(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    match base64::engine::general_purpose::STANDARD.decode(raw.trim()) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => raw.to_string(),
        },
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_content_is_decoded_and_plain_passes_through() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("# Heading\nBody");
        assert_eq!(decode_opportunistically(&encoded), "# Heading\nBody");
        assert_eq!(decode_opportunistically("already plain text!"), "already plain text!");
        assert_eq!(decode_opportunistically(""), "");
    }
}
