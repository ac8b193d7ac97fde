//! Wiki (Confluence Cloud) ingest: basic-auth REST client, storage-format
//! HTML to markdown conversion, and the extraction run that stores pages as
//! context documents.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConfluenceConfig;
use crate::models::SOURCE_TYPE_CONFLUENCE;
use crate::services::context_docs::{ContextDocStore, NewContextDoc};
use crate::services::progress::ProgressHub;
use crate::services::task_registry::TaskRegistry;
use crate::utils::cancel::Cancelled;
use crate::utils::{ApiError, ApiResult, CancelToken};

static MACRO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<ac:structured-macro.*?</ac:structured-macro>").unwrap());
static STYLE_SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<(style|script)[^>]*>.*?</(style|script)>").unwrap());

/// Convert storage-format HTML to clean markdown: macros and style/script
/// blocks are stripped first, blank-line runs collapsed after.
pub fn html_to_markdown(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let cleaned = MACRO_RE.replace_all(html, "");
    let cleaned = STYLE_SCRIPT_RE.replace_all(&cleaned, "");
    let markdown = html2md::parse_html(&cleaned);

    let mut lines = Vec::new();
    let mut prev_blank = false;
    for line in markdown.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            if !prev_blank {
                lines.push("");
                prev_blank = true;
            }
        } else {
            lines.push(trimmed);
            prev_blank = false;
        }
    }
    lines.join("\n").trim().to_string()
}

pub struct ConfluenceClient {
    base_url: String,
    email: String,
    api_token: String,
    http: reqwest::Client,
}

impl ConfluenceClient {
    pub fn new(config: &ConfluenceConfig) -> ApiResult<Self> {
        let (Some(url), Some(email), Some(api_token)) =
            (config.url.clone(), config.email.clone(), config.api_token.clone())
        else {
            return Err(ApiError::validation_error(
                "Confluence credentials missing. Set CONFLUENCE_URL, CONFLUENCE_EMAIL, and CONFLUENCE_API_TOKEN.",
            ));
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::internal_error(e.to_string()))?;
        Ok(Self { base_url: url.trim_end_matches('/').to_string(), email, api_token, http })
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> ApiResult<Value> {
        let url = format!("{}/wiki/rest/api{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.email, Some(&self.api_token))
            .query(params)
            .send()
            .await
            .map_err(|e| ApiError::upstream_failed(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ApiError::UpstreamAuthFailed(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(ApiError::upstream_failed(format!("HTTP {} for {}", status, url)));
        }
        response
            .json()
            .await
            .map_err(|e| ApiError::upstream_failed(e.to_string()))
    }

    pub async fn test_connection(&self) -> bool {
        self.get("/space", &[("limit", "1".to_string())]).await.is_ok()
    }

    pub async fn list_spaces(&self, limit: usize) -> ApiResult<Vec<Value>> {
        let data = self.get("/space", &[("limit", limit.to_string())]).await?;
        Ok(data["results"].as_array().cloned().unwrap_or_default())
    }

    /// Pages of one space via CQL search.
    pub async fn list_space_pages(&self, space_key: &str, limit: usize) -> ApiResult<Vec<Value>> {
        let cql = format!("type=page AND space=\"{}\"", space_key);
        let data = self
            .get("/content/search", &[("cql", cql), ("limit", limit.to_string())])
            .await?;
        Ok(data["results"].as_array().cloned().unwrap_or_default())
    }

    /// One page with its body converted to markdown.
    pub async fn get_page(&self, page_id: &str) -> ApiResult<(String, String)> {
        let data = self
            .get(
                &format!("/content/{}", page_id),
                &[("expand", "body.storage,version,space".to_string())],
            )
            .await?;
        let title = data["title"].as_str().unwrap_or("").to_string();
        let storage_html = data["body"]["storage"]["value"].as_str().unwrap_or("");
        Ok((title, html_to_markdown(storage_html)))
    }
}

pub struct ConfluenceService {
    pool: SqlitePool,
    doc_store: ContextDocStore,
    config: ConfluenceConfig,
    hub: Arc<ProgressHub>,
    registry: Arc<TaskRegistry>,
}

impl ConfluenceService {
    pub fn new(
        pool: SqlitePool,
        doc_store: ContextDocStore,
        config: ConfluenceConfig,
        hub: Arc<ProgressHub>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self { pool, doc_store, config, hub, registry }
    }

    pub async fn start_extraction(
        self: &Arc<Self>,
        user_id: i64,
        org_id: String,
        space_key: String,
    ) -> ApiResult<String> {
        // Credentials are validated before the run row exists.
        ConfluenceClient::new(&self.config)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO confluence_extractions (id, user_id, org_id, space_key, status)
             VALUES (?, ?, ?, ?, 'running')",
        )
        .bind(&run_id)
        .bind(user_id)
        .bind(&org_id)
        .bind(&space_key)
        .execute(&self.pool)
        .await?;

        let service = Arc::clone(self);
        let task_run_id = run_id.clone();
        self.registry.submit(
            &format!("confluence-{}", run_id),
            user_id,
            move |cancel| async move {
                service
                    .run_extraction(task_run_id, user_id, org_id, space_key, cancel)
                    .await
            },
        )?;
        Ok(run_id)
    }

    async fn run_extraction(
        &self,
        run_id: String,
        user_id: i64,
        org_id: String,
        space_key: String,
        cancel: Arc<CancelToken>,
    ) -> anyhow::Result<()> {
        let result = self
            .extraction_inner(&run_id, user_id, &org_id, &space_key, &cancel)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is::<Cancelled>() => {
                self.mark_terminal(&run_id, "cancelled", Some("Cancelled by user")).await?;
                self.hub
                    .emit_terminal(user_id, "confluence", &run_id, "cancelled", json!({}));
                Ok(())
            }
            Err(e) => {
                self.mark_terminal(&run_id, "failed", Some(&e.to_string())).await?;
                self.hub.emit_terminal(
                    user_id,
                    "confluence",
                    &run_id,
                    "failed",
                    json!({"error": e.to_string()}),
                );
                Err(e)
            }
        }
    }

    async fn extraction_inner(
        &self,
        run_id: &str,
        user_id: i64,
        org_id: &str,
        space_key: &str,
        cancel: &CancelToken,
    ) -> anyhow::Result<()> {
        let client = ConfluenceClient::new(&self.config)?;

        let pages = client.list_space_pages(space_key, 100).await?;
        let total = pages.len();
        self.hub.emit_progress(
            user_id,
            "confluence",
            run_id,
            "discovery",
            0,
            total,
            &format!("{} pages found in space {}", total, space_key),
        );

        let mut extracted = 0i64;
        let mut failed = 0i64;
        for (idx, page) in pages.iter().enumerate() {
            cancel.check()?;
            let page_id = page["content"]["id"]
                .as_str()
                .or_else(|| page["id"].as_str())
                .unwrap_or_default()
                .to_string();
            if page_id.is_empty() {
                failed += 1;
                continue;
            }
            match client.get_page(&page_id).await {
                Ok((title, markdown)) if !markdown.trim().is_empty() => {
                    self.doc_store
                        .save(&NewContextDoc {
                            source_type: SOURCE_TYPE_CONFLUENCE.to_string(),
                            source_run_id: run_id.to_string(),
                            org_id: org_id.to_string(),
                            doc_key: format!("wiki_{}", page_id),
                            doc_name: title,
                            doc_content: markdown,
                            provider_used: String::new(),
                            model_used: String::new(),
                            system_prompt_used: String::new(),
                            payload_sent: String::new(),
                            warnings_json: None,
                        })
                        .await?;
                    extracted += 1;
                }
                Ok(_) => failed += 1,
                Err(e) => {
                    // Item-level failure; the rest of the space still lands.
                    tracing::warn!("Failed to fetch page {}: {}", page_id, e);
                    failed += 1;
                }
            }
            self.hub.emit_progress(
                user_id,
                "confluence",
                run_id,
                "extraction",
                idx + 1,
                total,
                &format!("{} pages stored", extracted),
            );
        }

        sqlx::query(
            "UPDATE confluence_extractions SET status = 'completed',
             completed_at = CURRENT_TIMESTAMP, pages_discovered = ?,
             pages_extracted = ?, pages_failed = ? WHERE id = ?",
        )
        .bind(total as i64)
        .bind(extracted)
        .bind(failed)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        self.hub.emit_terminal(
            user_id,
            "confluence",
            run_id,
            "complete",
            json!({"pages_discovered": total, "pages_extracted": extracted, "pages_failed": failed}),
        );
        Ok(())
    }

    async fn mark_terminal(
        &self,
        run_id: &str,
        status: &str,
        error_message: Option<&str>,
    ) -> ApiResult<()> {
        sqlx::query(
            "UPDATE confluence_extractions SET status = ?, error_message = ?,
             completed_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(status)
        .bind(error_message)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_conversion_strips_macros_and_collapses_blanks() {
        let html = r#"<h1>Guide</h1>
<ac:structured-macro ac:name="toc"><ac:parameter>x</ac:parameter></ac:structured-macro>
<p>First paragraph.</p>


<p>Second paragraph.</p>
<style>.x { color: red }</style>"#;
        let markdown = html_to_markdown(html);
        assert!(markdown.contains("Guide"));
        assert!(markdown.contains("First paragraph."));
        assert!(!markdown.contains("toc"));
        assert!(!markdown.contains("color: red"));
        assert!(!markdown.contains("\n\n\n"));
    }

    #[test]
    fn empty_html_yields_empty_markdown() {
        assert_eq!(html_to_markdown(""), "");
    }
}
