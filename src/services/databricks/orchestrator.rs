//! SQL corpus pipeline orchestration: extraction, analysis, and document
//! generation runs. Each run is one registered background task that emits
//! progress to the triggering user and always writes a terminal status.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::config::{BudgetConfig, FilterConfig, PipelineConfig, ResolvedWorkspace};
use crate::models::{SubmitDocGenerationRequest, SOURCE_TYPE_DATABRICKS};
use crate::services::context_docs::{ContextDocStore, NewContextDoc};
use crate::services::llm::LlmGateway;
use crate::services::progress::ProgressHub;
use crate::services::task_registry::TaskRegistry;
use crate::utils::cancel::Cancelled;
use crate::utils::{ApiResult, CancelToken};

use super::author::{author_docs, build_preamble};
use super::client::WorkspaceClient;
use super::clusters::{build_clusters, classify_filters, ClassifiedFilter, QueryCluster};
use super::counters::build_counters;
use super::discovery::{
    export_notebooks_parallel, filter_notebooks_by_modified_date, find_all_notebooks,
    DiscoveryError, NotebookInfo,
};
use super::fingerprint::{extract_all_fingerprints, ingest_and_dedup};
use super::focus::assess_and_author_focus_docs;
use super::jobs::{build_job_notebook_map, compute_notebook_job_info, fetch_run_history_for_notebooks};
use super::qfp::QueryFingerprint;
use super::sql_extract::{
    extract_notebook_default_org_id, extract_sql_from_cell, extract_user_from_path,
    get_org_id_for_sql, sha256_hash,
};
use super::storage::{
    ExtractionSummary, NewExtractedSql, NewNotebookMetadata, SqlCorpusStore,
};
use super::validation::{check_budgets, spot_check, validate_and_patch};

static SQL_CELL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-- COMMAND ----------").unwrap());
static PY_CELL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"# COMMAND ----------").unwrap());

const SNIPPET_CAP: usize = 4000;

pub struct DatabricksService {
    store: SqlCorpusStore,
    doc_store: ContextDocStore,
    gateway: LlmGateway,
    hub: Arc<ProgressHub>,
    registry: Arc<TaskRegistry>,
    budgets: BudgetConfig,
    filters: FilterConfig,
    pipeline: PipelineConfig,
}

impl DatabricksService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SqlCorpusStore,
        doc_store: ContextDocStore,
        gateway: LlmGateway,
        hub: Arc<ProgressHub>,
        registry: Arc<TaskRegistry>,
        budgets: BudgetConfig,
        filters: FilterConfig,
        pipeline: PipelineConfig,
    ) -> Self {
        Self { store, doc_store, gateway, hub, registry, budgets, filters, pipeline }
    }

    pub fn store(&self) -> &SqlCorpusStore {
        &self.store
    }

    // -- extraction --

    /// Persist the run row, register the background task, return run id.
    pub async fn start_extraction(
        self: &Arc<Self>,
        user_id: i64,
        workspace: ResolvedWorkspace,
        root_path: String,
        modified_since: Option<String>,
        notebook_limit: Option<usize>,
    ) -> ApiResult<String> {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.store
            .create_extraction_run(
                &run_id,
                user_id,
                &workspace.url,
                &root_path,
                modified_since.as_deref(),
            )
            .await?;

        let service = Arc::clone(self);
        let task_run_id = run_id.clone();
        self.registry
            .submit(&format!("extraction-{}", run_id), user_id, move |cancel| async move {
                service
                    .run_extraction(
                        task_run_id,
                        user_id,
                        workspace,
                        root_path,
                        modified_since,
                        notebook_limit,
                        cancel,
                    )
                    .await
            })?;
        Ok(run_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_extraction(
        &self,
        run_id: String,
        user_id: i64,
        workspace: ResolvedWorkspace,
        root_path: String,
        modified_since: Option<String>,
        notebook_limit: Option<usize>,
        cancel: Arc<CancelToken>,
    ) -> anyhow::Result<()> {
        let result = self
            .extraction_inner(&run_id, user_id, &workspace, &root_path, modified_since.as_deref(), notebook_limit, &cancel)
            .await;
        self.finish("extraction", &run_id, user_id, result, |status, message| {
            let store = self.store.clone();
            let run_id = run_id.clone();
            async move { store.mark_extraction_terminal(&run_id, status, message.as_deref()).await }
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn extraction_inner(
        &self,
        run_id: &str,
        user_id: i64,
        workspace: &ResolvedWorkspace,
        root_path: &str,
        modified_since: Option<&str>,
        notebook_limit: Option<usize>,
        cancel: &CancelToken,
    ) -> anyhow::Result<()> {
        let hub = Arc::clone(&self.hub);
        let progress = |phase: &str, completed: usize, total: usize, detail: &str| {
            hub.emit_progress(user_id, "extraction", run_id, phase, completed, total, detail);
        };
        let max_workers = self.pipeline.max_workers;
        let dialect = self.pipeline.dialect.clone();

        let (client, mut failures_rx) = WorkspaceClient::new(&workspace.url, &workspace.token)?;
        let client = Arc::new(client);

        // Step 1: discovery + metadata.
        progress("discovery", 0, 0, "Discovering notebooks...");
        let all_notebooks = find_all_notebooks(
            &client,
            root_path,
            notebook_limit,
            max_workers,
            cancel,
            Some(&progress),
        )
        .await?;

        if all_notebooks.is_empty() {
            let summary = ExtractionSummary {
                api_failures: client.failure_count() as i64,
                ..Default::default()
            };
            self.store.complete_extraction_run(run_id, &summary).await?;
            self.hub.emit_terminal(
                user_id,
                "extraction",
                run_id,
                "complete",
                serde_json::json!({"detail": "No notebooks found"}),
            );
            return Ok(());
        }

        // Step 2: job associations.
        progress("jobs", 0, 0, "Fetching job associations...");
        let all_jobs = client.get_all_jobs().await?;
        let nb_to_jobs = build_job_notebook_map(&all_jobs);
        let any_matched = all_notebooks.iter().any(|nb| nb_to_jobs.contains_key(&nb.path));
        let nb_runs = if any_matched {
            fetch_run_history_for_notebooks(&client, &nb_to_jobs, max_workers, 25, Some(&progress))
                .await
        } else {
            Default::default()
        };
        cancel.check()?;

        // Step 3: freshness filter.
        let cutoff_ms = modified_since.and_then(parse_cutoff_ms);
        let total_discovered = all_notebooks.len();
        let (notebooks, skipped) = match cutoff_ms {
            Some(cutoff) => filter_notebooks_by_modified_date(all_notebooks, cutoff),
            None => (all_notebooks, Vec::new()),
        };

        // Step 4: export.
        progress("export", 0, notebooks.len(), "Exporting notebooks...");
        let exports =
            export_notebooks_parallel(&client, &notebooks, max_workers, cancel, Some(&progress))
                .await?;

        // Step 5: per-notebook cell extraction, in notebook-iteration order.
        let mut sql_rows: Vec<NewExtractedSql> = Vec::new();
        let mut metadata_rows: Vec<NewNotebookMetadata> = Vec::new();
        let total_nb = notebooks.len();
        let log_interval = (total_nb / 20).max(1);

        for (nb_idx, nb) in notebooks.iter().enumerate() {
            cancel.check()?;
            let export = exports.get(&nb.path);
            let job_info = compute_notebook_job_info(&nb.path, &nb_to_jobs, &nb_runs);
            metadata_rows.push(metadata_row(
                nb,
                export.is_some(),
                export.map(|(_, ft)| ft.clone()),
                crate::models::NOTEBOOK_STATUS_PROCESSED,
                &job_info,
            ));

            let Some((content, file_type)) = export else { continue };
            let notebook_default_org = extract_notebook_default_org_id(content);
            let boundary = if file_type.eq_ignore_ascii_case("sql") {
                &*SQL_CELL_BOUNDARY
            } else {
                &*PY_CELL_BOUNDARY
            };

            for (idx, cell) in boundary.split(content).enumerate() {
                let cell_content = cell.trim();
                if cell_content.is_empty() {
                    continue;
                }
                let (cleaned_sql, is_valid) =
                    extract_sql_from_cell(cell_content, file_type, &dialect);
                let (org_id, org_id_source) = get_org_id_for_sql(
                    cleaned_sql.as_deref(),
                    notebook_default_org.as_deref(),
                );
                let sql_hash = cleaned_sql.as_deref().and_then(sha256_hash);

                sql_rows.push(NewExtractedSql {
                    org_id,
                    org_id_source,
                    user_name: Some(extract_user_from_path(&nb.path)),
                    notebook_path: nb.path.clone(),
                    notebook_name: notebook_name(&nb.path),
                    language: nb.language.clone(),
                    cell_number: (idx + 1) as i64,
                    file_type: Some(file_type.clone()),
                    cleaned_sql,
                    sql_hash,
                    is_valid,
                    original_snippet: Some(
                        crate::utils::truncate_chars(cell_content, SNIPPET_CAP).to_string(),
                    ),
                });
            }

            let done = nb_idx + 1;
            if done % log_interval == 0 || done == total_nb {
                progress("extraction", done, total_nb, &format!("{} cells extracted", sql_rows.len()));
            }
        }

        // Step 6: skipped notebooks keep their metadata rows.
        for nb in &skipped {
            let job_info = compute_notebook_job_info(&nb.path, &nb_to_jobs, &nb_runs);
            metadata_rows.push(metadata_row(
                nb,
                false,
                None,
                crate::models::NOTEBOOK_STATUS_SKIPPED_STALE,
                &job_info,
            ));
        }

        // Step 7: summary + persistence.
        let valid: Vec<&NewExtractedSql> = sql_rows.iter().filter(|r| r.is_valid).collect();
        let unique_hashes = {
            let mut hashes: Vec<&str> =
                valid.iter().filter_map(|r| r.sql_hash.as_deref()).collect();
            hashes.sort();
            hashes.dedup();
            hashes.len()
        };
        let mut api_failures = 0i64;
        while failures_rx.try_recv().is_ok() {
            api_failures += 1;
        }

        let summary = ExtractionSummary {
            total_notebooks: total_discovered as i64,
            processed_notebooks: notebooks.len() as i64,
            skipped_notebooks: skipped.len() as i64,
            total_cells: sql_rows.len() as i64,
            valid_sqls: valid.len() as i64,
            unique_hashes: unique_hashes as i64,
            api_failures,
        };

        self.store.save_extracted_sqls(run_id, &sql_rows).await?;
        self.store.save_notebook_metadata(run_id, &metadata_rows).await?;
        self.store.complete_extraction_run(run_id, &summary).await?;

        self.hub.emit_terminal(
            user_id,
            "extraction",
            run_id,
            "complete",
            serde_json::json!({
                "total_notebooks": summary.total_notebooks,
                "processed_notebooks": summary.processed_notebooks,
                "skipped_notebooks": summary.skipped_notebooks,
                "total_cells": summary.total_cells,
                "valid_sqls": summary.valid_sqls,
                "unique_hashes": summary.unique_hashes,
                "api_failures": summary.api_failures,
            }),
        );
        Ok(())
    }

    // -- analysis --

    pub async fn start_analysis(
        self: &Arc<Self>,
        user_id: i64,
        extraction_run_id: &str,
        org_id: String,
    ) -> ApiResult<String> {
        // Validates the extraction run exists before creating the child.
        self.store.get_extraction_run(extraction_run_id).await?;
        let run = self.store.create_analysis_run(extraction_run_id, &org_id).await?;
        let analysis_id = run.id.clone();

        let service = Arc::clone(self);
        let task_id = analysis_id.clone();
        let extraction_run_id = extraction_run_id.to_string();
        self.registry
            .submit(&format!("analysis-{}", analysis_id), user_id, move |cancel| async move {
                service
                    .run_analysis(task_id, user_id, extraction_run_id, org_id, cancel)
                    .await
            })?;
        Ok(analysis_id)
    }

    async fn run_analysis(
        &self,
        analysis_id: String,
        user_id: i64,
        extraction_run_id: String,
        org_id: String,
        cancel: Arc<CancelToken>,
    ) -> anyhow::Result<()> {
        let result = self
            .analysis_inner(&analysis_id, user_id, &extraction_run_id, &org_id, &cancel)
            .await;
        self.finish("analysis", &analysis_id, user_id, result, |status, message| {
            let store = self.store.clone();
            let analysis_id = analysis_id.clone();
            async move { store.mark_analysis_terminal(&analysis_id, status, message.as_deref()).await }
        })
        .await
    }

    async fn analysis_inner(
        &self,
        analysis_id: &str,
        user_id: i64,
        extraction_run_id: &str,
        org_id: &str,
        cancel: &CancelToken,
    ) -> anyhow::Result<()> {
        let hub = Arc::clone(&self.hub);
        let run_id = analysis_id.to_string();
        let progress = move |phase: &str, completed: usize, total: usize, detail: &str| {
            hub.emit_progress(user_id, "analysis", &run_id, phase, completed, total, detail);
        };

        let records = self.store.load_valid_sqls(extraction_run_id, org_id).await?;
        if records.is_empty() {
            anyhow::bail!("No valid SQL found for org {} in this extraction run", org_id);
        }
        progress("dedup", 0, records.len(), &format!("{} valid statements loaded", records.len()));
        cancel.check()?;

        // Phase 0 + 1 are CPU-bound; run them off the event loop.
        let dialect = self.pipeline.dialect.clone();
        let corpus =
            tokio::task::spawn_blocking(move || ingest_and_dedup(records, &dialect)).await?;
        progress("dedup", corpus.len(), corpus.len(), &format!("{} unique queries", corpus.len()));
        cancel.check()?;

        let dialect = self.pipeline.dialect.clone();
        let corpus_for_extract = corpus.clone();
        let (fingerprints, failures) = tokio::task::spawn_blocking(move || {
            extract_all_fingerprints(&corpus_for_extract, &dialect)
        })
        .await?;
        progress(
            "fingerprint",
            fingerprints.len(),
            corpus.len(),
            &format!("{} fingerprints extracted, {} failures", fingerprints.len(), failures.len()),
        );
        cancel.check()?;

        let bundle = build_counters(&fingerprints);
        let clusters = build_clusters(&fingerprints);
        let classified =
            classify_filters(&bundle.counters.where_cond, &fingerprints, bundle.total_weight, &self.filters);
        progress(
            "aggregate",
            clusters.len(),
            clusters.len(),
            &format!("{} clusters, {} classified filters", clusters.len(), classified.len()),
        );

        self.store
            .complete_analysis_run(
                analysis_id,
                bundle.total_weight,
                &bundle.counters_to_json().to_string(),
                &bundle.literal_vals_to_json().to_string(),
                &bundle.alias_conv_to_json().to_string(),
                &serde_json::to_string(&fingerprints)?,
                &serde_json::to_string(&failures)?,
                &serde_json::to_string(&clusters)?,
                &serde_json::to_string(&classified)?,
            )
            .await?;

        self.hub.emit_terminal(
            user_id,
            "analysis",
            analysis_id,
            "complete",
            serde_json::json!({
                "unique_queries": fingerprints.len(),
                "total_weight": bundle.total_weight,
                "clusters": clusters.len(),
                "failures": failures.len(),
            }),
        );
        Ok(())
    }

    // -- document generation --

    pub async fn start_doc_generation(
        self: &Arc<Self>,
        user_id: i64,
        analysis_id: &str,
        request: SubmitDocGenerationRequest,
    ) -> ApiResult<String> {
        let run = self.store.get_analysis_run(analysis_id).await?;
        if run.status != "completed" {
            return Err(crate::utils::ApiError::validation_error(
                "Analysis run is not completed; cannot author documents",
            ));
        }

        let service = Arc::clone(self);
        let task_id = analysis_id.to_string();
        self.registry
            .submit(&format!("context-docs-{}", analysis_id), user_id, move |cancel| async move {
                service.run_doc_generation(task_id, user_id, request, cancel).await
            })?;
        Ok(analysis_id.to_string())
    }

    async fn run_doc_generation(
        &self,
        analysis_id: String,
        user_id: i64,
        request: SubmitDocGenerationRequest,
        cancel: Arc<CancelToken>,
    ) -> anyhow::Result<()> {
        let result = self
            .doc_generation_inner(&analysis_id, user_id, &request, &cancel)
            .await;
        // Doc generation has no run row of its own; terminal state lives on
        // the emitted event plus the persisted docs.
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is::<Cancelled>() => {
                self.hub.emit_terminal(
                    user_id,
                    "context_docs",
                    &analysis_id,
                    "cancelled",
                    serde_json::json!({}),
                );
                Ok(())
            }
            Err(e) => {
                self.hub.emit_terminal(
                    user_id,
                    "context_docs",
                    &analysis_id,
                    "failed",
                    serde_json::json!({"error": e.to_string()}),
                );
                Err(e)
            }
        }
    }

    async fn doc_generation_inner(
        &self,
        analysis_id: &str,
        user_id: i64,
        request: &SubmitDocGenerationRequest,
        cancel: &CancelToken,
    ) -> anyhow::Result<()> {
        let hub = Arc::clone(&self.hub);
        let run_id = analysis_id.to_string();
        let progress = move |phase: &str, completed: usize, total: usize, detail: &str| {
            hub.emit_progress(user_id, "context_docs", &run_id, phase, completed, total, detail);
        };

        let run = self.store.get_analysis_run(analysis_id).await?;
        let fingerprints: Vec<QueryFingerprint> =
            serde_json::from_str(run.fingerprints_json.as_deref().unwrap_or("[]"))?;
        let clusters: Vec<QueryCluster> =
            serde_json::from_str(run.clusters_json.as_deref().unwrap_or("[]"))?;
        let classified: Vec<ClassifiedFilter> =
            serde_json::from_str(run.classified_filters_json.as_deref().unwrap_or("[]"))?;
        if fingerprints.is_empty() {
            anyhow::bail!("Analysis run has no fingerprints to author from");
        }

        // Counters are cheap and deterministic; rebuild from fingerprints
        // instead of re-hydrating the serialized form.
        let bundle = build_counters(&fingerprints);

        let provider = request
            .provider
            .clone()
            .unwrap_or_else(|| self.gateway.default_provider().to_string());
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.gateway.default_model().to_string());

        let payloads = super::payload::build_all_payloads(
            &bundle,
            &fingerprints,
            &clusters,
            &classified,
            self.filters.max_enum_distinct,
            request.inclusions.as_ref(),
        );
        let preamble = build_preamble(&bundle, self.pipeline.top_glossary_cols);
        cancel.check()?;

        progress("authoring", 0, 5, "Authoring 5 core documents");
        let docs = author_docs(
            &self.gateway,
            &payloads,
            &preamble,
            &provider,
            &model,
            &self.budgets,
            self.budgets.max_payload_chars,
            Some(&progress),
        )
        .await;
        if docs.is_empty() {
            anyhow::bail!("All document authoring calls failed");
        }
        cancel.check()?;

        let (docs, validation_report) = validate_and_patch(
            &self.gateway,
            docs,
            &payloads,
            &preamble,
            &provider,
            &model,
            &self.budgets,
            self.budgets.max_payload_chars,
            Some(&progress),
        )
        .await;
        cancel.check()?;

        let spot_rate = spot_check(&fingerprints, &docs, 20);
        let budget_report = check_budgets(&docs, &self.budgets);
        progress("validation", 0, 0, &format!("Spot-check table coverage: {:.0}%", spot_rate));

        let focus_docs = assess_and_author_focus_docs(
            &self.gateway,
            &docs,
            &bundle,
            &clusters,
            &classified,
            &fingerprints,
            &preamble,
            &provider,
            &model,
            &self.budgets,
            self.filters.max_enum_distinct,
            self.budgets.max_payload_chars,
            request.focus_domains.as_deref(),
            Some(&progress),
        )
        .await;
        cancel.check()?;

        let warnings = serde_json::json!({
            "validation_report": validation_report,
            "spot_check_pct": spot_rate,
            "budgets": budget_report,
        })
        .to_string();

        let mut saved_keys = Vec::new();
        for doc in docs.values().chain(focus_docs.values()) {
            self.doc_store
                .save(&NewContextDoc {
                    source_type: SOURCE_TYPE_DATABRICKS.to_string(),
                    source_run_id: analysis_id.to_string(),
                    org_id: run.org_id.clone(),
                    doc_key: doc.doc_key.clone(),
                    doc_name: doc.doc_name.clone(),
                    doc_content: doc.content.clone(),
                    provider_used: provider.clone(),
                    model_used: model.clone(),
                    system_prompt_used: doc.system_prompt.clone(),
                    payload_sent: doc.payload_sent.clone(),
                    warnings_json: Some(warnings.clone()),
                })
                .await?;
            saved_keys.push(doc.doc_key.clone());
        }

        self.hub.emit_terminal(
            user_id,
            "context_docs",
            analysis_id,
            "complete",
            serde_json::json!({"docs": saved_keys, "spot_check_pct": spot_rate}),
        );
        Ok(())
    }

    // -- shared terminal handling --

    /// Map a pipeline result to persisted terminal status + event.
    /// Cancellation is not an error; failures propagate after persisting.
    async fn finish<F, Fut>(
        &self,
        pipeline: &str,
        run_id: &str,
        user_id: i64,
        result: anyhow::Result<()>,
        mark: F,
    ) -> anyhow::Result<()>
    where
        F: FnOnce(&'static str, Option<String>) -> Fut,
        Fut: std::future::Future<Output = ApiResult<()>>,
    {
        match result {
            Ok(()) => Ok(()),
            Err(e) if is_cancelled(&e) => {
                mark("cancelled", Some("Cancelled by user".to_string())).await?;
                self.hub
                    .emit_terminal(user_id, pipeline, run_id, "cancelled", serde_json::json!({}));
                Ok(())
            }
            Err(e) => {
                mark("failed", Some(e.to_string())).await?;
                self.hub.emit_terminal(
                    user_id,
                    pipeline,
                    run_id,
                    "failed",
                    serde_json::json!({"error": e.to_string()}),
                );
                Err(e)
            }
        }
    }
}

fn is_cancelled(e: &anyhow::Error) -> bool {
    e.is::<Cancelled>()
        || e.downcast_ref::<DiscoveryError>()
            .is_some_and(|d| matches!(d, DiscoveryError::Cancelled(_)))
}

fn parse_cutoff_ms(date: &str) -> Option<i64> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn notebook_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn metadata_row(
    nb: &NotebookInfo,
    has_content: bool,
    file_type: Option<String>,
    status: &str,
    job_info: &super::jobs::NotebookJobInfo,
) -> NewNotebookMetadata {
    NewNotebookMetadata {
        notebook_path: nb.path.clone(),
        notebook_name: notebook_name(&nb.path),
        user_name: Some(extract_user_from_path(&nb.path)),
        object_id: nb.object_id.clone(),
        language: nb.language.clone(),
        created_at_str: nb.created_at_str.clone(),
        modified_at_str: nb.modified_at_str.clone(),
        has_content,
        file_type,
        status: status.to_string(),
        job_ids: job_info.job_ids.clone(),
        job_names: job_info.job_names.clone(),
        cont_success_run_count: job_info.cont_success_run_count,
        earliest_run_date: job_info.earliest_run_date.clone(),
        trigger_type: job_info.trigger_type.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_parsing() {
        let ms = parse_cutoff_ms("2024-06-01").unwrap();
        assert!(ms > 1_700_000_000_000);
        assert!(parse_cutoff_ms("not-a-date").is_none());
    }

    #[test]
    fn notebook_name_is_last_segment() {
        assert_eq!(notebook_name("/Workspace/Users/a/daily_report"), "daily_report");
    }
}
