//! Context-tree engine orchestration.
//!
//! Pipeline: collect contexts -> build tree via LLM -> (optional blueprint
//! sanitization) -> secret scan -> conflict detection -> redundancy
//! detection -> health scoring -> persist. Progress is both streamed to the
//! user and appended to the run's durable progress log. The enrichment
//! passes are individually non-fatal.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{BudgetConfig, ChatConfig};
use crate::models::SubmitTreeRequest;
use crate::services::context_docs::ContextDocStore;
use crate::services::llm::LlmGateway;
use crate::services::progress::ProgressHub;
use crate::services::task_registry::TaskRegistry;
use crate::utils::cancel::Cancelled;
use crate::utils::{ApiResult, CancelToken};

use super::collector::collect_all_contexts;
use super::health::score_tree_health;
use super::node::TreeNode;
use super::redundancy::{detect_redundancy, DEFAULT_THRESHOLD};
use super::restructure::{propose_restructure, RestructureProposal};
use super::sanitizer::sanitize_tree_content;
use super::secret_scanner::scan_tree_secrets;
use super::storage::TreeRunStore;
use super::tree_builder::build_tree;

pub struct ContextEngineService {
    store: TreeRunStore,
    doc_store: ContextDocStore,
    gateway: LlmGateway,
    hub: Arc<ProgressHub>,
    registry: Arc<TaskRegistry>,
    budgets: BudgetConfig,
    chat: ChatConfig,
}

/// Durable progress log: every entry is appended and periodically flushed.
struct ProgressLog {
    store: TreeRunStore,
    run_id: String,
    entries: Mutex<Vec<serde_json::Value>>,
}

impl ProgressLog {
    fn new(store: TreeRunStore, run_id: &str) -> Self {
        Self { store, run_id: run_id.to_string(), entries: Mutex::new(Vec::new()) }
    }

    async fn push(&self, phase: &str, detail: &str, status: &str) {
        let mut entries = self.entries.lock().await;
        entries.push(json!({"phase": phase, "detail": detail, "status": status}));
        let snapshot = serde_json::to_string(&*entries).unwrap_or_default();
        drop(entries);
        if let Err(e) = self.store.save_progress(&self.run_id, &snapshot).await {
            tracing::warn!("Failed to persist progress for {}: {}", self.run_id, e);
        }
    }

    async fn snapshot(&self) -> String {
        serde_json::to_string(&*self.entries.lock().await).unwrap_or_default()
    }
}

impl ContextEngineService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: TreeRunStore,
        doc_store: ContextDocStore,
        gateway: LlmGateway,
        hub: Arc<ProgressHub>,
        registry: Arc<TaskRegistry>,
        budgets: BudgetConfig,
        chat: ChatConfig,
    ) -> Self {
        Self { store, doc_store, gateway, hub, registry, budgets, chat }
    }

    pub fn store(&self) -> &TreeRunStore {
        &self.store
    }

    pub async fn start_tree_generation(
        self: &Arc<Self>,
        user_id: i64,
        request: SubmitTreeRequest,
    ) -> ApiResult<String> {
        let run_id = self.store.create_run(user_id, &request.org_id).await?;

        let service = Arc::clone(self);
        let task_run_id = run_id.clone();
        self.registry.submit(
            &format!("context-tree-{}", run_id),
            user_id,
            move |cancel| async move {
                service.run_tree_generation(task_run_id, user_id, request, cancel).await
            },
        )?;
        Ok(run_id)
    }

    async fn run_tree_generation(
        &self,
        run_id: String,
        user_id: i64,
        request: SubmitTreeRequest,
        cancel: Arc<CancelToken>,
    ) -> anyhow::Result<()> {
        let log = ProgressLog::new(self.store.clone(), &run_id);
        let result = self
            .tree_generation_inner(&run_id, user_id, &request, &cancel, &log)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is::<Cancelled>() => {
                log.push("cancelled", "Tree generation was cancelled", "failed").await;
                self.store
                    .mark_terminal(&run_id, "cancelled", Some("Cancelled by user"), &log.snapshot().await)
                    .await?;
                self.hub
                    .emit_terminal(user_id, "context_engine", &run_id, "cancelled", json!({}));
                Ok(())
            }
            Err(e) => {
                log.push("error", &format!("Failed: {}", e), "failed").await;
                self.store
                    .mark_terminal(&run_id, "failed", Some(&e.to_string()), &log.snapshot().await)
                    .await?;
                self.hub.emit_terminal(
                    user_id,
                    "context_engine",
                    &run_id,
                    "failed",
                    json!({"error": e.to_string()}),
                );
                Err(e)
            }
        }
    }

    async fn tree_generation_inner(
        &self,
        run_id: &str,
        user_id: i64,
        request: &SubmitTreeRequest,
        cancel: &Arc<CancelToken>,
        log: &ProgressLog,
    ) -> anyhow::Result<()> {
        let hub = Arc::clone(&self.hub);
        let run = run_id.to_string();
        let emit = |phase: &str, detail: &str, status: &str| {
            hub.send_to_user(
                user_id,
                &json!({
                    "type": "context_engine_progress",
                    "run_id": run,
                    "phase": phase,
                    "detail": detail,
                    "status": status,
                }),
            );
        };
        macro_rules! track {
            ($phase:expr, $detail:expr, $status:expr) => {{
                emit($phase, $detail, $status);
                log.push($phase, $detail, $status).await;
            }};
        }

        let provider = self.gateway.default_provider().to_string();
        let model = self.gateway.default_model().to_string();

        // Phase 1: collect.
        track!("collecting", "Fetching contexts from all sources...", "running");
        cancel.check()?;
        let collected = collect_all_contexts(
            &self.doc_store,
            &request.org_id,
            request.base_url.as_deref(),
            request.token.as_deref(),
        )
        .await?;
        track!(
            "collecting",
            &format!("Collected {} contexts: {}", collected.sources.len(), collected.summary),
            "done"
        );
        if collected.sources.is_empty() {
            anyhow::bail!("No contexts found for this organization");
        }

        // Phase 2: LLM tree building. Progress flows through the sync
        // callback; the durable log records phase boundaries.
        track!("analyzing", &format!("Sending {} contexts to LLM...", collected.sources.len()), "running");
        cancel.check()?;
        let hub_cb = Arc::clone(&self.hub);
        let run_cb = run_id.to_string();
        let builder_progress = move |phase: &str, _c: usize, _t: usize, detail: &str| {
            hub_cb.send_to_user(
                user_id,
                &json!({
                    "type": "context_engine_progress",
                    "run_id": run_cb,
                    "phase": phase,
                    "detail": detail,
                    "status": "running",
                }),
            );
        };
        let mut result = build_tree(
            &self.gateway,
            &collected.sources,
            &request.org_id,
            &provider,
            &model,
            Some(Arc::clone(cancel)),
            request.sanitize,
            Some(&builder_progress),
        )
        .await?;
        track!("analyzing", "Tree structure generated successfully", "done");

        // Phase 2b: optional sanitization replaces the raw content attach.
        let mut token_usage = result.token_usage;
        if request.sanitize {
            track!("sanitizing", "Running blueprint sanitization...", "running");
            cancel.check()?;
            match sanitize_tree_content(
                &self.gateway,
                &mut result.tree,
                &collected.sources,
                request.blueprint.as_deref(),
                &provider,
                &model,
                self.chat.sanitize_max_output_tokens,
                self.budgets.max_payload_chars,
                Some(Arc::clone(cancel)),
                Some(&builder_progress),
            )
            .await
            {
                Ok(outcome) => {
                    token_usage.add(outcome.token_usage);
                    track!(
                        "sanitizing",
                        &format!(
                            "{} sanitized, {} fallback of {} leaves",
                            outcome.sanitized_count, outcome.fallback_count, outcome.total_leaves
                        ),
                        "done"
                    );
                }
                Err(e) if e.is::<Cancelled>() => return Err(e),
                Err(e) => {
                    // Fall back to the raw attach so the tree still carries
                    // full content.
                    tracing::warn!("Sanitization failed (non-fatal): {}", e);
                    super::tree_builder::attach_full_content(&mut result.tree, &collected.sources);
                    track!("sanitizing", &format!("Sanitization skipped: {}", e), "done");
                }
            }
        }

        // Phase 3a: secret scanning.
        track!("enriching", "Scanning for secrets...", "running");
        cancel.check()?;
        let secret_count = scan_tree_secrets(&mut result.tree);
        if secret_count > 0 {
            track!(
                "enriching",
                &format!("Detected {} secret(s) — masked and extracted", secret_count),
                "done"
            );
        } else {
            track!("enriching", "No secrets detected", "done");
        }

        // Phase 3b: conflict detection.
        cancel.check()?;
        track!("enriching", "Detecting conflicts between contexts...", "running");
        let conflict_count = super::conflicts::detect_conflicts(
            &self.gateway,
            &mut result.tree,
            &provider,
            self.gateway.fast_model(),
        )
        .await;
        track!(
            "enriching",
            &format!("Found {} conflict(s)", conflict_count),
            "done"
        );

        // Phase 3c: redundancy detection.
        cancel.check()?;
        track!("enriching", "Detecting redundancy between contexts...", "running");
        let redundancy_count = detect_redundancy(
            &self.gateway,
            &mut result.tree,
            &provider,
            self.gateway.fast_model(),
            DEFAULT_THRESHOLD,
        )
        .await;
        track!(
            "enriching",
            &format!("Found {} redundant overlap(s)", redundancy_count),
            "done"
        );

        // Phase 3d: health scoring runs last, over the enriched analyses.
        track!("enriching", "Computing health scores...", "running");
        score_tree_health(&mut result.tree);
        track!("enriching", "Health scores computed", "done");

        // Phase 4: persist.
        track!("saving", "Persisting tree to database...", "running");
        self.store
            .save_completion(
                run_id,
                &serde_json::to_string(&result.tree)?,
                &collected.input_sources.to_string(),
                collected.sources.len() as i64,
                &result.model_used,
                &result.provider_used,
                &serde_json::to_string(&token_usage)?,
                &result.system_prompt_used,
                &log.snapshot().await,
            )
            .await?;
        track!("saving", "Tree saved to database", "done");
        track!(
            "complete",
            &format!("Tree generated with {} contexts", collected.sources.len()),
            "done"
        );

        self.hub.emit_terminal(
            user_id,
            "context_engine",
            run_id,
            "complete",
            json!({
                "input_context_count": collected.sources.len(),
                "node_count": result.tree.node_count(),
                "secrets": secret_count,
                "conflicts": conflict_count,
                "redundancies": redundancy_count,
            }),
        );
        Ok(())
    }

    // -- restructure --

    pub async fn propose(
        &self,
        run_id: &str,
        node_ids: &[String],
        instruction: &str,
    ) -> ApiResult<RestructureProposal> {
        let run = self.store.get_run(run_id).await?;
        let tree: TreeNode = serde_json::from_str(
            run.tree_data_json
                .as_deref()
                .ok_or_else(|| crate::utils::ApiError::validation_error("Run has no tree yet"))?,
        )?;

        propose_restructure(
            &self.gateway,
            &tree,
            node_ids,
            instruction,
            self.gateway.default_provider(),
            self.gateway.default_model(),
        )
        .await
        .map_err(|e| crate::utils::ApiError::internal_error(e.to_string()))
    }

    /// Explicit apply: persist a proposed tree over the run's current tree.
    pub async fn apply_restructure(&self, run_id: &str, new_tree: &TreeNode) -> ApiResult<()> {
        self.store.get_run(run_id).await?;
        self.store
            .update_tree(run_id, &serde_json::to_string(new_tree)?)
            .await
    }
}
