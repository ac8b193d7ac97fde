//! Configuration-object pipeline orchestration: fan-out extraction across
//! the platform APIs, structural analysis, and reference-doc authoring.
//!
//! Categories run sequentially; within a category, endpoints run
//! sequentially and a single endpoint failure never aborts the category.
//! Every request is individually tracked in the run's call ledger.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::config::BudgetConfig;
use crate::models::{SubmitConfigDocsRequest, SOURCE_TYPE_CONFIG_APIS};
use crate::services::context_docs::{ContextDocStore, NewContextDoc};
use crate::services::llm::LlmGateway;
use crate::services::progress::ProgressHub;
use crate::services::task_registry::TaskRegistry;
use crate::utils::cancel::Cancelled;
use crate::utils::{ApiResult, CancelToken};

use super::author::author_config_docs;
use super::categories::category_by_id;
use super::client::{
    AudienceApi, CampaignApi, CouponApi, ExtendedFieldsApi, LoyaltyApi, OrgSettingsApi,
    PlatformClient, PlatformError, PromotionApi,
};
use super::clusters::{build_clusters, ConfigCluster, MAX_TEMPLATES_PER_TYPE};
use super::counters::{build_counters, counters_to_json};
use super::fingerprint::{extract_all_fingerprints, extract_items, ConfigFingerprint};
use super::payload::build_payloads;
use super::storage::{ConfigExtractionCounters, ConfigStore};

/// Ledger entry for one tracked API request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallResult {
    pub api_name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub item_count: i64,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

struct ServiceClients {
    loyalty: LoyaltyApi,
    campaigns: CampaignApi,
    promotions: PromotionApi,
    coupons: CouponApi,
    audiences: AudienceApi,
    extended: ExtendedFieldsApi,
    org_settings: OrgSettingsApi,
}

impl ServiceClients {
    fn new(client: Arc<PlatformClient>) -> Self {
        Self {
            loyalty: LoyaltyApi::new(Arc::clone(&client)),
            campaigns: CampaignApi::new(Arc::clone(&client)),
            promotions: PromotionApi::new(Arc::clone(&client)),
            coupons: CouponApi::new(Arc::clone(&client)),
            audiences: AudienceApi::new(Arc::clone(&client)),
            extended: ExtendedFieldsApi::new(Arc::clone(&client)),
            org_settings: OrgSettingsApi::new(client),
        }
    }
}

pub struct ConfigApiService {
    store: ConfigStore,
    doc_store: ContextDocStore,
    gateway: LlmGateway,
    hub: Arc<ProgressHub>,
    registry: Arc<TaskRegistry>,
    budgets: BudgetConfig,
}

impl ConfigApiService {
    pub fn new(
        store: ConfigStore,
        doc_store: ContextDocStore,
        gateway: LlmGateway,
        hub: Arc<ProgressHub>,
        registry: Arc<TaskRegistry>,
        budgets: BudgetConfig,
    ) -> Self {
        Self { store, doc_store, gateway, hub, registry, budgets }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    // -- extraction --

    #[allow(clippy::too_many_arguments)]
    pub async fn start_extraction(
        self: &Arc<Self>,
        user_id: i64,
        host: String,
        org_id: String,
        token: String,
        categories: Vec<String>,
        params: Value,
    ) -> ApiResult<String> {
        for category in &categories {
            if category_by_id(category).is_none() {
                return Err(crate::utils::ApiError::invalid_input(format!(
                    "Unknown category: {}",
                    category
                )));
            }
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        self.store
            .create_extraction_run(
                &run_id,
                user_id,
                &host,
                &org_id,
                &serde_json::to_string(&categories)?,
                &params.to_string(),
            )
            .await?;

        let service = Arc::clone(self);
        let task_run_id = run_id.clone();
        self.registry.submit(
            &format!("config-extraction-{}", run_id),
            user_id,
            move |cancel| async move {
                service
                    .run_extraction(task_run_id, user_id, host, org_id, token, categories, params, cancel)
                    .await
            },
        )?;
        Ok(run_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_extraction(
        &self,
        run_id: String,
        user_id: i64,
        host: String,
        org_id: String,
        token: String,
        categories: Vec<String>,
        params: Value,
        cancel: Arc<CancelToken>,
    ) -> anyhow::Result<()> {
        let result = self
            .extraction_inner(&run_id, user_id, &host, &org_id, &token, &categories, &params, &cancel)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is::<Cancelled>() => {
                self.store
                    .mark_extraction_terminal(&run_id, "cancelled", Some("Cancelled by user"))
                    .await?;
                self.hub
                    .emit_terminal(user_id, "config_extraction", &run_id, "cancelled", json!({}));
                Ok(())
            }
            Err(e) => {
                self.store
                    .mark_extraction_terminal(&run_id, "failed", Some(&e.to_string()))
                    .await?;
                self.hub.emit_terminal(
                    user_id,
                    "config_extraction",
                    &run_id,
                    "failed",
                    json!({"error": e.to_string()}),
                );
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn extraction_inner(
        &self,
        run_id: &str,
        user_id: i64,
        host: &str,
        org_id: &str,
        token: &str,
        categories: &[String],
        params: &Value,
        cancel: &CancelToken,
    ) -> anyhow::Result<()> {
        let hub = Arc::clone(&self.hub);
        let run = run_id.to_string();
        let progress = move |phase: &str, completed: usize, total: usize, detail: &str| {
            hub.emit_progress(user_id, "config_extraction", &run, phase, completed, total, detail);
        };

        let client = Arc::new(PlatformClient::new(host, token, org_id)?);
        let clients = ServiceClients::new(client);

        let mut extracted: Map<String, Value> = Map::new();
        let mut ledger: Vec<ApiCallResult> = Vec::new();
        let mut program_id: Option<i64> = params["loyalty"]["program_id"]
            .as_i64()
            .or_else(|| params["program_id"].as_i64());
        let total = categories.len();

        for (idx, category) in categories.iter().enumerate() {
            cancel.check()?;
            progress(category, idx, total, &format!("Extracting {}...", category));

            let descriptor =
                category_by_id(category).expect("categories validated at submission");
            if descriptor.needs_program_id && program_id.is_none() {
                program_id = self.resolve_program_id(&clients, &mut ledger, &progress).await;
            }

            let data = self
                .extract_category(&clients, category, params, program_id, &mut ledger, &progress)
                .await?;
            extracted.insert(category.clone(), Value::Object(data));
            progress(category, idx + 1, total, &format!("{} complete", category));
        }

        let counters = ConfigExtractionCounters {
            categories_requested: categories.len() as i64,
            categories_completed: extracted.len() as i64,
            api_calls: ledger.len() as i64,
            api_failures: ledger.iter().filter(|r| r.status == "error").count() as i64,
            items_extracted: ledger.iter().map(|r| r.item_count).sum(),
        };

        self.store
            .complete_extraction_run(
                run_id,
                &Value::Object(extracted).to_string(),
                &serde_json::to_string(&ledger)?,
                &counters,
            )
            .await?;

        self.hub.emit_terminal(
            user_id,
            "config_extraction",
            run_id,
            "complete",
            json!({
                "categories_completed": counters.categories_completed,
                "api_calls": counters.api_calls,
                "api_failures": counters.api_failures,
                "items_extracted": counters.items_extracted,
            }),
        );
        Ok(())
    }

    /// Fetch programs and take the first record's id.
    async fn resolve_program_id(
        &self,
        clients: &ServiceClients,
        ledger: &mut Vec<ApiCallResult>,
        progress: &(dyn Fn(&str, usize, usize, &str) + Send + Sync),
    ) -> Option<i64> {
        let (data, result) = tracked("programs_for_resolution", clients.loyalty.list_programs()).await;
        ledger.push(result);
        let data = data?;
        let programs = extract_items(&data);
        let pid = programs.first().and_then(|p| {
            p["programId"]
                .as_i64()
                .or_else(|| p["id"].as_i64())
                .or_else(|| p["program_id"].as_i64())
        });
        if let Some(pid) = pid {
            progress("resolve", 1, 1, &format!("Auto-resolved program_id={}", pid));
        } else {
            progress("resolve", 0, 1, "No programs found — cannot resolve program_id");
        }
        pid
    }

    /// Run one category's endpoints sequentially. A single endpoint failure
    /// is recorded and skipped; an auth failure on a bearer path aborts the
    /// run.
    async fn extract_category(
        &self,
        clients: &ServiceClients,
        category: &str,
        params: &Value,
        program_id: Option<i64>,
        ledger: &mut Vec<ApiCallResult>,
        progress: &(dyn Fn(&str, usize, usize, &str) + Send + Sync),
    ) -> anyhow::Result<Map<String, Value>> {
        let mut out: Map<String, Value> = Map::new();

        macro_rules! call {
            ($key:expr, $fut:expr, $cookie:expr) => {{
                let (data, result) = tracked($key, $fut).await;
                let failed_auth = result.status == "error"
                    && matches!(result.http_status, Some(401) | Some(403))
                    && !$cookie;
                let detail = match &result.status[..] {
                    "success" => format!("{}: {} items in {}ms", $key, result.item_count, result.duration_ms),
                    _ => format!(
                        "{} failed: {}",
                        $key,
                        result.error_message.as_deref().unwrap_or("unknown")
                    ),
                };
                progress(category, 0, 0, &detail);
                ledger.push(result);
                if failed_auth {
                    anyhow::bail!("Authentication failed against the config platform");
                }
                if let Some(data) = data {
                    out.insert($key.to_string(), data);
                }
            }};
        }

        match category {
            "loyalty" => {
                call!("programs", clients.loyalty.list_programs(), false);
                if let Some(pid) = program_id {
                    call!("tiers", clients.loyalty.list_tiers(pid), false);
                    call!("earning_strategies", clients.loyalty.list_earning_strategies(pid), false);
                    call!("expiry_strategies", clients.loyalty.list_expiry_strategies(pid), false);
                    call!("partner_programs", clients.loyalty.list_partner_programs(pid), false);
                    call!("custom_fields", clients.loyalty.list_custom_fields(pid), false);
                }
                call!("alternate_currencies", clients.loyalty.list_alternate_currencies(), false);
                call!("event_types", clients.loyalty.list_event_types(), false);
            }
            "campaigns" => {
                call!("campaigns", clients.campaigns.list_campaigns(), false);
                let campaign_ids: Vec<i64> = out
                    .get("campaigns")
                    .map(|data| {
                        extract_items(data)
                            .iter()
                            .filter_map(|c| c["id"].as_i64().or_else(|| c["campaignId"].as_i64()))
                            .collect()
                    })
                    .unwrap_or_default();
                let limit = params["campaigns"]["campaign_limit"].as_u64().unwrap_or(25) as usize;

                let mut details = Vec::new();
                let mut messages = Vec::new();
                for id in campaign_ids.into_iter().take(limit) {
                    let (data, result) =
                        tracked(&format!("campaign_details/{}", id), clients.campaigns.get_campaign_details(id)).await;
                    ledger.push(result);
                    if let Some(data) = data {
                        details.push(data);
                    }
                    let (data, result) =
                        tracked(&format!("campaign_messages/{}", id), clients.campaigns.list_campaign_messages(id)).await;
                    ledger.push(result);
                    if let Some(data) = data {
                        messages.push(data);
                    }
                }
                if !details.is_empty() {
                    out.insert("campaign_details".to_string(), Value::Array(details));
                }
                if !messages.is_empty() {
                    out.insert("campaign_messages".to_string(), Value::Array(messages));
                }
                call!("sms_templates", clients.campaigns.list_sms_templates(), true);
                call!("email_templates", clients.campaigns.list_email_templates(), false);
            }
            "promotions" => {
                if let Some(pid) = program_id {
                    call!("loyalty_promotions", clients.promotions.list_loyalty_promotions(pid), false);
                }
                call!("cart_promotions", clients.promotions.list_cart_promotions(), false);
                call!("custom_fields", clients.promotions.list_custom_fields(), false);
                call!("rewards_groups", clients.promotions.list_rewards_groups(), true);
            }
            "coupons" => {
                call!("coupon_series", clients.coupons.list_coupon_series(program_id), false);
                call!("product_categories", clients.coupons.get_product_categories(), false);
                call!("product_brands", clients.coupons.get_product_brands(), false);
                call!("product_attributes", clients.coupons.get_product_attributes(), false);
            }
            "audiences" => {
                call!("audiences", clients.audiences.list_audiences(), true);
                call!("target_groups", clients.audiences.list_target_groups(), false);
                call!("behavioral_events", clients.audiences.list_behavioral_events(), true);
                call!("dim_attr_availability", clients.audiences.dim_attr_availability(), true);
            }
            "extended_fields" => {
                call!("customer_extended_fields", clients.extended.extended_fields("customer"), false);
                call!("transaction_extended_fields", clients.extended.extended_fields("transaction"), false);
                call!("lineitem_extended_fields", clients.extended.extended_fields("lineitem"), false);
            }
            "org_settings" => {
                call!("behavioral_events", clients.org_settings.behavioral_events(), false);
                call!("customer_labels", clients.org_settings.customer_labels(), false);
                call!("org_hierarchy", clients.org_settings.org_hierarchy(), false);
                call!("target_groups", clients.org_settings.target_groups(), false);
            }
            _ => {}
        }

        Ok(out)
    }

    // -- analysis --

    pub async fn start_analysis(
        self: &Arc<Self>,
        user_id: i64,
        extraction_run_id: &str,
    ) -> ApiResult<String> {
        let extraction = self.store.get_extraction_run(extraction_run_id).await?;
        if extraction.status != "completed" {
            return Err(crate::utils::ApiError::validation_error(
                "Config extraction run is not completed",
            ));
        }
        let run = self
            .store
            .create_analysis_run(extraction_run_id, &extraction.org_id)
            .await?;
        let analysis_id = run.id.clone();

        let service = Arc::clone(self);
        let task_id = analysis_id.clone();
        let extraction_run_id = extraction_run_id.to_string();
        self.registry.submit(
            &format!("config-analysis-{}", analysis_id),
            user_id,
            move |cancel| async move {
                service.run_analysis(task_id, user_id, extraction_run_id, cancel).await
            },
        )?;
        Ok(analysis_id)
    }

    async fn run_analysis(
        &self,
        analysis_id: String,
        user_id: i64,
        extraction_run_id: String,
        cancel: Arc<CancelToken>,
    ) -> anyhow::Result<()> {
        let result = self
            .analysis_inner(&analysis_id, user_id, &extraction_run_id, &cancel)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is::<Cancelled>() => {
                self.store
                    .mark_analysis_terminal(&analysis_id, "cancelled", Some("Cancelled by user"))
                    .await?;
                self.hub
                    .emit_terminal(user_id, "config_analysis", &analysis_id, "cancelled", json!({}));
                Ok(())
            }
            Err(e) => {
                self.store
                    .mark_analysis_terminal(&analysis_id, "failed", Some(&e.to_string()))
                    .await?;
                self.hub.emit_terminal(
                    user_id,
                    "config_analysis",
                    &analysis_id,
                    "failed",
                    json!({"error": e.to_string()}),
                );
                Err(e)
            }
        }
    }

    async fn analysis_inner(
        &self,
        analysis_id: &str,
        user_id: i64,
        extraction_run_id: &str,
        cancel: &CancelToken,
    ) -> anyhow::Result<()> {
        let hub = Arc::clone(&self.hub);
        let run = analysis_id.to_string();
        let progress = move |phase: &str, completed: usize, total: usize, detail: &str| {
            hub.emit_progress(user_id, "config_analysis", &run, phase, completed, total, detail);
        };

        let extraction = self.store.get_extraction_run(extraction_run_id).await?;
        let raw_data: Value =
            serde_json::from_str(extraction.extracted_data_json.as_deref().unwrap_or("{}"))?;

        let (fingerprints, entity_counts) = extract_all_fingerprints(&raw_data);
        if fingerprints.is_empty() {
            anyhow::bail!("No config objects found in the extraction run");
        }
        progress("fingerprint", fingerprints.len(), fingerprints.len(),
            &format!("{} fingerprints across {} entity types", fingerprints.len(), entity_counts.len()));
        cancel.check()?;

        let (counters, total) = build_counters(&fingerprints);
        let clusters = build_clusters(&fingerprints, MAX_TEMPLATES_PER_TYPE);
        progress("aggregate", clusters.len(), clusters.len(),
            &format!("{} clusters from {} objects", clusters.len(), total));

        let inventory = build_inventory(&raw_data);
        let analysis_data = json!({
            "inventory": inventory,
            "entity_counts": entity_counts,
            "counters": counters_to_json(&counters, 200),
            "clusters": clusters,
            "fingerprints": fingerprints,
            "total_objects": total,
        });

        self.store
            .complete_analysis_run(analysis_id, &analysis_data.to_string())
            .await?;

        self.hub.emit_terminal(
            user_id,
            "config_analysis",
            analysis_id,
            "complete",
            json!({"total_objects": total, "clusters": clusters.len()}),
        );
        Ok(())
    }

    // -- doc generation --

    pub async fn start_doc_generation(
        self: &Arc<Self>,
        user_id: i64,
        analysis_id: &str,
        request: SubmitConfigDocsRequest,
    ) -> ApiResult<String> {
        let run = self.store.get_analysis_run(analysis_id).await?;
        if run.status != "completed" {
            return Err(crate::utils::ApiError::validation_error(
                "Config analysis run is not completed",
            ));
        }

        let service = Arc::clone(self);
        let task_id = analysis_id.to_string();
        self.registry.submit(
            &format!("config-docs-{}", analysis_id),
            user_id,
            move |cancel| async move {
                service.run_doc_generation(task_id, user_id, request, cancel).await
            },
        )?;
        Ok(analysis_id.to_string())
    }

    async fn run_doc_generation(
        &self,
        analysis_id: String,
        user_id: i64,
        request: SubmitConfigDocsRequest,
        cancel: Arc<CancelToken>,
    ) -> anyhow::Result<()> {
        let result = self
            .doc_generation_inner(&analysis_id, user_id, &request, &cancel)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is::<Cancelled>() => {
                self.hub
                    .emit_terminal(user_id, "config_docs", &analysis_id, "cancelled", json!({}));
                Ok(())
            }
            Err(e) => {
                self.hub.emit_terminal(
                    user_id,
                    "config_docs",
                    &analysis_id,
                    "failed",
                    json!({"error": e.to_string()}),
                );
                Err(e)
            }
        }
    }

    async fn doc_generation_inner(
        &self,
        analysis_id: &str,
        user_id: i64,
        request: &SubmitConfigDocsRequest,
        cancel: &CancelToken,
    ) -> anyhow::Result<()> {
        let hub = Arc::clone(&self.hub);
        let run = analysis_id.to_string();
        let progress = move |phase: &str, completed: usize, total: usize, detail: &str| {
            hub.emit_progress(user_id, "config_docs", &run, phase, completed, total, detail);
        };

        let analysis = self.store.get_analysis_run(analysis_id).await?;
        let data: Value =
            serde_json::from_str(analysis.analysis_data_json.as_deref().unwrap_or("{}"))?;
        let fingerprints: Vec<ConfigFingerprint> =
            serde_json::from_value(data["fingerprints"].clone())?;
        let clusters: Vec<ConfigCluster> = serde_json::from_value(data["clusters"].clone())?;
        if fingerprints.is_empty() {
            anyhow::bail!("Config analysis has no fingerprints to author from");
        }
        let (counters, _) = build_counters(&fingerprints);

        let provider = request
            .provider
            .clone()
            .unwrap_or_else(|| self.gateway.default_provider().to_string());
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.gateway.default_model().to_string());

        let payloads = build_payloads(
            &fingerprints,
            &counters,
            &clusters,
            &data["inventory"],
            request.inclusions.as_ref(),
        );
        if payloads.is_empty() {
            anyhow::bail!("No document payloads could be built from this analysis");
        }
        cancel.check()?;

        progress("authoring", 0, payloads.len(), "Authoring configuration reference documents");
        let docs = author_config_docs(
            &self.gateway,
            &payloads,
            &provider,
            &model,
            self.budgets.max_payload_chars,
            Some(&progress),
        )
        .await;
        if docs.is_empty() {
            anyhow::bail!("All document authoring calls failed");
        }
        cancel.check()?;

        let mut saved_keys = Vec::new();
        for (doc, warnings) in docs.values() {
            let warnings_json = if warnings.is_empty() {
                None
            } else {
                Some(serde_json::to_string(warnings)?)
            };
            self.doc_store
                .save(&NewContextDoc {
                    source_type: SOURCE_TYPE_CONFIG_APIS.to_string(),
                    source_run_id: analysis_id.to_string(),
                    org_id: analysis.org_id.clone(),
                    doc_key: doc.doc_key.clone(),
                    doc_name: doc.doc_name.clone(),
                    doc_content: doc.content.clone(),
                    provider_used: provider.clone(),
                    model_used: model.clone(),
                    system_prompt_used: doc.system_prompt.clone(),
                    payload_sent: doc.payload_sent.clone(),
                    warnings_json,
                })
                .await?;
            saved_keys.push(doc.doc_key.clone());
        }

        self.hub.emit_terminal(
            user_id,
            "config_docs",
            analysis_id,
            "complete",
            json!({"docs": saved_keys}),
        );
        Ok(())
    }
}

/// Track one endpoint call: outcome, item count, and duration.
async fn tracked(
    name: &str,
    fut: impl std::future::Future<Output = Result<Value, PlatformError>>,
) -> (Option<Value>, ApiCallResult) {
    let start = Instant::now();
    match fut.await {
        Ok(data) => {
            let item_count = {
                let items = extract_items(&data);
                if items.is_empty() && data.is_object() && data.get("_error").is_none() {
                    1
                } else {
                    items.len() as i64
                }
            };
            let result = ApiCallResult {
                api_name: name.to_string(),
                status: "success".to_string(),
                http_status: Some(200),
                item_count,
                duration_ms: start.elapsed().as_millis() as i64,
                error_message: None,
            };
            (Some(data), result)
        }
        Err(e) => {
            let result = ApiCallResult {
                api_name: name.to_string(),
                status: "error".to_string(),
                http_status: e.status_code(),
                item_count: 0,
                duration_ms: start.elapsed().as_millis() as i64,
                error_message: Some(e.to_string()),
            };
            (None, result)
        }
    }
}

/// Inventory summary per category: total objects and per-endpoint counts.
fn build_inventory(raw_data: &Value) -> Value {
    let mut inventory = Map::new();
    for (category, api_data) in raw_data.as_object().into_iter().flatten() {
        let Some(api_map) = api_data.as_object() else { continue };
        let mut apis = Map::new();
        let mut total = 0usize;
        for (api_key, response) in api_map {
            let items = extract_items(response);
            let count = if items.is_empty() && response.is_object() { 1 } else { items.len() };
            total += count;
            apis.insert(api_key.clone(), json!(count));
        }
        inventory.insert(
            category.clone(),
            json!({"total_objects": total, "apis": apis}),
        );
    }
    Value::Object(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracked_call_records_success_and_failure() {
        let (data, result) = tracked("ok", async { Ok(json!({"data": [1, 2, 3]})) }).await;
        assert!(data.is_some());
        assert_eq!(result.status, "success");
        assert_eq!(result.item_count, 3);

        let (data, result) = tracked("bad", async {
            Err(PlatformError::Api { message: "HTTP 500: boom".into(), status_code: Some(500) })
        })
        .await;
        assert!(data.is_none());
        assert_eq!(result.status, "error");
        assert_eq!(result.http_status, Some(500));
        assert!(result.error_message.unwrap().contains("boom"));
    }

    #[test]
    fn inventory_counts_items_per_endpoint() {
        let raw = json!({
            "loyalty": {
                "programs": {"data": [{"id": 1}]},
                "tiers": [{"id": 1}, {"id": 2}],
            },
        });
        let inventory = build_inventory(&raw);
        assert_eq!(inventory["loyalty"]["total_objects"], 3);
        assert_eq!(inventory["loyalty"]["apis"]["tiers"], 2);
    }
}
