//! Cross-document validation: one LLM review over the concatenated docs,
//! targeted re-authoring for flagged slots, and a non-gating table
//! spot-check.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::BudgetConfig;
use crate::services::llm::{ChatMessage, LlmGateway, LlmRequest};

use super::author::{budget_for, doc_name, system_prompt_for, AuthoredDoc};
use super::payload::{cap_payload, strip_stats};
use super::qfp::QueryFingerprint;
use super::ProgressFn;

const VALIDATION_PROMPT: &str = r#"Review 5 context documents for an AI that generates SQL from natural language.
These docs are loaded together into the AI's system prompt. Find CROSS-DOCUMENT problems only:

1. TERMINOLOGY CONFLICTS — Same concept named differently across docs
2. CONTRADICTIONS — Conflicting rules or definitions
3. COVERAGE GAPS — Business domains, tables, or patterns present in one doc but missing
   from docs that should also cover them
4. REDUNDANCY — Same content fully duplicated instead of cross-referenced
5. SYNTAX INCONSISTENCY — Same SQL pattern written differently
6. STATISTICS LEAKAGE — Any mention of query counts, usage percentages, or frequency stats

For each issue: type, docs involved, exact text, suggested fix.
If none: "PASS — all 5 docs are consistent." "#;

/// Doc keys mentioned in a validator report.
pub fn docs_mentioned_in_report(report: &str) -> Vec<&'static str> {
    let lower = report.to_lowercase();
    let keywords: [(&str, [&str; 3]); 5] = [
        ("01_MASTER", ["01_master", "master_rules", "doc 1"]),
        ("02_SCHEMA", ["02_schema", "schema_reference", "doc 2"]),
        ("03_BUSINESS", ["03_business", "business_mappings", "doc 3"]),
        ("04_FILTERS", ["04_filters", "default_filters", "doc 4"]),
        ("05_PATTERNS", ["05_patterns", "query_patterns", "doc 5"]),
    ];
    keywords
        .into_iter()
        .filter(|(_, kws)| kws.iter().any(|kw| lower.contains(kw)))
        .map(|(key, _)| key)
        .collect()
}

pub fn report_is_pass(report: &str) -> bool {
    report.to_uppercase().contains("PASS") && report.to_lowercase().contains("consistent")
}

/// Validate cross-doc consistency; re-author flagged docs with a corrective
/// appendix carrying the validator report. Returns the possibly-patched doc
/// set plus the report (None when validation itself failed).
#[allow(clippy::too_many_arguments)]
pub async fn validate_and_patch(
    gateway: &LlmGateway,
    mut docs: BTreeMap<String, AuthoredDoc>,
    payloads: &BTreeMap<String, Value>,
    preamble: &str,
    provider: &str,
    model: &str,
    budgets: &BudgetConfig,
    max_payload_chars: usize,
    on_progress: Option<ProgressFn<'_>>,
) -> (BTreeMap<String, AuthoredDoc>, Option<String>) {
    let combined: String = docs
        .values()
        .map(|d| {
            format!(
                "{}\n{}\n{}\n\n{}",
                "=".repeat(50),
                d.doc_name,
                "=".repeat(50),
                d.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    if combined.trim().is_empty() {
        return (docs, None);
    }

    if let Some(progress) = on_progress {
        progress("validation", 0, 0, "Cross-doc validation started");
    }

    let request = LlmRequest::new(
        provider,
        model,
        VALIDATION_PROMPT,
        vec![ChatMessage::user(combined)],
        2000,
    );
    let report = match gateway.call(&request).await {
        Ok(response) => response.text(),
        Err(e) => {
            tracing::warn!("Cross-doc validation failed (non-fatal): {}", e);
            if let Some(progress) = on_progress {
                progress("validation", 0, 0, &format!("Validation failed: {}", e));
            }
            return (docs, None);
        }
    };

    if report_is_pass(&report) {
        if let Some(progress) = on_progress {
            progress("validation", 0, 0, "PASS — docs are consistent");
        }
        return (docs, Some(report));
    }

    let to_patch = docs_mentioned_in_report(&report);
    if to_patch.is_empty() {
        return (docs, Some(report));
    }

    for key in to_patch {
        if !docs.contains_key(key) {
            continue;
        }
        let Some(payload) = payloads.get(key) else { continue };
        let name = doc_name(key);
        let budget = budget_for(key, budgets);
        let system_prompt =
            format!("{}\nYOUR DOC: {} — {}\n\n{}", preamble, key, name, system_prompt_for(key, budget));
        let payload_text = cap_payload(&strip_stats(payload), max_payload_chars);
        let user_msg = format!(
            "CORRECTION: previous version had cross-doc issues:\n{}\n\n\
             Fix these issues. Do NOT include any counts, percentages, or frequency stats.\n\
             DATA:\n{}",
            report, payload_text
        );

        if let Some(progress) = on_progress {
            progress("patching", 0, 0, &format!("{} re-authoring", name));
        }

        let request = LlmRequest::new(
            provider,
            model,
            system_prompt.clone(),
            vec![ChatMessage::user(user_msg.clone())],
            budget * 2,
        );
        match gateway.call(&request).await {
            Ok(response) => {
                let doc = docs.get_mut(key).expect("checked above");
                doc.content = response.text();
                doc.system_prompt = system_prompt;
                doc.payload_sent = payload_text;
                if let Some(progress) = on_progress {
                    progress("patching", 0, 0, &format!("{} patched", name));
                }
            }
            Err(e) => {
                tracing::warn!("Patch of {} failed (doc kept as-is): {}", key, e);
            }
        }
    }

    (docs, Some(report))
}

/// Spot-check: sample up to `n` fingerprints evenly across the corpus and
/// verify each sample's tables are textually present somewhere in the doc
/// set. Recorded but never gating.
pub fn spot_check(fps: &[QueryFingerprint], docs: &BTreeMap<String, AuthoredDoc>, n: usize) -> f64 {
    if fps.is_empty() {
        return 0.0;
    }
    let all_text: String = docs
        .values()
        .map(|d| d.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let sample_size = n.min(fps.len());
    let step = (fps.len() as f64 / sample_size as f64).max(1.0);
    let mut hits = 0usize;
    for i in 0..sample_size {
        let fp = &fps[((i as f64 * step) as usize).min(fps.len() - 1)];
        if fp.tables.iter().any(|t| all_text.contains(&t.to_lowercase())) {
            hits += 1;
        }
    }
    hits as f64 / sample_size as f64 * 100.0
}

/// Estimate tokens per doc against its budget.
pub fn check_budgets(
    docs: &BTreeMap<String, AuthoredDoc>,
    budgets: &BudgetConfig,
) -> serde_json::Value {
    let mut results = serde_json::Map::new();
    let mut total = 0i64;
    for (key, doc) in docs {
        let estimated = (doc.content.split_whitespace().count() as f64 * 1.3) as i64;
        let budget = budget_for(key, budgets) as i64;
        let status = if estimated > budget + budget / 5 { "OVER" } else { "ok" };
        results.insert(
            key.clone(),
            serde_json::json!({"estimated_tokens": estimated, "budget": budget, "status": status}),
        );
        total += estimated;
    }
    results.insert(
        "_total".to_string(),
        serde_json::json!({
            "estimated_tokens": total,
            "max": 16000,
            "status": if total > 16000 { "OVER" } else { "ok" },
        }),
    );
    serde_json::Value::Object(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(key: &str, content: &str) -> AuthoredDoc {
        AuthoredDoc {
            doc_key: key.to_string(),
            doc_name: doc_name(key).to_string(),
            content: content.to_string(),
            system_prompt: String::new(),
            payload_sent: String::new(),
        }
    }

    #[test]
    fn pass_report_detection() {
        assert!(report_is_pass("PASS — all 5 docs are consistent."));
        assert!(!report_is_pass("Issues found in 02_SCHEMA"));
    }

    #[test]
    fn mentioned_docs_are_parsed_from_report() {
        let report = "CONTRADICTION between 02_SCHEMA and Doc 4: filter syntax differs.";
        let mentioned = docs_mentioned_in_report(report);
        assert_eq!(mentioned, vec!["02_SCHEMA", "04_FILTERS"]);
    }

    #[test]
    fn spot_check_measures_table_coverage() {
        let mut fps = Vec::new();
        for (i, table) in ["orders", "customers", "ghosts"].iter().enumerate() {
            let mut fp = QueryFingerprint::new(&format!("q{}", i), "SELECT 1", None, 1);
            fp.tables = vec![table.to_string()];
            fps.push(fp);
        }
        let docs = BTreeMap::from([
            ("02_SCHEMA".to_string(), doc("02_SCHEMA", "Tables: Orders and CUSTOMERS.")),
        ]);
        let rate = spot_check(&fps, &docs, 20);
        assert!((rate - 66.66).abs() < 1.0);
    }

    #[test]
    fn budget_check_flags_overruns() {
        let budgets = BudgetConfig::default();
        let long_doc = doc("01_MASTER", &"word ".repeat(5000));
        let docs = BTreeMap::from([("01_MASTER".to_string(), long_doc)]);
        let result = check_budgets(&docs, &budgets);
        assert_eq!(result["01_MASTER"]["status"], "OVER");
    }
}
