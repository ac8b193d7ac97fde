//! Focus-doc assessment and authoring.
//!
//! The assessor reviews the five core docs plus data highlights and
//! proposes up to `max_focus_docs` standalone topics; each topic gets a
//! focused payload restricted to its tables (expanded via cluster
//! intersection) and its own authoring pass.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::config::BudgetConfig;
use crate::services::llm::{ChatMessage, LlmGateway, LlmRequest};
use crate::utils::truncate_chars;

use super::author::AuthoredDoc;
use super::clusters::{ClassifiedFilter, QueryCluster};
use super::counters::CounterBundle;
use super::payload::cap_payload;
use super::qfp::QueryFingerprint;
use super::ProgressFn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusTopic {
    pub title: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub key_concepts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FocusAssessment {
    #[serde(default)]
    focus_docs: Vec<FocusTopic>,
}

fn assessment_prompt(max_focus_docs: usize) -> String {
    format!(
        r#"You have just reviewed 5 context documents created from a SQL query corpus.
Your job is to decide if any ADDITIONAL standalone documents are needed.

The 5 core docs already cover: SQL rules, table schemas, business mappings, default filters,
and query patterns. Most topics belong in one of these.

A focus doc is ONLY needed when a topic is:
- Too complex to fit in a section
- Cross-cutting in a way the 5 docs can't capture
- Structurally unique (e.g., a scoring/simulation system, a state machine)

A focus doc is NOT needed for:
- A domain that just has many tables — the core docs handle that
- Simple deep-dives that are just "more detail on X"
- Topics already well-covered across the 5 docs

Review the core docs below and the data summary. Respond with ONLY valid JSON:

If NO focus docs needed:
{{"focus_docs": []}}

If focus docs ARE needed (max {}):
{{"focus_docs": [
  {{"title": "Short descriptive title",
    "reason": "One sentence on why this can't fit in the 5 core docs",
    "tables": ["table1", "table2"],
    "key_concepts": ["concept1", "concept2"]}}
]}}

Respond ONLY with JSON, no other text."#,
        max_focus_docs
    )
}

fn focus_doc_prompt(title: &str, reason: &str, budget: u32) -> String {
    format!(
        r#"Write a standalone context document about: "{title}"

This document exists because this topic is too complex or cross-cutting to be
adequately covered within the 5 core context documents.

Reason this doc was created: {reason}

MANDATORY OPENING: The document MUST begin with a 2-4 sentence description in the
first 100-200 characters. This description must explain:
(a) What this document contains
(b) When the AI should load/refer to this document
(c) What types of user questions this document helps answer
This description acts as a retrieval hint — it helps the system decide when to load
this context. It must be the VERY FIRST content in the document, before any sections.

NEVER mention query counts, percentages, or how often something is used.
Write as an authoritative, self-contained guide.

Focus specifically on:
- How this system/process/concept WORKS end-to-end
- The tables involved and how they connect for THIS specific purpose
- The business logic, state transitions, or workflows specific to this topic
- Complete SQL templates for key scenarios within this topic
- Filters and conditions specific to this context
- Edge cases and gotchas an AI would need to know

SECTIONS:
1. Overview — What this is and why it needs dedicated documentation
2. How It Works — End-to-end explanation
3. Data Model — Tables, columns, and joins specific to this topic
4. Business Logic — Codes, statuses, CASE WHEN, state transitions
5. Query Templates — Complete runnable SQL for key scenarios
6. Cross-References — How this connects to concepts in the core docs

Budget: {budget} tokens."#
    )
}

/// Compact summary of core docs + data highlights fed to the assessor.
pub fn build_assessment_input(
    docs: &BTreeMap<String, AuthoredDoc>,
    bundle: &CounterBundle,
    clusters: &[QueryCluster],
    max_enum_distinct: usize,
) -> String {
    let doc_summary: String = docs
        .values()
        .map(|d| format!("--- {} ---\n{}...", d.doc_key, truncate_chars(&d.content, 500)))
        .collect::<Vec<_>>()
        .join("\n\n");

    let top_tables: Vec<String> = bundle
        .counters
        .table
        .most_common(30)
        .into_iter()
        .map(|(t, _)| t)
        .collect();

    let complex_patterns: Vec<Value> = clusters
        .iter()
        .filter(|cl| cl.n_unique >= 5 && cl.sig.split('|').count() >= 3)
        .take(10)
        .map(|cl| json!({"tables": cl.sig, "query_count": cl.count}))
        .collect();

    let enum_cols: Vec<&String> = bundle
        .literal_vals
        .iter()
        .filter(|(_, vals)| (5..=max_enum_distinct).contains(&vals.len()))
        .map(|(col, _)| col)
        .take(20)
        .collect();

    let mut structural = Map::new();
    for (flag, n) in bundle.counters.structural.most_common(16) {
        structural.insert(flag.as_str().to_string(), json!(n));
    }

    let highlights = json!({
        "all_tables": top_tables,
        "complex_multi_table_patterns": complex_patterns,
        "enum_columns": enum_cols,
        "structural_features": structural,
    });

    format!(
        "CORE DOCS (summaries):\n{}\n\nDATA HIGHLIGHTS:\n{}",
        doc_summary,
        serde_json::to_string_pretty(&highlights).unwrap_or_default()
    )
}

/// Focused payload for one topic: the topic's tables expanded through
/// cluster intersection, with schema, joins, patterns, filters, and enums
/// restricted to that table set.
pub fn build_focus_payload(
    topic: &FocusTopic,
    bundle: &CounterBundle,
    clusters: &[QueryCluster],
    filters: &[ClassifiedFilter],
    fps: &[QueryFingerprint],
    max_enum_distinct: usize,
) -> Value {
    let mut tables: Vec<String> = topic.tables.clone();
    for cluster in clusters {
        let cluster_tables: Vec<&str> = cluster.sig.split('|').collect();
        if cluster_tables.len() <= 6
            && cluster_tables.iter().any(|t| tables.iter().any(|x| x == t))
        {
            for t in cluster_tables {
                if !tables.iter().any(|x| x == t) {
                    tables.push(t.to_string());
                }
            }
        }
    }
    tables.sort();

    let column_items = bundle.counters.column.most_common(usize::MAX);
    let mut schema = Vec::new();
    for table in &tables {
        if bundle.counters.table.get(table) == 0 {
            continue;
        }
        let columns: Vec<Value> = column_items
            .iter()
            .filter(|((t, _), _)| t == table)
            .take(25)
            .map(|((_, col), n)| json!({"col": col, "n": n}))
            .collect();
        let aliases: Vec<String> = bundle
            .alias_conv
            .get(table)
            .map(|freq| freq.most_common(3).into_iter().map(|(a, _)| a).collect())
            .unwrap_or_default();
        schema.push(json!({"table": table, "columns": columns, "aliases": aliases}));
    }

    let join_conds = bundle.counters.join_cond.most_common(usize::MAX);
    let mut joins = Vec::new();
    for (pair, _) in bundle.counters.join_pair.most_common(usize::MAX) {
        if pair.len() < 2 || joins.len() >= 15 {
            continue;
        }
        if tables.contains(&pair[0]) || tables.contains(&pair[1]) {
            let conds: Vec<Value> = join_conds
                .iter()
                .filter(|((a, b, _), _)| (*a == pair[0] && *b == pair[1]) || (*a == pair[1] && *b == pair[0]))
                .take(3)
                .map(|((_, _, on), n)| json!({"on": on, "n": n}))
                .collect();
            joins.push(json!({"a": pair[0], "b": pair[1], "on": conds}));
        }
    }

    let patterns: Vec<Value> = clusters
        .iter()
        .filter(|cl| cl.sig.split('|').any(|t| tables.iter().any(|x| x == t)))
        .take(20)
        .map(|cl| {
            json!({
                "sig": cl.sig,
                "count": cl.count,
                "functions": cl.functions,
                "group_by": cl.group_by,
                "rep_sql": truncate_chars(&cl.rep_sql, 800),
                "cpx_sql": truncate_chars(&cl.cpx_sql, 1200),
            })
        })
        .collect();

    let topic_filters: Vec<Value> = filters
        .iter()
        .filter(|f| f.table_pcts.keys().any(|t| tables.contains(t)))
        .take(25)
        .map(|f| json!({"cond": f.condition, "tier": f.tier}))
        .collect();

    let mut enums = Map::new();
    for (col, vals) in &bundle.literal_vals {
        if vals.len() <= max_enum_distinct {
            let entries: Vec<Value> = vals
                .most_common(20)
                .into_iter()
                .map(|(v, n)| json!({"v": v, "n": n}))
                .collect();
            enums.insert(col.clone(), json!(entries));
        }
    }

    let mut case_whens = Vec::new();
    'outer: for fp in fps {
        if !fp.tables.iter().any(|t| tables.contains(t)) {
            continue;
        }
        for block in &fp.case_when_blocks {
            let normalized = truncate_chars(&block.trim().to_uppercase(), 200).to_string();
            if !case_whens.contains(&normalized) {
                case_whens.push(normalized);
            }
            if case_whens.len() >= 10 {
                break 'outer;
            }
        }
    }

    json!({
        "title": topic.title,
        "reason": topic.reason,
        "key_concepts": topic.key_concepts,
        "tables": tables,
        "schema": schema,
        "joins": joins,
        "patterns": patterns,
        "filters": topic_filters,
        "enums": enums,
        "case_whens": case_whens,
    })
}

fn parse_assessment(text: &str) -> Option<Vec<FocusTopic>> {
    let cleaned = text
        .trim()
        .trim_matches('`')
        .trim_start_matches("json")
        .trim();
    serde_json::from_str::<FocusAssessment>(cleaned)
        .ok()
        .map(|a| a.focus_docs)
}

fn focus_doc_key(index: usize, title: &str) -> String {
    let slug: String = title
        .to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{:02}_FOCUS_{}", 6 + index, truncate_chars(&slug, 30))
}

/// Assess whether focus docs are needed and author them.
#[allow(clippy::too_many_arguments)]
pub async fn assess_and_author_focus_docs(
    gateway: &LlmGateway,
    docs: &BTreeMap<String, AuthoredDoc>,
    bundle: &CounterBundle,
    clusters: &[QueryCluster],
    filters: &[ClassifiedFilter],
    fps: &[QueryFingerprint],
    preamble: &str,
    provider: &str,
    model: &str,
    budgets: &BudgetConfig,
    max_enum_distinct: usize,
    max_payload_chars: usize,
    focus_domains: Option<&[String]>,
    on_progress: Option<ProgressFn<'_>>,
) -> BTreeMap<String, AuthoredDoc> {
    let mut focus_docs = BTreeMap::new();
    if docs.is_empty() {
        return focus_docs;
    }

    if let Some(progress) = on_progress {
        progress("focus_assessment", 0, 0, "Assessing focus-doc topics");
    }

    let input = build_assessment_input(docs, bundle, clusters, max_enum_distinct);
    let request = LlmRequest::new(
        provider,
        model,
        assessment_prompt(budgets.max_focus_docs),
        vec![ChatMessage::user(input)],
        1500,
    );
    let topics = match gateway.call(&request).await {
        Ok(response) => parse_assessment(&response.text()).unwrap_or_default(),
        Err(e) => {
            tracing::warn!("Focus assessment failed (non-fatal): {}", e);
            return focus_docs;
        }
    };

    let mut topics: Vec<FocusTopic> = match focus_domains {
        Some(domains) if !domains.is_empty() => topics
            .into_iter()
            .filter(|topic| {
                domains.iter().any(|d| {
                    let d = d.to_lowercase();
                    topic.title.to_lowercase().contains(&d)
                        || topic.key_concepts.join(" ").to_lowercase().contains(&d)
                })
            })
            .collect(),
        _ => topics,
    };
    topics.truncate(budgets.max_focus_docs);

    if let Some(progress) = on_progress {
        progress("focus_assessment", 0, 0, &format!("{} focus topic(s) selected", topics.len()));
    }

    for (index, topic) in topics.iter().enumerate() {
        let doc_key = focus_doc_key(index, &topic.title);
        let payload =
            build_focus_payload(topic, bundle, clusters, filters, fps, max_enum_distinct);
        let reason = if topic.reason.is_empty() {
            "Complex topic requiring dedicated documentation"
        } else {
            &topic.reason
        };
        let system_prompt = format!(
            "{}\nYOUR DOC: {}\n\n{}",
            preamble,
            doc_key,
            focus_doc_prompt(&topic.title, reason, budgets.focus_doc)
        );
        let payload_text = cap_payload(&payload, max_payload_chars);
        let user_msg = format!(
            "Data for focus doc: {}. Numbers are for reference only — do NOT include counts \
             or percentages.\n\nDATA:\n{}",
            topic.title, payload_text
        );

        if let Some(progress) = on_progress {
            progress("focus_authoring", 0, 0, &format!("{} started", doc_key));
        }

        let request = LlmRequest::new(
            provider,
            model,
            system_prompt.clone(),
            vec![ChatMessage::user(user_msg)],
            budgets.focus_doc * 2,
        );
        match gateway.call(&request).await {
            Ok(response) => {
                focus_docs.insert(
                    doc_key.clone(),
                    AuthoredDoc {
                        doc_key: doc_key.clone(),
                        doc_name: doc_key.clone(),
                        content: response.text(),
                        system_prompt,
                        payload_sent: payload_text,
                    },
                );
                if let Some(progress) = on_progress {
                    progress("focus_authoring", 0, 0, &format!("{} done", doc_key));
                }
            }
            Err(e) => {
                tracing::error!("Focus doc {} failed: {}", doc_key, e);
                if let Some(progress) = on_progress {
                    progress("focus_authoring", 0, 0, &format!("{} failed: {}", doc_key, e));
                }
            }
        }
    }

    focus_docs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assessment_parse_handles_fences_and_empty() {
        let topics = parse_assessment("```json\n{\"focus_docs\": []}\n```").unwrap();
        assert!(topics.is_empty());

        let topics = parse_assessment(
            r#"{"focus_docs": [{"title": "Points Expiry Engine", "reason": "state machine",
                "tables": ["points_ledger"], "key_concepts": ["expiry"]}]}"#,
        )
        .unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].title, "Points Expiry Engine");
    }

    #[test]
    fn focus_doc_keys_number_from_06() {
        assert!(focus_doc_key(0, "Points Expiry").starts_with("06_FOCUS_POINTS_EXPIRY"));
        assert!(focus_doc_key(2, "x").starts_with("08_FOCUS_"));
    }

    #[test]
    fn focus_payload_expands_tables_via_clusters() {
        use crate::services::databricks::counters::build_counters;
        use crate::services::databricks::fingerprint::{extract_fingerprint, normalize_params, CorpusEntry};

        let sql = "SELECT a FROM points_ledger pl JOIN customers c ON pl.customer_id = c.id";
        let entry = CorpusEntry {
            sql: normalize_params(sql),
            original_sql: sql.to_string(),
            nl_question: None,
            frequency: 1,
        };
        let fp = extract_fingerprint("q1", &entry, "hive").unwrap();
        let fps = vec![fp];
        let bundle = build_counters(&fps);
        let clusters = crate::services::databricks::clusters::build_clusters(&fps);

        let topic = FocusTopic {
            title: "Expiry".into(),
            reason: String::new(),
            tables: vec!["points_ledger".into()],
            key_concepts: vec![],
        };
        let payload = build_focus_payload(&topic, &bundle, &clusters, &[], &fps, 30);
        let tables: Vec<&str> = payload["tables"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t.as_str().unwrap())
            .collect();
        assert!(tables.contains(&"customers"), "cluster intersection should pull in customers");
    }
}
