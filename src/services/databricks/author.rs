//! Document authoring: per-slot system prompts, the shared preamble, and
//! the sequential authoring loop. Failure of one doc never aborts the run.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::BudgetConfig;
use crate::services::llm::{ChatMessage, LlmGateway, LlmRequest};

use super::counters::CounterBundle;
use super::payload::{cap_payload, DOC_KEYS};
use super::ProgressFn;

pub fn doc_name(key: &str) -> &'static str {
    match key {
        "01_MASTER" => "01_MASTER_RULES",
        "02_SCHEMA" => "02_SCHEMA_REFERENCE",
        "03_BUSINESS" => "03_BUSINESS_MAPPINGS",
        "04_FILTERS" => "04_DEFAULT_FILTERS",
        "05_PATTERNS" => "05_QUERY_PATTERNS",
        _ => "UNKNOWN",
    }
}

pub fn budget_for(key: &str, budgets: &BudgetConfig) -> u32 {
    match key {
        "01_MASTER" => budgets.doc_01_master,
        "02_SCHEMA" => budgets.doc_02_schema,
        "03_BUSINESS" => budgets.doc_03_business,
        "04_FILTERS" => budgets.doc_04_filters,
        "05_PATTERNS" => budgets.doc_05_patterns,
        _ => 1500,
    }
}

pub fn system_prompt_for(key: &str, budget: u32) -> String {
    let body = match key {
        "01_MASTER" => {
            r#"Write the MASTER RULES document — the "constitution" of SQL generation rules.
This is the definitive rulebook the AI follows when writing SQL for this warehouse.

Use numbered rules grouped by category. Every rule must be actionable
("ALWAYS do X", "NEVER do Y", "PREFER X over Y"). Include SQL examples inline.

NEVER mention query counts, percentages, or how often something is used.
Write as authoritative rules, not statistical observations.

SECTIONS:
1. Dialect & Syntax Rules — dialect-specific conventions, date functions, null handling
2. Structural Preferences — When to use CTEs vs subqueries, window functions, CASE WHEN
3. Naming Conventions — Table aliases, column aliases, output labels
4. Core Table Hierarchy — Identify the primary entity tables, lookup/reference tables,
   and how they relate. Group them by the business domains you discover in the data.
5. Output Formatting — SELECT column conventions, ORDER BY, LIMIT defaults
6. Conflict Resolution — What takes priority when rules overlap"#
        }
        "02_SCHEMA" => {
            r#"Write the SCHEMA REFERENCE — the complete data dictionary.
This tells the AI what tables exist, what each column means, and how tables connect.

NEVER mention query counts, percentages, or how often something is used.
Write as a definitive reference guide.

Identify ALL business domains present in the data from table/column names and group
tables accordingly. Do NOT skip any table or domain — be exhaustive. Every table in the
data must appear.

For each table include:
- 1-2 sentence business description (infer from table/column names)
- Key columns with inferred types and business meaning
- Common aliases
- JOIN relationships with exact ON syntax

SECTIONS:
1. Table Registry by Domain (group all tables under discovered domains)
2. Column Reference per Table
3. Join Graph — how tables connect with exact ON conditions
4. Data Type Conventions"#
        }
        "03_BUSINESS" => {
            r#"Write the BUSINESS MAPPINGS — the business knowledge layer.
This maps business terminology to SQL. An AI reading this should understand what every
code, KPI, dimension, and business rule means and how to express it in SQL.

NEVER mention query counts, percentages, or how often something is used.
Write as a business knowledge guide with SQL translations.

Be EXHAUSTIVE across every business domain you find in the data.

SECTIONS:
1. Code Dictionaries — Every status code, type code, category code with its business meaning
2. KPI Definitions — Business metric name, exact SQL expression, typical GROUP BY dimensions
3. Business Dimensions — What analysts segment/group by, with SQL syntax
4. Derived Business Logic — CASE WHEN patterns that classify or transform data
5. Natural Language to SQL — Common business questions and their SQL translations"#
        }
        "04_FILTERS" => {
            r#"Write the DEFAULT FILTERS document.
This defines which WHERE conditions the AI must apply automatically and which are contextual.

NEVER mention query counts, percentages, or how often something is used.
Write as definitive filtering rules.

Every filter must include the EXACT SQL syntax ready to copy-paste.

Categorize filters as:
- MANDATORY: Always apply these (e.g., org/tenant filters, active record flags, soft deletes)
- TABLE-DEFAULT: Apply whenever a specific table is used
- COMMON: Apply when contextually relevant

SECTIONS:
1. Mandatory Filters — Always apply, with exact syntax
2. Table-Specific Defaults — Per-table filters for every relevant table
3. Date Range Patterns — Standard time filtering conventions
4. Parameterized Filters — How to handle dynamic values
5. Filter Interaction Rules — Which filters combine, which are mutually exclusive"#
        }
        _ => {
            r#"Write the QUERY PATTERNS document — a complete cookbook of reusable SQL templates.
An AI should be able to pick the right template for any business question and adapt it.

NEVER mention query counts, percentages, or how often something is used.
Write as a practical cookbook with runnable examples.

Name every pattern by its BUSINESS PURPOSE, not by SQL structure.

Be EXHAUSTIVE. Cover templates for EVERY business domain discovered in the data.

For each pattern include:
- Business-friendly name and when to use it
- Complete, runnable SQL example
- Simple variant and complex variant (with CTEs/windows) where relevant

SECTIONS:
1. Core Patterns — Essential everyday queries, grouped by business domain
2. Advanced Patterns — CTE-based, window function, multi-join templates
3. Cross-Domain Patterns — Queries that join across business domains
4. Few-Shot Examples — Natural language question paired with complete SQL"#
        }
    };
    format!("{}\n\nBudget: {} tokens.", body, budget)
}

/// Shared preamble preceding every slot's system prompt. Lists all five
/// slots, their boundaries, and the most frequent columns as canonical
/// terminology.
pub fn build_preamble(bundle: &CounterBundle, top_glossary_cols: usize) -> String {
    let glossary: Vec<String> = bundle
        .counters
        .column
        .most_common(top_glossary_cols)
        .into_iter()
        .map(|((table, col), _)| {
            format!("      \"{}\" for column `{}` in `{}`", col.replace('_', " "), col, table)
        })
        .collect();
    let gloss_block = if glossary.is_empty() {
        "      (auto-populated)".to_string()
    } else {
        glossary.join("\n")
    };

    format!(
        r#"You are authoring ONE document in a set of 5 context documents for an AI
system that generates SQL queries from natural language.

All 5 docs will be loaded together into the AI's system prompt at query time.
The AI must use these docs to understand the brand's business, database, and
query conventions well enough to write correct SQL from plain English.

THE 5 DOCUMENTS AND THEIR BOUNDARIES:
  01_MASTER_RULES     -> SQL generation rules, conventions, and structural guidance.
  02_SCHEMA_REFERENCE -> Tables, columns, joins, data types — the data dictionary.
  03_BUSINESS_MAPPINGS -> What business concepts mean in SQL — KPIs, codes, enums, logic.
  04_DEFAULT_FILTERS  -> Mandatory and default WHERE clauses with exact syntax.
  05_QUERY_PATTERNS   -> Complete reusable SQL templates for every business scenario.

CRITICAL WRITING RULES:
  - NEVER mention query counts, usage percentages, or frequency stats.
    Do NOT write "used in 90% of queries" or "appears 120 times".
    Write as authoritative documentation, not statistical analysis.
  - Identify ALL business domains present in the data and organize content around them.
    Do NOT skip any domain — every table, pattern, and business concept must be captured.
  - Be EXHAUSTIVE. If the data shows a pattern, document it.
  - Use these canonical terms:
{}
  - Reference other docs instead of redefining their content.
  - Priority: 01_MASTER > 04_FILTERS > 02_SCHEMA > 03_BUSINESS > 05_PATTERNS
"#,
        gloss_block
    )
}

/// One authored document plus the audit trail persisted alongside it.
#[derive(Debug, Clone)]
pub struct AuthoredDoc {
    pub doc_key: String,
    pub doc_name: String,
    pub content: String,
    pub system_prompt: String,
    pub payload_sent: String,
}

/// Author the five core documents sequentially. Returns whatever succeeded;
/// individual failures are logged and skipped.
#[allow(clippy::too_many_arguments)]
pub async fn author_docs(
    gateway: &LlmGateway,
    payloads: &BTreeMap<String, Value>,
    preamble: &str,
    provider: &str,
    model: &str,
    budgets: &BudgetConfig,
    max_payload_chars: usize,
    on_progress: Option<ProgressFn<'_>>,
) -> BTreeMap<String, AuthoredDoc> {
    let mut docs = BTreeMap::new();

    for key in DOC_KEYS {
        let Some(payload) = payloads.get(key) else { continue };
        let name = doc_name(key);
        let budget = budget_for(key, budgets);

        let system_prompt =
            format!("{}\nYOUR DOC: {} — {}\n\n{}", preamble, key, name, system_prompt_for(key, budget));
        let payload_text = cap_payload(&super::payload::strip_stats(payload), max_payload_chars);
        let user_msg = format!(
            "Data payload for {}. The numbers in the data are for your reference to \
             understand relative importance — do NOT include any counts, percentages, or \
             frequency stats in your output. Write as an authoritative business & database guide.\n\nDATA:\n{}",
            name, payload_text
        );

        if let Some(progress) = on_progress {
            progress("authoring", 0, 0, &format!("{} started", name));
        }

        let request = LlmRequest::new(
            provider,
            model,
            system_prompt.clone(),
            vec![ChatMessage::user(user_msg)],
            budget * 2,
        );
        match gateway.call(&request).await {
            Ok(response) => {
                let content = response.text();
                if let Some(progress) = on_progress {
                    progress(
                        "authoring",
                        0,
                        0,
                        &format!("{} done ({} words)", name, content.split_whitespace().count()),
                    );
                }
                docs.insert(
                    key.to_string(),
                    AuthoredDoc {
                        doc_key: key.to_string(),
                        doc_name: name.to_string(),
                        content,
                        system_prompt,
                        payload_sent: payload_text,
                    },
                );
            }
            Err(e) => {
                tracing::error!("Failed to author {}: {}", key, e);
                if let Some(progress) = on_progress {
                    progress("authoring", 0, 0, &format!("{} failed: {}", name, e));
                }
            }
        }
    }

    docs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::databricks::counters::build_counters;
    use crate::services::databricks::fingerprint::{extract_fingerprint, normalize_params, CorpusEntry};

    #[test]
    fn preamble_lists_canonical_columns() {
        let entry = CorpusEntry {
            sql: normalize_params("SELECT o.customer_id FROM orders o"),
            original_sql: "SELECT o.customer_id FROM orders o".to_string(),
            nl_question: None,
            frequency: 4,
        };
        let fp = extract_fingerprint("q", &entry, "hive").unwrap();
        let bundle = build_counters(&[fp]);
        let preamble = build_preamble(&bundle, 20);
        assert!(preamble.contains("customer id"));
        assert!(preamble.contains("`orders`"));
        assert!(preamble.contains("01_MASTER_RULES"));
    }

    #[test]
    fn every_slot_has_a_prompt_with_its_budget() {
        for key in DOC_KEYS {
            let prompt = system_prompt_for(key, 2500);
            assert!(prompt.contains("Budget: 2500 tokens"), "missing budget in {}", key);
            assert!(prompt.contains("NEVER mention query counts"));
        }
    }
}
