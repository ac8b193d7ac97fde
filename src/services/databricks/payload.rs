//! Payload builders for the five context-document slots.
//!
//! Payloads are JSON values assembled from the typed analysis artifacts;
//! callers can toggle individual items per slot through the inclusion
//! overrides before construction. `strip_stats` removes display-only
//! count/percent keys for LLM delivery.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::utils::truncate_chars;

use super::clusters::{ClassifiedFilter, FilterTier, QueryCluster};
use super::counters::CounterBundle;
use super::qfp::QueryFingerprint;

pub const DOC_KEYS: [&str; 5] =
    ["01_MASTER", "02_SCHEMA", "03_BUSINESS", "04_FILTERS", "05_PATTERNS"];

/// Keys that are purely statistical and stripped from LLM payloads.
const STAT_KEYS: [&str; 4] = ["n", "pct", "count", "unique"];

/// Recursively strip count/pct/n fields from payload structures.
pub fn strip_stats(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !STAT_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), strip_stats(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_stats).collect()),
        other => other.clone(),
    }
}

fn pct(n: i64, total: i64) -> f64 {
    ((n as f64 / total.max(1) as f64) * 1000.0).round() / 10.0
}

/// True unless the inclusion overrides explicitly disable this item.
fn included(inclusions: Option<&Value>, section: &str, key: &str) -> bool {
    inclusions
        .and_then(|inc| inc.get(section))
        .and_then(|s| s.get(key))
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

/// Dialect-native functions worth calling out in the master doc.
const DIALECT_FN_REF: [&str; 20] = [
    "DATE_FORMAT", "DATE_SUB", "DATE_ADD", "DATEDIFF", "TRUNC", "COLLECT_LIST", "COLLECT_SET",
    "EXPLODE", "POSEXPLODE", "ARRAY_CONTAINS", "COALESCE", "CONCAT_WS", "REGEXP_EXTRACT",
    "REGEXP_REPLACE", "TO_DATE", "TO_TIMESTAMP", "UNIX_TIMESTAMP", "FROM_UNIXTIME",
    "LATERAL_VIEW", "NAMED_STRUCT",
];

/// 01_MASTER: dialect and structural rules.
pub fn build_payload_01(
    bundle: &CounterBundle,
    fps: &[QueryFingerprint],
    inclusions: Option<&Value>,
) -> Value {
    let total = bundle.total_weight;
    let c = &bundle.counters;

    let mut structural = Map::new();
    for (flag, n) in c.structural.most_common(16) {
        if included(inclusions, "structural", flag.as_str()) {
            structural.insert(
                flag.as_str().to_string(),
                json!({"count": n, "pct": pct(n, total)}),
            );
        }
    }

    let select_cols = c.select_cols.most_common(usize::MAX);
    let total_sel: i64 = select_cols.iter().map(|(_, n)| n).sum();
    let avg_sel = if total_sel > 0 {
        select_cols.iter().map(|(k, n)| *k as i64 * n).sum::<i64>() as f64 / total_sel as f64
    } else {
        0.0
    };

    let dialect_fns: Vec<&str> = c
        .function
        .most_common(usize::MAX)
        .iter()
        .filter(|(f, _)| DIALECT_FN_REF.contains(&f.as_str()))
        .filter(|(f, _)| included(inclusions, "dialect_functions", f))
        .map(|(f, _)| DIALECT_FN_REF.iter().find(|r| **r == f.as_str()).copied().unwrap())
        .collect();

    let top_functions: Vec<Value> = c
        .function
        .most_common(40)
        .into_iter()
        .filter(|(f, _)| included(inclusions, "functions", f))
        .map(|(f, n)| json!({"f": f, "n": n, "pct": pct(n, total)}))
        .collect();

    let mut alias_conventions = Map::new();
    for (table, aliases) in &bundle.alias_conv {
        if !included(inclusions, "aliases", table) {
            continue;
        }
        let top: Vec<String> =
            aliases.most_common(3).into_iter().map(|(a, _)| a).collect();
        alias_conventions.insert(table.clone(), json!(top));
    }

    let core_tables: Vec<Value> = c
        .table
        .most_common(usize::MAX)
        .into_iter()
        .filter(|(t, _)| included(inclusions, "tables", t))
        .map(|(t, n)| json!({"t": t, "n": n, "pct": pct(n, total)}))
        .collect();

    let common_limits: Vec<Value> = c
        .limit_val
        .most_common(5)
        .into_iter()
        .map(|(v, n)| json!({"v": v, "n": n}))
        .collect();

    json!({
        "total_queries": total,
        "unique_queries": fps.len(),
        "structural_stats": structural,
        "top_functions": top_functions,
        "alias_conventions": alias_conventions,
        "output": {
            "avg_select_cols": (avg_sel * 10.0).round() / 10.0,
            "order_by_pct": pct(c.structural.get(&super::counters::StructuralFlag::OrderBy), total),
            "limit_pct": pct(c.structural.get(&super::counters::StructuralFlag::Limit), total),
            "common_limits": common_limits,
        },
        "dialect_functions": dialect_fns,
        "core_tables": core_tables,
    })
}

/// 02_SCHEMA: table + column + join registry.
pub fn build_payload_02(bundle: &CounterBundle, inclusions: Option<&Value>) -> Value {
    let total = bundle.total_weight;
    let c = &bundle.counters;

    let column_items = c.column.most_common(usize::MAX);
    let mut tables = Vec::new();
    for (table, table_count) in c.table.most_common(usize::MAX) {
        if !included(inclusions, "tables", &table) {
            continue;
        }
        let columns: Vec<Value> = column_items
            .iter()
            .filter(|((t, _), _)| *t == table)
            .filter(|((_, col), _)| {
                inclusions
                    .and_then(|inc| inc.get("columns"))
                    .and_then(|cols| cols.get(&table))
                    .and_then(|t| t.get(col))
                    .and_then(Value::as_bool)
                    .unwrap_or(true)
            })
            .map(|((_, col), n)| json!({"col": col, "n": n, "pct": pct(*n, table_count)}))
            .collect();

        let aliases: Vec<String> = bundle
            .alias_conv
            .get(&table)
            .map(|freq| freq.most_common(3).into_iter().map(|(a, _)| a).collect())
            .unwrap_or_default();

        tables.push(json!({
            "table": table,
            "n": table_count,
            "pct": pct(table_count, total),
            "aliases": aliases,
            "columns": columns,
        }));
    }

    let join_conds = c.join_cond.most_common(usize::MAX);
    let mut joins = Vec::new();
    for (pair, n) in c.join_pair.most_common(usize::MAX) {
        if pair.len() < 2 {
            continue;
        }
        let (left, right) = (&pair[0], &pair[1]);
        if !included(inclusions, "joins", &format!("{}|{}", left, right)) {
            continue;
        }
        let conds: Vec<Value> = join_conds
            .iter()
            .filter(|((a, b, _), _)| (a == left && b == right) || (a == right && b == left))
            .take(5)
            .map(|((_, _, on), cn)| json!({"on": on, "n": cn}))
            .collect();
        joins.push(json!({"a": left, "b": right, "n": n, "pct": pct(n, total), "on": conds}));
    }

    let type_heuristics: Map<String, Value> = [
        ("_id", "BIGINT/STRING"),
        ("_date", "DATE/TIMESTAMP"),
        ("_at", "TIMESTAMP"),
        ("_amount", "DECIMAL/DOUBLE"),
        ("_name", "STRING"),
        ("_code", "STRING(enum)"),
        ("_flag", "BOOLEAN"),
        ("is_", "BOOLEAN"),
        ("has_", "BOOLEAN"),
    ]
    .into_iter()
    .filter(|(k, _)| included(inclusions, "type_heuristics", k))
    .map(|(k, v)| (k.to_string(), json!(v)))
    .collect();

    json!({"tables": tables, "join_patterns": joins, "type_heuristics": type_heuristics})
}

/// 03_BUSINESS: enums, KPIs, dimensions, CASE WHEN patterns, NL pairings.
pub fn build_payload_03(
    bundle: &CounterBundle,
    fps: &[QueryFingerprint],
    max_enum_distinct: usize,
    inclusions: Option<&Value>,
) -> Value {
    let total = bundle.total_weight;
    let c = &bundle.counters;

    let mut enums = Map::new();
    for (column, values) in &bundle.literal_vals {
        if values.len() > max_enum_distinct || !included(inclusions, "enums", column) {
            continue;
        }
        let vals: Vec<Value> = values
            .most_common(30)
            .into_iter()
            .map(|(v, n)| json!({"v": v, "n": n}))
            .collect();
        enums.insert(column.clone(), json!(vals));
    }

    let kpis: Vec<Value> = c
        .agg_pattern
        .most_common(usize::MAX)
        .into_iter()
        .map(|((f, col), n)| json!({"f": format!("{}({})", f, col), "n": n, "pct": pct(n, total)}))
        .collect();

    let dims: Vec<Value> = c
        .group_by
        .most_common(usize::MAX)
        .into_iter()
        .filter(|(expr, _)| included(inclusions, "dimensions", expr))
        .map(|(expr, n)| json!({"expr": expr, "n": n, "pct": pct(n, total)}))
        .collect();

    let mut case_counter: BTreeMap<String, i64> = BTreeMap::new();
    for fp in fps {
        for block in &fp.case_when_blocks {
            let normalized = truncate_chars(&block.trim().to_uppercase(), 200).to_string();
            *case_counter.entry(normalized).or_insert(0) += fp.frequency;
        }
    }
    let mut case_whens: Vec<(String, i64)> = case_counter.into_iter().collect();
    case_whens.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let case_whens: Vec<Value> = case_whens
        .into_iter()
        .filter(|(sql, _)| included(inclusions, "case_whens", sql))
        .map(|(sql, n)| json!({"sql": sql, "n": n}))
        .collect();

    let mut nl_pairs = Vec::new();
    let mut seen_sigs: Vec<String> = Vec::new();
    for fp in fps {
        let Some(nl) = fp.nl_question.as_deref().filter(|q| !q.trim().is_empty()) else {
            continue;
        };
        if !included(inclusions, "nl_pairs", nl) {
            continue;
        }
        let mut tables = fp.tables.clone();
        tables.sort();
        let sig = tables.join("|");
        if !seen_sigs.contains(&sig) {
            seen_sigs.push(sig);
            nl_pairs.push(json!({
                "nl": nl,
                "sql": truncate_chars(&fp.canonical_sql, 500),
                "tables": fp.tables,
            }));
        }
    }

    json!({
        "enums": enums,
        "kpis": kpis,
        "dimensions": dims,
        "case_whens": case_whens,
        "nl_pairs": nl_pairs,
    })
}

/// 04_FILTERS: classified filters as mandatory/table-default/common/date.
pub fn build_payload_04(
    filters: &[ClassifiedFilter],
    total_weight: i64,
    table_freq: &BTreeMap<String, i64>,
    inclusions: Option<&Value>,
) -> Value {
    let mandatory: Vec<Value> = filters
        .iter()
        .filter(|f| f.tier == FilterTier::Mandatory)
        .filter(|f| included(inclusions, "mandatory", &f.condition))
        .map(|f| json!({"cond": f.condition, "pct": (f.global_pct * 1000.0).round() / 10.0, "n": f.count}))
        .collect();

    let mut table_defaults: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut by_count: Vec<&ClassifiedFilter> =
        filters.iter().filter(|f| f.tier == FilterTier::TableDefault).collect();
    by_count.sort_by(|a, b| b.count.cmp(&a.count));
    for filter in by_count {
        for (table, table_pct) in &filter.table_pcts {
            if *table_pct >= 0.30 {
                if !inclusions
                    .and_then(|inc| inc.get("table_defaults"))
                    .and_then(|td| td.get(table))
                    .and_then(|t| t.get(&filter.condition))
                    .and_then(Value::as_bool)
                    .unwrap_or(true)
                {
                    continue;
                }
                table_defaults.entry(table.clone()).or_default().push(json!({
                    "cond": filter.condition,
                    "pct": (table_pct * 1000.0).round() / 10.0,
                    "n": filter.count,
                }));
            }
        }
    }
    let mut ordered_tables: Vec<(String, Vec<Value>)> = table_defaults.into_iter().collect();
    ordered_tables
        .sort_by_key(|(t, _)| std::cmp::Reverse(table_freq.get(t).copied().unwrap_or(0)));
    let table_defaults: Map<String, Value> = ordered_tables
        .into_iter()
        .map(|(t, filters)| (t, json!(filters)))
        .collect();

    let common: Vec<Value> = filters
        .iter()
        .filter(|f| f.tier == FilterTier::Common)
        .filter(|f| included(inclusions, "common", &f.condition))
        .map(|f| json!({"cond": f.condition, "pct": (f.global_pct * 1000.0).round() / 10.0, "n": f.count}))
        .collect();

    let date_keywords = [
        "date_sub", "date_add", "datediff", "date_format", "to_date", "current_date",
        "current_timestamp", "interval", "_date", "_at", "_ts",
    ];
    let date_patterns: Vec<Value> = filters
        .iter()
        .filter(|f| {
            let lower = f.condition.to_lowercase();
            date_keywords.iter().any(|k| lower.contains(k))
        })
        .filter(|f| included(inclusions, "date_patterns", &f.condition))
        .map(|f| {
            json!({
                "cond": f.condition,
                "tier": f.tier,
                "pct": (f.global_pct * 1000.0).round() / 10.0,
            })
        })
        .collect();

    json!({
        "total": total_weight,
        "mandatory": mandatory,
        "table_defaults": table_defaults,
        "common": common,
        "date_patterns": date_patterns,
    })
}

/// 05_PATTERNS: cluster templates, structural exemplars, NL<->SQL pairs.
pub fn build_payload_05(
    clusters: &[QueryCluster],
    fps: &[QueryFingerprint],
    inclusions: Option<&Value>,
) -> Value {
    let cluster_data: Vec<Value> = clusters
        .iter()
        .filter(|cl| included(inclusions, "clusters", &cl.sig))
        .map(|cl| {
            let mut entry = json!({
                "sig": cl.sig,
                "count": cl.count,
                "unique": cl.n_unique,
                "functions": cl.functions,
                "group_by": cl.group_by,
                "where": cl.where_conds,
                "rep_sql": cl.rep_sql,
                "cpx_sql": cl.cpx_sql,
            });
            let rep_nl = fps.iter().find(|fp| fp.id == cl.rep_id).and_then(|fp| fp.nl_question.clone());
            let cpx_nl = fps.iter().find(|fp| fp.id == cl.cpx_id).and_then(|fp| fp.nl_question.clone());
            if let Some(nl) = rep_nl {
                entry["rep_nl"] = json!(nl);
            }
            if let Some(nl) = cpx_nl {
                entry["cpx_nl"] = json!(nl);
            }
            entry
        })
        .collect();

    // One well-sized exemplar per structural feature.
    let checks: [(&str, fn(&QueryFingerprint) -> bool); 5] = [
        ("CTE", |fp| fp.has_cte),
        ("Window", |fp| fp.has_window),
        ("CASE WHEN", |fp| fp.has_case),
        ("UNION", |fp| fp.has_union),
        ("Subquery", |fp| fp.has_subquery),
    ];
    let mut templates = Map::new();
    for (name, check) in checks {
        if !included(inclusions, "templates", name) {
            continue;
        }
        let candidates: Vec<&QueryFingerprint> = fps.iter().filter(|fp| check(fp)).collect();
        if candidates.is_empty() {
            continue;
        }
        let ideal = candidates
            .iter()
            .find(|fp| (200..=800).contains(&fp.canonical_sql.len()));
        let chosen = ideal.copied().unwrap_or_else(|| {
            candidates
                .iter()
                .min_by_key(|fp| fp.canonical_sql.len())
                .copied()
                .expect("non-empty candidates")
        });
        templates.insert(
            name.to_string(),
            json!({
                "sql": truncate_chars(&chosen.canonical_sql, 1000),
                "tables": chosen.tables,
            }),
        );
    }

    let nl_pairs: Vec<Value> = fps
        .iter()
        .filter_map(|fp| {
            let nl = fp.nl_question.as_deref()?.trim();
            if nl.is_empty() || !included(inclusions, "nl_pairs", nl) {
                return None;
            }
            Some(json!({"nl": nl, "sql": truncate_chars(&fp.canonical_sql, 600)}))
        })
        .collect();

    json!({"clusters": cluster_data, "templates": templates, "nl_pairs": nl_pairs})
}

/// Build all five payloads keyed by doc slot.
pub fn build_all_payloads(
    bundle: &CounterBundle,
    fps: &[QueryFingerprint],
    clusters: &[QueryCluster],
    filters: &[ClassifiedFilter],
    max_enum_distinct: usize,
    inclusions: Option<&Value>,
) -> BTreeMap<String, Value> {
    let table_freq: BTreeMap<String, i64> = bundle
        .counters
        .table
        .iter()
        .map(|(t, n)| (t.clone(), n))
        .collect();
    let slot = |key: &str| inclusions.and_then(|inc| inc.get(key));

    BTreeMap::from([
        ("01_MASTER".to_string(), build_payload_01(bundle, fps, slot("01_MASTER"))),
        ("02_SCHEMA".to_string(), build_payload_02(bundle, slot("02_SCHEMA"))),
        (
            "03_BUSINESS".to_string(),
            build_payload_03(bundle, fps, max_enum_distinct, slot("03_BUSINESS")),
        ),
        (
            "04_FILTERS".to_string(),
            build_payload_04(filters, bundle.total_weight, &table_freq, slot("04_FILTERS")),
        ),
        ("05_PATTERNS".to_string(), build_payload_05(clusters, fps, slot("05_PATTERNS"))),
    ])
}

/// Serialize a payload for the LLM, capping at `max_chars`.
pub fn cap_payload(payload: &Value, max_chars: usize) -> String {
    let pretty = serde_json::to_string_pretty(payload).unwrap_or_default();
    if pretty.len() <= max_chars {
        return pretty;
    }
    let compact = payload.to_string();
    if compact.len() <= max_chars {
        return compact;
    }
    format!(
        "{}\n\n... (truncated — highest-frequency items shown above)",
        truncate_chars(&compact, max_chars)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::services::databricks::clusters::{build_clusters, classify_filters};
    use crate::services::databricks::counters::build_counters;
    use crate::services::databricks::fingerprint::{extract_fingerprint, normalize_params, CorpusEntry};

    fn corpus() -> Vec<QueryFingerprint> {
        let sqls = [
            ("q1", "SELECT o.id, o.status FROM orders o WHERE is_active = true", 6),
            ("q2", "SELECT SUM(amount) FROM orders WHERE is_active = true GROUP BY region", 3),
            ("q3", "SELECT c.name FROM customers c JOIN orders o ON c.id = o.customer_id", 1),
        ];
        sqls.iter()
            .map(|(id, sql, freq)| {
                let entry = CorpusEntry {
                    sql: normalize_params(sql),
                    original_sql: sql.to_string(),
                    nl_question: None,
                    frequency: *freq,
                };
                extract_fingerprint(id, &entry, "hive").unwrap()
            })
            .collect()
    }

    #[test]
    fn strip_stats_removes_display_keys_recursively() {
        let value = json!({
            "tables": [{"table": "orders", "n": 10, "pct": 90.0,
                        "columns": [{"col": "id", "n": 4}]}],
            "total": 5,
        });
        let stripped = strip_stats(&value);
        assert!(stripped["tables"][0].get("n").is_none());
        assert!(stripped["tables"][0].get("pct").is_none());
        assert!(stripped["tables"][0]["columns"][0].get("n").is_none());
        assert_eq!(stripped["tables"][0]["table"], "orders");
        // "total" is not a stat key
        assert_eq!(stripped["total"], 5);
    }

    #[test]
    fn all_five_payloads_are_built() {
        let fps = corpus();
        let bundle = build_counters(&fps);
        let clusters = build_clusters(&fps);
        let filters = classify_filters(
            &bundle.counters.where_cond,
            &fps,
            bundle.total_weight,
            &FilterConfig::default(),
        );
        let payloads = build_all_payloads(&bundle, &fps, &clusters, &filters, 30, None);
        assert_eq!(payloads.len(), 5);
        for key in DOC_KEYS {
            assert!(payloads.contains_key(key), "missing payload {}", key);
        }
        assert_eq!(payloads["01_MASTER"]["total_queries"], 10);
        assert!(payloads["02_SCHEMA"]["tables"].as_array().unwrap().len() >= 2);
        assert!(!payloads["04_FILTERS"]["mandatory"].as_array().unwrap().is_empty());
    }

    #[test]
    fn inclusion_overrides_drop_items() {
        let fps = corpus();
        let bundle = build_counters(&fps);
        let inclusions = json!({"02_SCHEMA": {"tables": {"customers": false}}});
        let payload = build_payload_02(&bundle, inclusions.get("02_SCHEMA"));
        let tables: Vec<&str> = payload["tables"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["table"].as_str().unwrap())
            .collect();
        assert!(!tables.contains(&"customers"));
        assert!(tables.contains(&"orders"));
    }

    #[test]
    fn payload_cap_truncates_oversized_payloads() {
        let big = json!({"blob": "x".repeat(10_000)});
        let capped = cap_payload(&big, 500);
        assert!(capped.len() < 1_000);
        assert!(capped.contains("truncated"));
    }
}
