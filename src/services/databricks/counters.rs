//! Frequency counters — the twelve weighted aggregates over a fingerprint
//! corpus, plus per-column literal values and per-table alias conventions.
//!
//! Counters are typed in-process and serialized to `[[key, n], ...]` lists
//! only at the persistence boundary.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use crate::utils::norm_ws;

use super::fingerprint::is_agg_function;
use super::qfp::QueryFingerprint;

/// A weighted frequency table.
#[derive(Debug, Clone)]
pub struct Freq<K: Eq + Hash>(HashMap<K, i64>);

impl<K: Eq + Hash> Default for Freq<K> {
    fn default() -> Self {
        Self(HashMap::new())
    }
}

impl<K: Eq + Hash + Ord + Clone> Freq<K> {
    pub fn add(&mut self, key: K, weight: i64) {
        *self.0.entry(key).or_insert(0) += weight;
    }

    pub fn get(&self, key: &K) -> i64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, i64)> {
        self.0.iter().map(|(k, v)| (k, *v))
    }

    /// Entries sorted by count descending; ties break on key so output is
    /// deterministic.
    pub fn most_common(&self, limit: usize) -> Vec<(K, i64)> {
        let mut entries: Vec<(K, i64)> =
            self.0.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(limit);
        entries
    }

    pub fn total(&self) -> i64 {
        self.0.values().sum()
    }
}

/// Structural query features tracked as weighted flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum StructuralFlag {
    Cte,
    Window,
    Union,
    Case,
    Subquery,
    Having,
    OrderBy,
    Distinct,
    Limit,
}

impl StructuralFlag {
    pub const ALL: [StructuralFlag; 9] = [
        Self::Cte,
        Self::Window,
        Self::Union,
        Self::Case,
        Self::Subquery,
        Self::Having,
        Self::OrderBy,
        Self::Distinct,
        Self::Limit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cte => "has_cte",
            Self::Window => "has_window",
            Self::Union => "has_union",
            Self::Case => "has_case",
            Self::Subquery => "has_subquery",
            Self::Having => "has_having",
            Self::OrderBy => "has_order_by",
            Self::Distinct => "has_distinct",
            Self::Limit => "has_limit",
        }
    }

    fn is_set(&self, fp: &QueryFingerprint) -> bool {
        match self {
            Self::Cte => fp.has_cte,
            Self::Window => fp.has_window,
            Self::Union => fp.has_union,
            Self::Case => fp.has_case,
            Self::Subquery => fp.has_subquery,
            Self::Having => fp.has_having,
            Self::OrderBy => fp.has_order_by,
            Self::Distinct => fp.has_distinct,
            Self::Limit => fp.has_limit,
        }
    }
}

/// The twelve-counter aggregate.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub table: Freq<String>,
    /// (resolved table, column)
    pub column: Freq<(String, String)>,
    pub function: Freq<String>,
    /// Unordered table pair (sorted); single-sided joins keep one element.
    pub join_pair: Freq<Vec<String>>,
    /// (table a, table b, ON condition)
    pub join_cond: Freq<(String, String, String)>,
    pub where_cond: Freq<String>,
    pub group_by: Freq<String>,
    /// (aggregate function, column)
    pub agg_pattern: Freq<(String, String)>,
    pub order_by: Freq<String>,
    pub structural: Freq<StructuralFlag>,
    pub limit_val: Freq<i64>,
    pub select_cols: Freq<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct CounterBundle {
    pub counters: Counters,
    /// column -> value frequency table (enum candidates)
    pub literal_vals: BTreeMap<String, Freq<String>>,
    /// table -> alias frequency table
    pub alias_conv: BTreeMap<String, Freq<String>>,
    pub total_weight: i64,
}

/// Build all frequency counters from a fingerprint corpus.
/// Counters are commutative, so the result is independent of input order.
pub fn build_counters(fps: &[QueryFingerprint]) -> CounterBundle {
    let mut bundle = CounterBundle::default();
    let c = &mut bundle.counters;

    for fp in fps {
        let w = fp.frequency;
        bundle.total_weight += w;

        for table in &fp.tables {
            c.table.add(table.clone(), w);
        }

        for (table_ref, column) in &fp.qualified_columns {
            let resolved = fp.resolve_table(table_ref);
            c.column.add((resolved, column.clone()), w);
            for function in &fp.functions {
                if is_agg_function(function) {
                    c.agg_pattern.add((function.clone(), column.clone()), w);
                }
            }
        }

        for function in &fp.functions {
            c.function.add(function.clone(), w);
        }

        for edge in &fp.join_graph {
            if !edge.left.is_empty() {
                let mut pair = vec![edge.left.clone(), edge.right.clone()];
                pair.sort();
                c.join_cond
                    .add((pair[0].clone(), pair[1].clone(), edge.on_condition.clone()), w);
                c.join_pair.add(pair, w);
            } else {
                c.join_pair.add(vec![edge.right.clone()], w);
            }
        }

        for cond in &fp.where_conditions {
            c.where_cond.add(norm_ws(cond), w);
        }

        for expr in &fp.group_by {
            c.group_by.add(expr.clone(), w);
        }

        for (column, values) in &fp.literals {
            let freq = bundle.literal_vals.entry(column.clone()).or_default();
            for value in values {
                freq.add(value.clone(), w);
            }
        }

        for flag in StructuralFlag::ALL {
            if flag.is_set(fp) {
                c.structural.add(flag, w);
            }
        }

        for (alias, table) in &fp.alias_map {
            bundle
                .alias_conv
                .entry(table.clone())
                .or_default()
                .add(alias.clone(), w);
        }

        for expr in &fp.order_by {
            c.order_by.add(expr.clone(), w);
        }

        if let Some(limit) = fp.limit_value {
            c.limit_val.add(limit, w);
        }
        c.select_cols.add(fp.select_col_count, w);
    }

    bundle
}

// -- serialization (persistence boundary only) --

fn pairs_to_json<K: Eq + Hash + Ord + Clone, F: Fn(&K) -> Value>(
    freq: &Freq<K>,
    limit: usize,
    key_fn: F,
) -> Value {
    Value::Array(
        freq.most_common(limit)
            .iter()
            .map(|(k, n)| json!([key_fn(k), n]))
            .collect(),
    )
}

impl CounterBundle {
    pub fn counters_to_json(&self) -> Value {
        let c = &self.counters;
        json!({
            "table": pairs_to_json(&c.table, 500, |k| json!(k)),
            "column": pairs_to_json(&c.column, 500, |k| json!([k.0, k.1])),
            "function": pairs_to_json(&c.function, 500, |k| json!(k)),
            "join_pair": pairs_to_json(&c.join_pair, 500, |k| json!(k)),
            "join_cond": pairs_to_json(&c.join_cond, 200, |k| json!([k.0, k.1, k.2])),
            "where": pairs_to_json(&c.where_cond, 300, |k| json!(k)),
            "group_by": pairs_to_json(&c.group_by, 200, |k| json!(k)),
            "agg_pattern": pairs_to_json(&c.agg_pattern, 200, |k| json!([k.0, k.1])),
            "order_by": pairs_to_json(&c.order_by, 200, |k| json!(k)),
            "structural": pairs_to_json(&c.structural, 16, |k| json!(k.as_str())),
            "limit_val": pairs_to_json(&c.limit_val, 50, |k| json!(k)),
            "select_cols": pairs_to_json(&c.select_cols, 50, |k| json!(k)),
        })
    }

    pub fn literal_vals_to_json(&self) -> Value {
        let mut out = serde_json::Map::new();
        for (column, freq) in &self.literal_vals {
            out.insert(
                column.clone(),
                Value::Array(
                    freq.most_common(30)
                        .iter()
                        .map(|(v, n)| json!([v, n]))
                        .collect(),
                ),
            );
        }
        Value::Object(out)
    }

    pub fn alias_conv_to_json(&self) -> Value {
        let mut out = serde_json::Map::new();
        for (table, freq) in &self.alias_conv {
            out.insert(
                table.clone(),
                Value::Array(
                    freq.most_common(5)
                        .iter()
                        .map(|(a, n)| json!([a, n]))
                        .collect(),
                ),
            );
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::databricks::fingerprint::{extract_fingerprint, normalize_params, CorpusEntry};

    fn fp_from(sql: &str, frequency: i64) -> QueryFingerprint {
        let entry = CorpusEntry {
            sql: normalize_params(sql),
            original_sql: sql.to_string(),
            nl_question: None,
            frequency,
        };
        extract_fingerprint("q", &entry, "hive").unwrap()
    }

    #[test]
    fn total_weight_is_sum_of_frequencies() {
        let fps = vec![
            fp_from("SELECT a FROM t WHERE o = 1", 3),
            fp_from("SELECT b FROM u", 5),
        ];
        let bundle = build_counters(&fps);
        assert_eq!(bundle.total_weight, 8);
        assert_eq!(bundle.counters.table.get(&"t".to_string()), 3);
        assert_eq!(bundle.counters.table.get(&"u".to_string()), 5);
    }

    #[test]
    fn counters_are_commutative() {
        let a = fp_from("SELECT a FROM t WHERE is_active = true", 2);
        let b = fp_from("SELECT SUM(x) FROM u GROUP BY region", 4);
        let forward = build_counters(&[a.clone(), b.clone()]);
        let reverse = build_counters(&[b, a]);
        assert_eq!(forward.counters_to_json(), reverse.counters_to_json());
        assert_eq!(forward.total_weight, reverse.total_weight);
    }

    #[test]
    fn aliases_resolve_for_column_counter() {
        let fps = vec![fp_from("SELECT o.id FROM orders o", 1)];
        let bundle = build_counters(&fps);
        assert_eq!(
            bundle
                .counters
                .column
                .get(&("orders".to_string(), "id".to_string())),
            1
        );
        assert!(bundle.alias_conv.contains_key("orders"));
    }

    #[test]
    fn join_pairs_are_unordered() {
        let fps = vec![
            fp_from("SELECT 1 FROM a JOIN b ON a.x = b.x", 1),
            fp_from("SELECT 1 FROM b JOIN a ON b.x = a.x", 1),
        ];
        let bundle = build_counters(&fps);
        let pair = vec!["a".to_string(), "b".to_string()];
        assert_eq!(bundle.counters.join_pair.get(&pair), 2);
    }

    #[test]
    fn structural_flags_weighted() {
        let fps = vec![fp_from("SELECT DISTINCT a FROM t LIMIT 5", 7)];
        let bundle = build_counters(&fps);
        assert_eq!(bundle.counters.structural.get(&StructuralFlag::Distinct), 7);
        assert_eq!(bundle.counters.structural.get(&StructuralFlag::Limit), 7);
        assert_eq!(bundle.counters.limit_val.get(&5), 7);
    }

    #[test]
    fn literal_values_feed_enum_candidates() {
        let fps = vec![
            fp_from("SELECT a FROM t WHERE status = 'ACTIVE'", 2),
            fp_from("SELECT b FROM t WHERE status = 'PAUSED'", 1),
        ];
        let bundle = build_counters(&fps);
        let status = bundle.literal_vals.get("status").unwrap();
        assert_eq!(status.get(&"ACTIVE".to_string()), 2);
        assert_eq!(status.get(&"PAUSED".to_string()), 1);
    }
}
