//! Query clustering by table signature and WHERE-condition tier
//! classification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::FilterConfig;
use crate::utils::{norm_ws, truncate_chars};

use super::counters::Freq;
use super::qfp::QueryFingerprint;

/// One cluster of queries sharing a table signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCluster {
    /// Sorted unique table names joined by `|`; `__NONE__` when empty.
    pub sig: String,
    pub count: i64,
    pub n_unique: usize,
    pub rep_id: String,
    pub cpx_id: String,
    pub rep_sql: String,
    pub cpx_sql: String,
    pub functions: Vec<String>,
    pub group_by: Vec<String>,
    pub where_conds: Vec<String>,
    pub tables: Vec<String>,
}

/// Group queries by table signature; per cluster pick a representative
/// (shortest raw SQL) and a complex exemplar (longest raw SQL).
pub fn build_clusters(fps: &[QueryFingerprint]) -> Vec<QueryCluster> {
    let mut groups: BTreeMap<String, Vec<&QueryFingerprint>> = BTreeMap::new();
    for fp in fps {
        let mut tables: Vec<String> = fp.tables.clone();
        tables.sort();
        tables.dedup();
        let sig = if tables.is_empty() { "__NONE__".to_string() } else { tables.join("|") };
        groups.entry(sig).or_default().push(fp);
    }

    let mut result: Vec<QueryCluster> = groups
        .into_iter()
        .map(|(sig, members)| {
            let count: i64 = members.iter().map(|fp| fp.frequency).sum();
            let shortest = members
                .iter()
                .min_by_key(|fp| fp.raw_sql.len())
                .expect("cluster is non-empty");
            let longest = members
                .iter()
                .max_by_key(|fp| fp.raw_sql.len())
                .expect("cluster is non-empty");

            let mut fc: Freq<String> = Freq::default();
            let mut gc: Freq<String> = Freq::default();
            let mut wc: Freq<String> = Freq::default();
            for m in &members {
                for f in &m.functions {
                    fc.add(f.clone(), m.frequency);
                }
                for g in &m.group_by {
                    gc.add(g.clone(), m.frequency);
                }
                for w in &m.where_conditions {
                    wc.add(norm_ws(w), m.frequency);
                }
            }

            QueryCluster {
                tables: if sig == "__NONE__" {
                    Vec::new()
                } else {
                    sig.split('|').map(String::from).collect()
                },
                count,
                n_unique: members.len(),
                rep_id: shortest.id.clone(),
                cpx_id: longest.id.clone(),
                rep_sql: best_sql(shortest, 800),
                cpx_sql: best_sql(longest, 1200),
                functions: fc.most_common(8).into_iter().map(|(f, _)| f).collect(),
                group_by: gc.most_common(5).into_iter().map(|(g, _)| g).collect(),
                where_conds: wc.most_common(5).into_iter().map(|(w, _)| w).collect(),
                sig,
            }
        })
        .collect();

    result.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.sig.cmp(&b.sig)));
    result
}

fn best_sql(fp: &QueryFingerprint, max: usize) -> String {
    let sql = if fp.canonical_sql.is_empty() { &fp.raw_sql } else { &fp.canonical_sql };
    truncate_chars(sql, max).to_string()
}

/// Tier of a classified WHERE condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterTier {
    #[serde(rename = "MANDATORY")]
    Mandatory,
    #[serde(rename = "TABLE-DEFAULT")]
    TableDefault,
    #[serde(rename = "COMMON")]
    Common,
    #[serde(rename = "SITUATIONAL")]
    Situational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedFilter {
    pub condition: String,
    pub tier: FilterTier,
    pub global_pct: f64,
    pub table_pcts: BTreeMap<String, f64>,
    pub count: i64,
}

/// Classify WHERE conditions by weighted frequency.
///
/// "Global" percentages use total corpus weight; "per-table" percentages
/// use the summed frequency of queries touching that table.
pub fn classify_filters(
    where_freq: &Freq<String>,
    fps: &[QueryFingerprint],
    total_weight: i64,
    thresholds: &FilterConfig,
) -> Vec<ClassifiedFilter> {
    if total_weight == 0 {
        return Vec::new();
    }

    let mut table_totals: Freq<String> = Freq::default();
    let mut table_cond: BTreeMap<String, Freq<String>> = BTreeMap::new();
    for fp in fps {
        for table in &fp.tables {
            table_totals.add(table.clone(), fp.frequency);
        }
        for cond in &fp.where_conditions {
            let normalized = norm_ws(cond);
            for table in &fp.tables {
                table_cond
                    .entry(table.clone())
                    .or_default()
                    .add(normalized.clone(), fp.frequency);
            }
        }
    }

    where_freq
        .most_common(usize::MAX)
        .into_iter()
        .map(|(condition, count)| {
            let global_pct = count as f64 / total_weight as f64;
            let mut table_pcts = BTreeMap::new();
            for (table, table_total) in table_totals.iter() {
                let table_count = table_cond
                    .get(table)
                    .map(|freq| freq.get(&condition))
                    .unwrap_or(0);
                if table_count > 0 && table_total > 0 {
                    table_pcts.insert(
                        table.clone(),
                        round4(table_count as f64 / table_total as f64),
                    );
                }
            }
            let max_table_pct = table_pcts.values().cloned().fold(0.0_f64, f64::max);

            let tier = if global_pct >= thresholds.mandatory_pct {
                FilterTier::Mandatory
            } else if max_table_pct >= thresholds.table_default_pct {
                FilterTier::TableDefault
            } else if max_table_pct >= thresholds.common_pct {
                FilterTier::Common
            } else {
                FilterTier::Situational
            };

            ClassifiedFilter {
                condition,
                tier,
                global_pct: round4(global_pct),
                table_pcts,
                count,
            }
        })
        .collect()
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::databricks::fingerprint::{extract_fingerprint, normalize_params, CorpusEntry};

    fn fp_from(id: &str, sql: &str, frequency: i64) -> QueryFingerprint {
        let entry = CorpusEntry {
            sql: normalize_params(sql),
            original_sql: sql.to_string(),
            nl_question: None,
            frequency,
        };
        extract_fingerprint(id, &entry, "hive").unwrap()
    }

    #[test]
    fn clusters_group_by_table_signature() {
        let fps = vec![
            fp_from("q1", "SELECT a FROM orders", 5),
            fp_from("q2", "SELECT a, b, c FROM orders WHERE a > 1", 2),
            fp_from("q3", "SELECT x FROM customers", 1),
        ];
        let clusters = build_clusters(&fps);
        assert_eq!(clusters.len(), 2);
        let orders = &clusters[0];
        assert_eq!(orders.sig, "orders");
        assert_eq!(orders.count, 7);
        assert_eq!(orders.n_unique, 2);
        assert_eq!(orders.rep_id, "q1"); // shortest raw SQL
        assert_eq!(orders.cpx_id, "q2"); // longest raw SQL
    }

    #[test]
    fn tableless_queries_land_in_none_cluster() {
        let fps = vec![fp_from("q1", "SELECT 1", 1)];
        let clusters = build_clusters(&fps);
        assert_eq!(clusters[0].sig, "__NONE__");
        assert!(clusters[0].tables.is_empty());
    }

    #[test]
    fn filter_tiers_match_thresholds() {
        // is_active=true in 60% of total weight; tenant filter in 100% of
        // `orders` queries but only 20% overall.
        let fps = vec![
            fp_from("q1", "SELECT a FROM events WHERE is_active = true", 4),
            fp_from("q2", "SELECT b FROM events", 4),
            fp_from("q3", "SELECT c FROM orders WHERE tenant_id = 'acme'", 2),
        ];
        let bundle = crate::services::databricks::counters::build_counters(&fps);
        let classified = classify_filters(
            &bundle.counters.where_cond,
            &fps,
            bundle.total_weight,
            &FilterConfig::default(),
        );

        let active = classified
            .iter()
            .find(|f| f.condition.contains("is_active"))
            .unwrap();
        assert_eq!(active.tier, FilterTier::Mandatory);

        let tenant = classified
            .iter()
            .find(|f| f.condition.contains("tenant_id"))
            .unwrap();
        assert_eq!(tenant.tier, FilterTier::TableDefault);
        assert_eq!(*tenant.table_pcts.get("orders").unwrap(), 1.0);
        assert!(tenant.global_pct < 0.5);
    }

    #[test]
    fn rare_filters_are_situational() {
        let fps = vec![
            fp_from("q1", "SELECT a FROM t", 95),
            fp_from("q2", "SELECT a FROM t WHERE one_off = 7", 5),
        ];
        let bundle = crate::services::databricks::counters::build_counters(&fps);
        let classified = classify_filters(
            &bundle.counters.where_cond,
            &fps,
            bundle.total_weight,
            &FilterConfig::default(),
        );
        let one_off = classified.iter().find(|f| f.condition.contains("one_off")).unwrap();
        assert_eq!(one_off.tier, FilterTier::Situational);
    }
}
