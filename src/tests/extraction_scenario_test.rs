//! End-to-end extraction/analysis scenarios over notebook source content,
//! exercising cell splitting, SQL extraction, org resolution, dedup, and
//! fingerprint analysis without any workspace upstream.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::services::databricks::counters::build_counters;
use crate::services::databricks::discovery::{filter_notebooks_by_modified_date, NotebookInfo};
use crate::services::databricks::fingerprint::{extract_all_fingerprints, ingest_and_dedup};
use crate::services::databricks::sql_extract::{
    extract_notebook_default_org_id, extract_sql_from_cell, get_org_id_for_sql, sha256_hash,
};

static PY_CELL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"# COMMAND ----------").unwrap());

/// One python notebook with an org default and two identical spark.sql
/// cells, as exported in SOURCE format.
const NOTEBOOK_SOURCE: &str = r#"# Databricks notebook source
# MAGIC %sql
# MAGIC USE read_api_42

# COMMAND ----------
df = spark.sql("SELECT a FROM t WHERE o=123")

# COMMAND ----------
df2 = spark.sql("SELECT a FROM t WHERE o=123")
"#;

#[test]
fn sql_pipeline_happy_path() {
    // Extraction: split cells, extract, resolve orgs, hash.
    let notebook_default = extract_notebook_default_org_id(NOTEBOOK_SOURCE);
    assert_eq!(notebook_default.as_deref(), Some("42"));

    let mut extracted: Vec<(String, String)> = Vec::new(); // (sql, hash)
    for cell in PY_CELL_BOUNDARY.split(NOTEBOOK_SOURCE) {
        let cell = cell.trim();
        if cell.is_empty() {
            continue;
        }
        let (sql, is_valid) = extract_sql_from_cell(cell, "python", "hive");
        if let Some(sql) = sql {
            assert!(is_valid);
            let (org, source) = get_org_id_for_sql(Some(&sql), notebook_default.as_deref());
            assert_eq!(org.as_deref(), Some("42"));
            assert_eq!(source.as_deref(), Some("Notebook"));
            let hash = sha256_hash(&sql).unwrap();
            extracted.push((sql, hash));
        }
    }

    // The USE cell plus two SELECT cells are valid; the two SELECTs share
    // one content hash.
    let selects: Vec<&(String, String)> = extracted
        .iter()
        .filter(|(sql, _)| sql.to_uppercase().starts_with("SELECT"))
        .collect();
    assert_eq!(selects.len(), 2);
    assert_eq!(selects[0].1, selects[1].1);

    // Analysis: dedup merges to one query with frequency 2.
    let records: Vec<(String, Option<String>, i64)> = selects
        .iter()
        .map(|(sql, _)| (sql.clone(), None, 1))
        .collect();
    let corpus = ingest_and_dedup(records, "hive");
    assert_eq!(corpus.len(), 1);
    assert_eq!(corpus[0].frequency, 2);

    let (fingerprints, failures) = extract_all_fingerprints(&corpus, "hive");
    assert!(failures.is_empty());
    assert_eq!(fingerprints.len(), 1);
    let fp = &fingerprints[0];
    assert_eq!(fp.frequency, 2);
    assert_eq!(fp.tables, vec!["t"]);
    assert_eq!(fp.where_conditions, vec!["o = 123"]);

    // Total weight equals the summed frequency.
    let bundle = build_counters(&fingerprints);
    assert_eq!(bundle.total_weight, 2);
    let freq_sum: i64 = fingerprints.iter().map(|f| f.frequency).sum();
    assert_eq!(bundle.total_weight, freq_sum);
}

#[test]
fn freshness_filter_scenario() {
    // 2024-01-15 and 2024-06-20 against a 2024-06-01 cutoff.
    let january = NotebookInfo {
        path: "/Workspace/Users/a/old".to_string(),
        modified_at: Some(1_705_276_800_000),
        ..Default::default()
    };
    let june = NotebookInfo {
        path: "/Workspace/Users/a/fresh".to_string(),
        modified_at: Some(1_718_841_600_000),
        ..Default::default()
    };
    let cutoff_ms = 1_717_200_000_000; // 2024-06-01

    let (kept, skipped) =
        filter_notebooks_by_modified_date(vec![january, june], cutoff_ms);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].path, "/Workspace/Users/a/fresh");
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].path, "/Workspace/Users/a/old");
}
