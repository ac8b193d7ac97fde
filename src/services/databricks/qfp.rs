//! Query fingerprint — structured metadata from one parsed SQL query.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinEdge {
    pub left: String,
    pub right: String,
    pub join_type: String,
    pub on_condition: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFingerprint {
    pub id: String,
    pub raw_sql: String,
    pub nl_question: Option<String>,
    pub frequency: i64,

    pub tables: Vec<String>,
    /// (table-or-alias, column) pairs; aliases are resolved against
    /// `alias_map` by the counter stage.
    pub qualified_columns: Vec<(String, String)>,
    pub functions: Vec<String>,
    pub join_graph: Vec<JoinEdge>,
    pub where_conditions: Vec<String>,
    pub group_by: Vec<String>,
    pub having_conditions: Vec<String>,
    pub order_by: Vec<String>,
    /// Literal values seen in equality predicates, per column.
    pub literals: BTreeMap<String, Vec<String>>,
    pub case_when_blocks: Vec<String>,
    pub window_exprs: Vec<String>,

    pub canonical_sql: String,

    pub has_cte: bool,
    pub has_window: bool,
    pub has_union: bool,
    pub has_case: bool,
    pub has_subquery: bool,
    pub has_having: bool,
    pub has_order_by: bool,
    pub has_distinct: bool,
    pub has_limit: bool,
    pub limit_value: Option<i64>,
    pub select_col_count: usize,
    /// alias -> table
    pub alias_map: BTreeMap<String, String>,
}

impl QueryFingerprint {
    pub fn new(id: &str, raw_sql: &str, nl_question: Option<String>, frequency: i64) -> Self {
        Self {
            id: id.to_string(),
            raw_sql: raw_sql.to_string(),
            nl_question,
            frequency,
            ..Default::default()
        }
    }

    /// Resolve a table-or-alias reference to a table name.
    pub fn resolve_table(&self, reference: &str) -> String {
        self.alias_map
            .get(reference)
            .cloned()
            .unwrap_or_else(|| reference.to_string())
    }
}

/// Record for one query the parser could not handle. Failures never abort
/// an analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseFailure {
    pub id: String,
    pub raw_sql: String,
    pub error: String,
    pub nl_question: Option<String>,
}
