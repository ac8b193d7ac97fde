//! Fingerprint engine — dedup pass and per-query AST decomposition.
//!
//! Phase 0 filters to SELECT/WITH, merges exact duplicates, then merges by
//! canonical parsed text. Phase 1 walks each query's AST into a
//! `QueryFingerprint`. Both CPU-bound passes run on the blocking pool so
//! the event loop is never starved.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{
    Distinct, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, Join,
    JoinConstraint, JoinOperator, Query, Select, SetExpr, SetOperator, Statement, TableFactor,
    TableWithJoins, Value,
};
use sqlparser::dialect::{dialect_from_str, Dialect, GenericDialect};
use sqlparser::parser::Parser;
use std::collections::HashMap;

use crate::utils::norm_ws;

use super::qfp::{JoinEdge, ParseFailure, QueryFingerprint};

/// Resolve a configured dialect name; unknown names fall back to generic.
pub fn dialect_for(name: &str) -> Box<dyn Dialect> {
    dialect_from_str(name).unwrap_or_else(|| Box::new(GenericDialect {}))
}

/// Canonical spellings for vendor-specific function synonyms.
static FUNC_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("NVL", "COALESCE"),
        ("NVL2", "COALESCE"),
        ("IFNULL", "COALESCE"),
        ("SUBSTR", "SUBSTRING"),
        ("DATEADD", "DATE_ADD"),
        ("DATESUB", "DATE_SUB"),
        ("DAY", "DAYOFMONTH"),
        ("CEILING", "CEIL"),
    ])
});

const AGG_FUNCTIONS: [&str; 5] = ["SUM", "COUNT", "AVG", "MIN", "MAX"];

pub fn is_agg_function(name: &str) -> bool {
    AGG_FUNCTIONS.contains(&name)
}

fn is_select(sql: &str) -> bool {
    let upper = norm_ws(sql).to_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH")
}

// -- parameter normalization --

static DOLLAR_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{(\w+)\}").unwrap());
static BRACE_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\w+)\}").unwrap());
static COLON_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r":(\w+)").unwrap());
static AT_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\w+)").unwrap());

/// Replace dynamic placeholders (`${x}`, `{x}`, `:x`, `?`, `@x`, `{...}`)
/// with sentinel string literals so the parser accepts the text.
pub fn normalize_params(sql: &str) -> String {
    let sql = DOLLAR_PARAM_RE.replace_all(sql, "'PARAM_$1'");
    let sql = replace_brace_params(&sql);
    let sql = sql.replace("{...}", "'PARAM_DYNAMIC'");
    let sql = COLON_PARAM_RE.replace_all(&sql, "'PARAM_$1'");
    let sql = sql.replace('?', "'PLACEHOLDER'");
    AT_PARAM_RE.replace_all(&sql, "'PARAM_$1'").into_owned()
}

/// `{x}` -> 'PARAM_x', except when already quoted ('{x}').
fn replace_brace_params(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for cap in BRACE_PARAM_RE.captures_iter(sql) {
        let m = cap.get(0).unwrap();
        let quoted_before = m.start() > 0 && bytes[m.start() - 1] == b'\'';
        let quoted_after = m.end() < bytes.len() && bytes[m.end()] == b'\'';
        out.push_str(&sql[last..m.start()]);
        if quoted_before && quoted_after {
            out.push_str(m.as_str());
        } else {
            out.push_str(&format!("'PARAM_{}'", &cap[1]));
        }
        last = m.end();
    }
    out.push_str(&sql[last..]);
    out
}

// -- phase 0: ingest & dedup --

#[derive(Debug, Clone)]
pub struct CorpusEntry {
    /// Parameter-normalized SQL used for parsing.
    pub sql: String,
    /// The SQL text as extracted.
    pub original_sql: String,
    pub nl_question: Option<String>,
    pub frequency: i64,
}

/// Phase 0: filter to SELECT/WITH, exact dedup, canonical dedup.
/// Idempotent: running it over its own output returns an identical corpus.
pub fn ingest_and_dedup(
    records: Vec<(String, Option<String>, i64)>,
    dialect: &str,
) -> Vec<CorpusEntry> {
    let mut corpus: Vec<CorpusEntry> = Vec::new();
    for (sql, nl_question, frequency) in records {
        let sql = sql.trim().to_string();
        if sql.is_empty() || !is_select(&sql) {
            continue;
        }
        corpus.push(CorpusEntry { original_sql: sql.clone(), sql, nl_question, frequency });
    }

    // Pass 1: exact dedup on normalized uppercase text.
    let mut seen: Vec<(String, CorpusEntry)> = Vec::new();
    for entry in corpus {
        let key = norm_ws(&entry.original_sql).to_uppercase();
        match seen.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                existing.frequency += entry.frequency;
                if existing.nl_question.is_none() && entry.nl_question.is_some() {
                    existing.nl_question = entry.nl_question;
                }
            }
            None => seen.push((key, entry)),
        }
    }

    // Pass 2: canonical dedup via the parser.
    let dialect = dialect_for(dialect);
    let mut canonical_seen: Vec<(String, CorpusEntry)> = Vec::new();
    for (fallback_key, entry) in seen {
        let canonical = Parser::parse_sql(dialect.as_ref(), &entry.original_sql)
            .ok()
            .and_then(|stmts| stmts.first().map(|s| s.to_string().to_uppercase()))
            .unwrap_or(fallback_key);
        match canonical_seen.iter_mut().find(|(k, _)| *k == canonical) {
            Some((_, existing)) => {
                existing.frequency += entry.frequency;
                if existing.nl_question.is_none() && entry.nl_question.is_some() {
                    existing.nl_question = entry.nl_question;
                }
            }
            None => canonical_seen.push((canonical, entry)),
        }
    }

    canonical_seen
        .into_iter()
        .map(|(_, mut entry)| {
            entry.sql = normalize_params(&entry.original_sql);
            entry
        })
        .collect()
}

// -- phase 1: extraction --

/// Parse one query into a fingerprint, or a failure record.
pub fn extract_fingerprint(
    qid: &str,
    entry: &CorpusEntry,
    dialect: &str,
) -> Result<QueryFingerprint, ParseFailure> {
    let dialect = dialect_for(dialect);
    let statements = match Parser::parse_sql(dialect.as_ref(), &entry.sql) {
        Ok(stmts) if !stmts.is_empty() => stmts,
        Ok(_) => {
            return Err(ParseFailure {
                id: qid.to_string(),
                raw_sql: entry.original_sql.clone(),
                error: "empty statement list".to_string(),
                nl_question: entry.nl_question.clone(),
            })
        }
        Err(e) => {
            return Err(ParseFailure {
                id: qid.to_string(),
                raw_sql: entry.original_sql.clone(),
                error: e.to_string(),
                nl_question: entry.nl_question.clone(),
            })
        }
    };

    let statement = &statements[0];
    let mut fp = QueryFingerprint::new(
        qid,
        &entry.original_sql,
        entry.nl_question.clone(),
        entry.frequency,
    );

    if let Statement::Query(query) = statement {
        let mut walker = Walker { fp: &mut fp, depth: 0 };
        walker.walk_query(query, true);
    }

    dedupe_in_place(&mut fp.tables);
    dedupe_in_place(&mut fp.functions);
    fp.canonical_sql = statement.to_string();
    Ok(fp)
}

fn dedupe_in_place(items: &mut Vec<String>) {
    let mut seen = Vec::new();
    items.retain(|item| {
        if seen.contains(item) {
            false
        } else {
            seen.push(item.clone());
            true
        }
    });
}

/// Batch extraction for a whole corpus. Returns (fingerprints, failures).
pub fn extract_all_fingerprints(
    corpus: &[CorpusEntry],
    dialect: &str,
) -> (Vec<QueryFingerprint>, Vec<ParseFailure>) {
    let mut fingerprints = Vec::new();
    let mut failures = Vec::new();
    for (i, entry) in corpus.iter().enumerate() {
        let qid = format!("q_{:05}", i);
        match extract_fingerprint(&qid, entry, dialect) {
            Ok(fp) => fingerprints.push(fp),
            Err(failure) => failures.push(failure),
        }
    }
    (fingerprints, failures)
}

// -- the AST walker --

struct Walker<'a> {
    fp: &'a mut QueryFingerprint,
    depth: usize,
}

impl Walker<'_> {
    fn walk_query(&mut self, query: &Query, top_level: bool) {
        if let Some(with) = &query.with {
            self.fp.has_cte = true;
            for cte in &with.cte_tables {
                self.walk_query(&cte.query, false);
            }
        }

        self.walk_set_expr(&query.body, top_level);

        if let Some(order_by) = &query.order_by {
            if top_level && !order_by.exprs.is_empty() {
                self.fp.has_order_by = true;
            }
            for obe in &order_by.exprs {
                if top_level {
                    self.fp.order_by.push(obe.expr.to_string());
                }
                self.walk_expr(&obe.expr);
            }
        }

        if let Some(limit) = &query.limit {
            if top_level {
                self.fp.has_limit = true;
                if let Expr::Value(Value::Number(n, _)) = limit {
                    self.fp.limit_value = n.parse().ok();
                }
            }
        }
    }

    fn walk_set_expr(&mut self, body: &SetExpr, top_level: bool) {
        match body {
            SetExpr::Select(select) => self.walk_select(select, top_level),
            SetExpr::Query(query) => {
                self.fp.has_subquery = true;
                self.walk_query(query, top_level);
            }
            SetExpr::SetOperation { op, left, right, .. } => {
                if matches!(op, SetOperator::Union) {
                    self.fp.has_union = true;
                }
                self.walk_set_expr(left, top_level);
                self.walk_set_expr(right, false);
            }
            _ => {}
        }
    }

    fn walk_select(&mut self, select: &Select, top_level: bool) {
        if top_level {
            if matches!(select.distinct, Some(Distinct::Distinct | Distinct::On(_))) {
                self.fp.has_distinct = true;
            }
            self.fp.select_col_count = select.projection.len();
        }

        for item in &select.projection {
            match item {
                sqlparser::ast::SelectItem::UnnamedExpr(expr) => self.walk_expr(expr),
                sqlparser::ast::SelectItem::ExprWithAlias { expr, .. } => self.walk_expr(expr),
                _ => {}
            }
        }

        for twj in &select.from {
            self.walk_table_with_joins(twj);
        }

        if let Some(selection) = &select.selection {
            let mut conditions = Vec::new();
            split_and(selection, &mut conditions);
            for cond in &conditions {
                self.fp.where_conditions.push(cond.clone());
            }
            self.walk_expr(selection);
        }

        if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for expr in exprs {
                self.fp.group_by.push(expr.to_string());
                self.walk_expr(expr);
            }
        }

        if let Some(having) = &select.having {
            self.fp.has_having = true;
            self.fp.having_conditions.push(having.to_string());
            self.walk_expr(having);
        }
    }

    fn walk_table_with_joins(&mut self, twj: &TableWithJoins) {
        let mut prev_table = self.register_table_factor(&twj.relation);
        for join in &twj.joins {
            let right_table = self.register_table_factor(&join.relation);
            let (join_type, on_condition) = describe_join(join);
            if let Some(on) = &on_condition {
                self.walk_on_condition(on);
            }
            if let Some(right) = right_table.clone() {
                self.fp.join_graph.push(JoinEdge {
                    left: prev_table.clone().unwrap_or_default(),
                    right: right.clone(),
                    join_type,
                    on_condition: on_condition.map(|e| e.to_string()).unwrap_or_default(),
                });
                prev_table = Some(right);
            }
        }
    }

    fn walk_on_condition(&mut self, expr: &Expr) {
        self.walk_expr(expr);
    }

    /// Record a table factor; returns the base table name when it is a
    /// plain table reference.
    fn register_table_factor(&mut self, factor: &TableFactor) -> Option<String> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let table = name
                    .0
                    .last()
                    .map(|ident| ident.value.to_lowercase())
                    .unwrap_or_default();
                if table.is_empty() || table == "dual" {
                    return None;
                }
                self.fp.tables.push(table.clone());
                if let Some(alias) = alias {
                    self.fp
                        .alias_map
                        .insert(alias.name.value.to_lowercase(), table.clone());
                }
                Some(table)
            }
            TableFactor::Derived { subquery, .. } => {
                self.fp.has_subquery = true;
                self.walk_query(subquery, false);
                None
            }
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.walk_table_with_joins(table_with_joins);
                None
            }
            _ => None,
        }
    }

    fn walk_expr(&mut self, expr: &Expr) {
        if self.depth > 64 {
            return;
        }
        self.depth += 1;
        self.walk_expr_inner(expr);
        self.depth -= 1;
    }

    fn walk_expr_inner(&mut self, expr: &Expr) {
        match expr {
            Expr::Identifier(ident) => {
                self.fp
                    .qualified_columns
                    .push((String::new(), ident.value.to_lowercase()));
            }
            Expr::CompoundIdentifier(parts) => {
                if parts.len() >= 2 {
                    let table = parts[parts.len() - 2].value.to_lowercase();
                    let column = parts[parts.len() - 1].value.to_lowercase();
                    self.fp.qualified_columns.push((table, column));
                } else if let Some(last) = parts.last() {
                    self.fp
                        .qualified_columns
                        .push((String::new(), last.value.to_lowercase()));
                }
            }
            Expr::BinaryOp { left, op, right } => {
                // Equality literals feed enum-candidate detection.
                if matches!(op, sqlparser::ast::BinaryOperator::Eq) {
                    if let (Some(column), Some(value)) = (column_name(left), literal_value(right))
                    {
                        self.fp.literals.entry(column).or_default().push(value);
                    }
                }
                self.walk_expr(left);
                self.walk_expr(right);
            }
            Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => self.walk_expr(expr),
            Expr::Function(func) => {
                let raw_name = func
                    .name
                    .0
                    .last()
                    .map(|ident| ident.value.to_uppercase())
                    .unwrap_or_default();
                let canonical =
                    FUNC_MAP.get(raw_name.as_str()).map(|s| s.to_string()).unwrap_or(raw_name);
                if !canonical.is_empty() {
                    self.fp.functions.push(canonical);
                }
                if func.over.is_some() {
                    self.fp.has_window = true;
                    self.fp.window_exprs.push(func.to_string());
                }
                if let FunctionArguments::List(list) = &func.args {
                    for arg in &list.args {
                        let arg_expr = match arg {
                            FunctionArg::Named { arg, .. } => arg,
                            FunctionArg::Unnamed(arg) => arg,
                            _ => continue,
                        };
                        if let FunctionArgExpr::Expr(e) = arg_expr {
                            self.walk_expr(e);
                        }
                    }
                }
                if let FunctionArguments::Subquery(query) = &func.args {
                    self.fp.has_subquery = true;
                    self.walk_query(query, false);
                }
            }
            Expr::Case { operand, conditions, results, else_result } => {
                self.fp.has_case = true;
                self.fp.case_when_blocks.push(expr.to_string());
                if let Some(op) = operand {
                    self.walk_expr(op);
                }
                for c in conditions {
                    self.walk_expr(c);
                }
                for r in results {
                    self.walk_expr(r);
                }
                if let Some(e) = else_result {
                    self.walk_expr(e);
                }
            }
            Expr::Cast { expr, .. } => {
                self.fp.functions.push("CAST".to_string());
                self.walk_expr(expr);
            }
            Expr::InList { expr, list, .. } => {
                self.walk_expr(expr);
                for item in list {
                    self.walk_expr(item);
                }
            }
            Expr::InSubquery { expr, subquery, .. } => {
                self.fp.has_subquery = true;
                self.walk_expr(expr);
                self.walk_query(subquery, false);
            }
            Expr::Between { expr, low, high, .. } => {
                self.walk_expr(expr);
                self.walk_expr(low);
                self.walk_expr(high);
            }
            Expr::Like { expr, pattern, .. }
            | Expr::ILike { expr, pattern, .. }
            | Expr::SimilarTo { expr, pattern, .. } => {
                self.walk_expr(expr);
                self.walk_expr(pattern);
            }
            Expr::IsNull(e) | Expr::IsNotNull(e) | Expr::IsTrue(e) | Expr::IsFalse(e) => {
                self.walk_expr(e)
            }
            Expr::Subquery(query) => {
                self.fp.has_subquery = true;
                self.walk_query(query, false);
            }
            Expr::Exists { subquery, .. } => {
                self.fp.has_subquery = true;
                self.walk_query(subquery, false);
            }
            Expr::Tuple(items) => {
                for item in items {
                    self.walk_expr(item);
                }
            }
            _ => {}
        }
    }
}

/// Split a predicate on top-level AND into normalized condition strings.
fn split_and(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::BinaryOp { left, op: sqlparser::ast::BinaryOperator::And, right } => {
            split_and(left, out);
            split_and(right, out);
        }
        Expr::Nested(inner) => split_and(inner, out),
        other => out.push(other.to_string()),
    }
}

fn describe_join(join: &Join) -> (String, Option<&Expr>) {
    let (name, constraint) = match &join.join_operator {
        JoinOperator::Inner(c) => ("INNER", Some(c)),
        JoinOperator::LeftOuter(c) => ("LEFT", Some(c)),
        JoinOperator::RightOuter(c) => ("RIGHT", Some(c)),
        JoinOperator::FullOuter(c) => ("FULL", Some(c)),
        JoinOperator::LeftSemi(c) => ("LEFT SEMI", Some(c)),
        JoinOperator::RightSemi(c) => ("RIGHT SEMI", Some(c)),
        JoinOperator::LeftAnti(c) => ("LEFT ANTI", Some(c)),
        JoinOperator::RightAnti(c) => ("RIGHT ANTI", Some(c)),
        JoinOperator::CrossJoin => ("CROSS", None),
        _ => ("INNER", None),
    };
    let on = constraint.and_then(|c| match c {
        JoinConstraint::On(expr) => Some(expr),
        _ => None,
    });
    (name.to_string(), on)
}

fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn literal_value(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Value(value) => Some(match value {
            Value::Number(n, _) => n.clone(),
            Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => s.clone(),
            Value::Boolean(b) => b.to_string(),
            Value::Null => "NULL".to_string(),
            other => other.to_string(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sql: &str) -> CorpusEntry {
        CorpusEntry {
            sql: normalize_params(sql),
            original_sql: sql.to_string(),
            nl_question: None,
            frequency: 1,
        }
    }

    #[test]
    fn normalize_params_covers_all_placeholder_shapes() {
        let sql = "SELECT a FROM t WHERE b = ${x} AND c = {y} AND d = :z AND e = ? AND f = @w";
        let out = normalize_params(sql);
        assert!(out.contains("'PARAM_x'"));
        assert!(out.contains("'PARAM_y'"));
        assert!(out.contains("'PARAM_z'"));
        assert!(out.contains("'PLACEHOLDER'"));
        assert!(out.contains("'PARAM_w'"));
    }

    #[test]
    fn already_quoted_braces_are_untouched() {
        let out = normalize_params("SELECT a FROM t WHERE b = '{x}'");
        assert!(out.contains("'{x}'"));
    }

    #[test]
    fn basic_fingerprint_extraction() {
        let fp = extract_fingerprint("q_00000", &entry("SELECT a FROM t WHERE o = 123"), "hive")
            .unwrap();
        assert_eq!(fp.tables, vec!["t"]);
        assert_eq!(fp.where_conditions, vec!["o = 123"]);
        assert_eq!(fp.literals.get("o").unwrap(), &vec!["123".to_string()]);
        assert_eq!(fp.select_col_count, 1);
        assert!(!fp.has_cte && !fp.has_union);
    }

    #[test]
    fn join_graph_and_alias_map() {
        let sql = "SELECT o.id, c.name FROM orders o JOIN customers c ON o.customer_id = c.id LEFT JOIN stores s ON o.store_id = s.id";
        let fp = extract_fingerprint("q", &entry(sql), "hive").unwrap();
        assert_eq!(fp.tables, vec!["orders", "customers", "stores"]);
        assert_eq!(fp.alias_map.get("o").unwrap(), "orders");
        assert_eq!(fp.join_graph.len(), 2);
        assert_eq!(fp.join_graph[0].left, "orders");
        assert_eq!(fp.join_graph[0].right, "customers");
        assert_eq!(fp.join_graph[1].join_type, "LEFT");
        assert!(fp.join_graph[0].on_condition.contains("customer_id"));
    }

    #[test]
    fn structural_flags_detected() {
        let sql = "WITH x AS (SELECT a FROM t) SELECT DISTINCT a, CASE WHEN a > 1 THEN 'hi' ELSE 'lo' END, ROW_NUMBER() OVER (ORDER BY a) FROM x WHERE a IN (SELECT a FROM u) GROUP BY a HAVING COUNT(*) > 1 ORDER BY a LIMIT 10";
        let fp = extract_fingerprint("q", &entry(sql), "hive").unwrap();
        assert!(fp.has_cte);
        assert!(fp.has_distinct);
        assert!(fp.has_case);
        assert!(fp.has_window);
        assert!(fp.has_subquery);
        assert!(fp.has_having);
        assert!(fp.has_order_by);
        assert!(fp.has_limit);
        assert_eq!(fp.limit_value, Some(10));
        assert!(!fp.group_by.is_empty());
    }

    #[test]
    fn where_splits_on_top_level_and_only() {
        let sql = "SELECT a FROM t WHERE x = 1 AND (y = 2 OR z = 3) AND w = 'a'";
        let fp = extract_fingerprint("q", &entry(sql), "hive").unwrap();
        assert_eq!(fp.where_conditions.len(), 3);
    }

    #[test]
    fn parse_failure_is_recorded_not_raised() {
        let bad = entry("SELECT FROM WHERE !!");
        let (fps, failures) = extract_all_fingerprints(&[bad], "hive");
        assert!(fps.is_empty());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "q_00000");
    }

    #[test]
    fn dedup_merges_exact_and_canonical_duplicates() {
        let records = vec![
            ("SELECT a FROM t WHERE o=123".to_string(), None, 1),
            ("select a  from t where o=123".to_string(), Some("how many".to_string()), 1),
            ("INSERT INTO t VALUES (1)".to_string(), None, 1),
        ];
        let corpus = ingest_and_dedup(records, "hive");
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus[0].frequency, 2);
        assert_eq!(corpus[0].nl_question.as_deref(), Some("how many"));
    }

    #[test]
    fn dedup_is_idempotent() {
        let records = vec![
            ("SELECT a FROM t".to_string(), None, 2),
            ("SELECT b FROM u".to_string(), None, 3),
        ];
        let first = ingest_and_dedup(records, "hive");
        let second = ingest_and_dedup(
            first
                .iter()
                .map(|e| (e.original_sql.clone(), e.nl_question.clone(), e.frequency))
                .collect(),
            "hive",
        );
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.original_sql, b.original_sql);
            assert_eq!(a.frequency, b.frequency);
        }
    }

    #[test]
    fn function_synonyms_are_canonicalized() {
        let fp =
            extract_fingerprint("q", &entry("SELECT NVL(a, 0), SUBSTR(b, 1, 2) FROM t"), "hive")
                .unwrap();
        assert!(fp.functions.contains(&"COALESCE".to_string()));
        assert!(fp.functions.contains(&"SUBSTRING".to_string()));
    }
}
