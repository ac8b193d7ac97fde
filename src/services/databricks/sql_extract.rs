//! SQL extraction from notebook cells.
//!
//! Cells are classified by language, cleaned of comments and directives,
//! PII-redacted, and validated through the SQL parser. CREATE/INSERT
//! statements yield their embedded SELECT when one exists; all other
//! DDL/DML is rejected.

use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::fingerprint::dialect_for;

const CRUD_KEYWORDS: [&str; 8] =
    ["DROP", "CREATE", "INSERT", "UPDATE", "DELETE", "ALTER", "TRUNCATE", "MERGE"];
const VALID_SQL_KEYWORDS: [&str; 7] =
    ["SELECT", "WITH", "USE", "SHOW", "DESCRIBE", "DESC", "EXPLAIN"];

static ORG_DB_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(read_api|write_db)_(\d+)\b").unwrap());
static NOTEBOOK_USE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\buse\s+(read_api|write_db)_(\d+)\b").unwrap());

// -- utility functions --

pub fn epoch_ms_to_str(epoch_ms: Option<i64>) -> Option<String> {
    let ms = epoch_ms?;
    if ms == 0 {
        return None;
    }
    DateTime::from_timestamp_millis(ms).map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// SHA-256 hex digest of the trimmed text, or None if empty.
pub fn sha256_hash(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(trimmed.as_bytes());
    Some(format!("{:x}", hasher.finalize()))
}

/// Owner username from a workspace path.
pub fn extract_user_from_path(path: &str) -> String {
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    match parts.as_slice() {
        ["Workspace", "Users", user, ..] => user.to_string(),
        ["Users", user, ..] => user.to_string(),
        ["Repos", user, ..] => user.to_string(),
        ["Shared", ..] => "Shared".to_string(),
        [_, second, ..] => second.to_string(),
        _ => "Unknown".to_string(),
    }
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}").unwrap());
static MOBILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\+91[\-\s]?)?(?:91[\-\s]?)?[6-9]\d{9}").unwrap());
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+\d{1,3}[\-\s]?\(?\d{1,4}\)?[\-\s]?\d{3,4}[\-\s]?\d{3,4}").unwrap()
});
static CC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}[\-\s]?\d{4}[\-\s]?\d{4}[\-\s]?\d{1,7}\b").unwrap());
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"['"][a-zA-Z0-9]{32,}['"]"#).unwrap());

/// Redact emails, phone numbers, card numbers, and long quoted tokens.
pub fn redact_pii(text: &str) -> String {
    let text = EMAIL_RE.replace_all(text, "<EMAIL_REDACTED>");
    let text = MOBILE_RE.replace_all(&text, "<MOBILE_REDACTED>");
    let text = PHONE_RE.replace_all(&text, "<PHONE_REDACTED>");
    let text = CC_RE.replace_all(&text, "<CC_REDACTED>");
    let text = TOKEN_RE.replace_all(&text, "'<TOKEN_REDACTED>'");
    text.into_owned()
}

// -- SQL comment removal --

/// Remove `--` and `/* */` comments while preserving quoted strings
/// (including `''` escapes).
pub fn remove_sql_comments(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let n = chars.len();
    let mut result = String::with_capacity(n);
    let mut i = 0;

    while i < n {
        if chars[i] == '\'' {
            let mut j = i + 1;
            while j < n {
                if chars[j] == '\'' && j + 1 < n && chars[j + 1] == '\'' {
                    j += 2;
                } else if chars[j] == '\'' {
                    j += 1;
                    break;
                } else {
                    j += 1;
                }
            }
            result.extend(&chars[i..j.min(n)]);
            i = j;
        } else if chars[i] == '/' && i + 1 < n && chars[i + 1] == '*' {
            match sql_find(&chars, "*/", i + 2) {
                Some(end) => i = end + 2,
                None => break,
            }
        } else if chars[i] == '-' && i + 1 < n && chars[i + 1] == '-' {
            match sql_find(&chars, "\n", i) {
                Some(end) => i = end,
                None => break,
            }
        } else {
            result.push(chars[i]);
            i += 1;
        }
    }
    result.trim().to_string()
}

fn sql_find(chars: &[char], needle: &str, from: usize) -> Option<usize> {
    let needle: Vec<char> = needle.chars().collect();
    (from..chars.len().saturating_sub(needle.len() - 1))
        .find(|&i| chars[i..i + needle.len()] == needle[..])
}

// -- cell comment detection --

/// True when the cell contains no active code at all.
pub fn is_cell_commented_out(content: &str, file_type: &str) -> bool {
    let non_empty: Vec<&str> =
        content.trim().lines().filter(|l| !l.trim().is_empty()).collect();
    if non_empty.is_empty() {
        return true;
    }

    match file_type.to_lowercase().as_str() {
        "python" | "py" => {
            let stripped = content.trim();
            for quote in ["\"\"\"", "'''"] {
                if stripped.starts_with(quote) && stripped.ends_with(quote) && stripped.len() > 6 {
                    return true;
                }
            }
            for line in &non_empty {
                let l = line.trim();
                if l.starts_with("# DBTITLE") {
                    continue;
                }
                if l.starts_with("# MAGIC") {
                    return false;
                }
                if !l.starts_with('#') {
                    return false;
                }
            }
            true
        }
        "sql" => {
            for line in &non_empty {
                let l = line.trim();
                if l.starts_with("-- DBTITLE") {
                    continue;
                }
                if l.starts_with("-- MAGIC") {
                    return false;
                }
                if !l.starts_with("--") {
                    return false;
                }
            }
            true
        }
        _ => false,
    }
}

// -- python SQL extraction --

static TRIPLE_SQL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)\.sql\s*\(\s*[frbu]*"{3}(.*?)"{3}\s*\)|\.sql\s*\(\s*[frbu]*'{3}(.*?)'{3}\s*\)"#)
        .unwrap()
});
static SINGLE_SQL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\.sql\s*\(\s*[frbu]*"([^"]+)"\s*\)|\.sql\s*\(\s*[frbu]*'([^']+)'\s*\)"#).unwrap()
});
static SQL_VAR_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.sql\s*\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)").unwrap());
static TRIPLE_ASSIGN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)(?m)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*[frbu]*"{3}(.*?)"{3}|^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*[frbu]*'{3}(.*?)'{3}"#,
    )
    .unwrap()
});
static SINGLE_ASSIGN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*[frbu]*"([^"\n]+)"|^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*[frbu]*'([^'\n]+)'"#)
        .unwrap()
});
static FSTRING_SITE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^{}]*\}").unwrap());

/// Extract SQL strings passed to `.sql(...)` calls from code, including
/// simple one-hop string-variable propagation. Interpolation sites become
/// `{...}` so the parameter normalizer can stub them for parsing.
pub fn extract_sql_from_code(code: &str) -> Vec<String> {
    let mut queries = Vec::new();

    for cap in TRIPLE_SQL_RE.captures_iter(code) {
        if let Some(m) = cap.get(1).or_else(|| cap.get(2)) {
            queries.push(m.as_str().to_string());
        }
    }
    if queries.is_empty() {
        for cap in SINGLE_SQL_RE.captures_iter(code) {
            if let Some(m) = cap.get(1).or_else(|| cap.get(2)) {
                queries.push(m.as_str().to_string());
            }
        }
    }

    // One-hop variable propagation: var = "SELECT ..."; spark.sql(var)
    if queries.is_empty() {
        let mut variables: Vec<(String, String)> = Vec::new();
        for cap in TRIPLE_ASSIGN_RE.captures_iter(code) {
            let name = cap.get(1).or_else(|| cap.get(3));
            let value = cap.get(2).or_else(|| cap.get(4));
            if let (Some(name), Some(value)) = (name, value) {
                variables.push((name.as_str().to_string(), value.as_str().to_string()));
            }
        }
        for cap in SINGLE_ASSIGN_RE.captures_iter(code) {
            let name = cap.get(1).or_else(|| cap.get(3));
            let value = cap.get(2).or_else(|| cap.get(4));
            if let (Some(name), Some(value)) = (name, value) {
                variables.push((name.as_str().to_string(), value.as_str().to_string()));
            }
        }
        for cap in SQL_VAR_CALL_RE.captures_iter(code) {
            let var = &cap[1];
            if let Some((_, value)) = variables.iter().find(|(n, _)| n == var) {
                queries.push(value.clone());
            }
        }
    }

    queries
        .into_iter()
        .map(|q| FSTRING_SITE_RE.replace_all(&q, "{...}").into_owned())
        .collect()
}

// -- cell content extractors --

/// SQL lines from `# MAGIC %sql` blocks in a python cell.
pub fn extract_magic_sql_from_python_cell(content: &str) -> Option<String> {
    static MAGIC_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#\s*MAGIC\s*").unwrap());
    let mut sql_lines = Vec::new();
    let mut in_sql_block = false;
    for line in content.lines() {
        let stripped = line.trim();
        if stripped.starts_with("# DBTITLE") {
            continue;
        }
        if stripped.contains("# MAGIC %sql") {
            in_sql_block = true;
            continue;
        }
        if in_sql_block && stripped.starts_with("# MAGIC") {
            let sql_part = MAGIC_PREFIX.replace(stripped, "").into_owned();
            if sql_part.starts_with('%') {
                continue;
            }
            sql_lines.push(sql_part);
        }
    }
    let joined = sql_lines.join("\n").trim().to_string();
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Body of a native SQL cell with notebook directives removed.
pub fn extract_sql_from_sql_cell(content: &str) -> Option<String> {
    let skip_prefixes =
        ["-- Databricks notebook source", "-- DBTITLE", "-- MAGIC", "-- COMMAND"];
    let lines: Vec<&str> = content
        .lines()
        .filter(|line| {
            let stripped = line.trim();
            !skip_prefixes.iter().any(|p| stripped.starts_with(p))
        })
        .collect();
    let joined = lines.join("\n").trim().to_string();
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Embedded python from `-- MAGIC %python` blocks in a SQL cell.
pub fn extract_embedded_python_from_sql_cell(content: &str) -> Option<String> {
    static MAGIC_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^--\s*MAGIC\s*").unwrap());
    let mut python_lines = Vec::new();
    let mut in_python_block = false;
    for line in content.lines() {
        let stripped = line.trim();
        if stripped.contains("-- MAGIC %python") {
            in_python_block = true;
            continue;
        }
        if in_python_block && stripped.starts_with("-- MAGIC") {
            python_lines.push(MAGIC_PREFIX.replace(stripped, "").into_owned());
        }
    }
    let joined = python_lines.join("\n").trim().to_string();
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

// -- validation and formatting --

static CREATE_AS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\bAS\s+(WITH\s+.+|SELECT\s+.+)$").unwrap());

/// Validate one SQL statement, returning (is_valid, formatted_sql).
///
/// SELECT/WITH/USE/SHOW/DESCRIBE/EXPLAIN pass through (canonicalized when
/// the parser accepts them). CREATE/INSERT yield their embedded query when
/// present; all other DDL/DML is rejected.
pub fn validate_and_format_sql(sql: &str, dialect: &str) -> (bool, Option<String>) {
    let cleaned = sql.trim();
    if cleaned.is_empty() {
        return (false, None);
    }
    let first_word = cleaned
        .split_whitespace()
        .next()
        .map(|w| w.to_uppercase())
        .unwrap_or_default();

    if VALID_SQL_KEYWORDS.contains(&first_word.as_str()) {
        if let Some(canonical) = parse_single(cleaned, dialect) {
            return (true, Some(canonical));
        }
        return (true, Some(cleaned.to_string()));
    }

    if first_word == "CREATE" || first_word == "INSERT" {
        if let Some(embedded) = extract_embedded_query(cleaned, dialect) {
            return (true, Some(embedded));
        }
        if let Some(cap) = CREATE_AS_RE.captures(cleaned) {
            return (true, Some(cap[1].trim().to_string()));
        }
        return (false, None);
    }

    if CRUD_KEYWORDS.contains(&first_word.as_str()) {
        return (false, None);
    }

    (false, None)
}

fn parse_single(sql: &str, dialect: &str) -> Option<String> {
    let dialect = dialect_for(dialect);
    let statements = sqlparser::parser::Parser::parse_sql(dialect.as_ref(), sql).ok()?;
    statements.first().map(|s| s.to_string())
}

/// Embedded SELECT/WITH inside CREATE TABLE AS / CREATE VIEW / INSERT.
fn extract_embedded_query(sql: &str, dialect: &str) -> Option<String> {
    use sqlparser::ast::Statement;

    let dialect = dialect_for(dialect);
    let statements = sqlparser::parser::Parser::parse_sql(dialect.as_ref(), sql).ok()?;
    let embedded = match statements.into_iter().next()? {
        Statement::CreateTable(create) => create.query.map(|q| q.to_string()),
        Statement::CreateView { query, .. } => Some(query.to_string()),
        Statement::Insert(insert) => insert.source.map(|q| q.to_string()),
        _ => None,
    }?;
    let upper = embedded.trim().to_uppercase();
    if upper.starts_with("SELECT") || upper.starts_with("WITH") {
        Some(embedded)
    } else {
        None
    }
}

// -- main cell extraction --

/// Extract and validate SQL from one notebook cell.
/// Returns (formatted_sql, is_valid) — the first valid candidate wins.
pub fn extract_sql_from_cell(
    raw_content: &str,
    file_type: &str,
    dialect: &str,
) -> (Option<String>, bool) {
    let content = raw_content.trim();
    if content.is_empty() {
        return (None, false);
    }

    // Skip markdown, pip, and shell cells
    if content.contains("# MAGIC %md") || content.contains("-- MAGIC %md") {
        return (None, false);
    }
    if content.contains("%pip") || content.contains("%sh") {
        return (None, false);
    }
    if is_cell_commented_out(content, file_type) {
        return (None, false);
    }

    let mut candidates: Vec<String> = Vec::new();

    match file_type.to_lowercase().as_str() {
        "python" | "py" => {
            if content.contains("# MAGIC %sql") {
                if let Some(sql) = extract_magic_sql_from_python_cell(content) {
                    candidates.push(sql);
                }
            }
            if content.contains("spark.sql") || content.contains(".sql(") {
                let code: Vec<&str> = content
                    .lines()
                    .filter(|l| !l.trim().starts_with('#'))
                    .collect();
                if !code.is_empty() {
                    candidates.extend(extract_sql_from_code(&code.join("\n")));
                }
            }
        }
        "sql" => {
            if content.contains("-- MAGIC %python") {
                if let Some(python_code) = extract_embedded_python_from_sql_cell(content) {
                    candidates.extend(extract_sql_from_code(&python_code));
                }
            } else if let Some(sql) = extract_sql_from_sql_cell(content) {
                candidates.push(sql);
            }
        }
        _ => {}
    }

    for sql in candidates {
        let cleaned = remove_sql_comments(&sql);
        if cleaned.is_empty() {
            continue;
        }
        let redacted = redact_pii(&cleaned);
        let (is_valid, formatted) = validate_and_format_sql(&redacted, dialect);
        if let Some(formatted) = formatted {
            return (Some(formatted), is_valid);
        } else if is_valid {
            return (Some(redacted), is_valid);
        }
    }

    (None, false)
}

// -- org id resolution --

pub fn extract_org_id_from_sql(sql: &str) -> Option<String> {
    ORG_DB_PATTERN.captures(sql).map(|cap| cap[2].to_string())
}

pub fn extract_notebook_default_org_id(content: &str) -> Option<String> {
    NOTEBOOK_USE_PATTERN.captures(content).map(|cap| cap[2].to_string())
}

/// In-query org reference wins over the notebook default.
/// Returns (org_id, source) with source "In-Query" or "Notebook".
pub fn get_org_id_for_sql(
    sql: Option<&str>,
    notebook_default: Option<&str>,
) -> (Option<String>, Option<String>) {
    if let Some(sql) = sql {
        if let Some(inline) = extract_org_id_from_sql(sql) {
            return (Some(inline), Some("In-Query".to_string()));
        }
    }
    if let Some(default) = notebook_default {
        return (Some(default.to_string()), Some("Notebook".to_string()));
    }
    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_over_trimmed_text() {
        let a = sha256_hash("  SELECT 1  ").unwrap();
        let b = sha256_hash("SELECT 1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(sha256_hash("   ").is_none());
    }

    #[test]
    fn user_from_workspace_paths() {
        assert_eq!(extract_user_from_path("/Workspace/Users/ana@x.com/nb"), "ana@x.com");
        assert_eq!(extract_user_from_path("/Users/bob/reports/q1"), "bob");
        assert_eq!(extract_user_from_path("/Repos/carol/repo"), "carol");
        assert_eq!(extract_user_from_path("/Shared/etl"), "Shared");
    }

    #[test]
    fn comment_removal_preserves_quoted_strings() {
        let sql = "SELECT a, '-- not a comment' FROM t -- trailing\nWHERE b = 1 /* gone */";
        let cleaned = remove_sql_comments(sql);
        assert!(cleaned.contains("'-- not a comment'"));
        assert!(!cleaned.contains("trailing"));
        assert!(!cleaned.contains("gone"));
    }

    #[test]
    fn fully_commented_cells_are_skipped() {
        assert!(is_cell_commented_out("# one\n# two", "python"));
        assert!(!is_cell_commented_out("# MAGIC %sql\n# MAGIC SELECT 1", "python"));
        assert!(is_cell_commented_out("-- a\n-- b", "sql"));
        assert!(!is_cell_commented_out("SELECT 1", "sql"));
    }

    #[test]
    fn redaction_covers_emails_and_tokens() {
        let out = redact_pii("SELECT * FROM u WHERE email = 'jane.doe@example.com'");
        assert!(out.contains("<EMAIL_REDACTED>"));
        let out = redact_pii("key = 'abcdefghijklmnopqrstuvwxyz0123456789ABCD'");
        assert!(out.contains("<TOKEN_REDACTED>"));
    }

    #[test]
    fn extracts_spark_sql_literals() {
        let code = r#"df = spark.sql("SELECT a FROM t WHERE o=123")"#;
        let sqls = extract_sql_from_code(code);
        assert_eq!(sqls, vec!["SELECT a FROM t WHERE o=123"]);
    }

    #[test]
    fn extracts_triple_quoted_and_fstring_sites() {
        let code = "q = spark.sql(f\"\"\"\nSELECT x FROM {table} WHERE d >= '2024-01-01'\n\"\"\")";
        let sqls = extract_sql_from_code(code);
        assert_eq!(sqls.len(), 1);
        assert!(sqls[0].contains("FROM {...}"));
    }

    #[test]
    fn one_hop_variable_propagation() {
        let code = "query = \"SELECT a FROM t\"\nresult = spark.sql(query)";
        let sqls = extract_sql_from_code(code);
        assert_eq!(sqls, vec!["SELECT a FROM t"]);
    }

    #[test]
    fn magic_sql_block_extraction() {
        let cell = "# DBTITLE 1,Revenue\n# MAGIC %sql\n# MAGIC SELECT region, SUM(amount)\n# MAGIC FROM sales\n# MAGIC GROUP BY region";
        let sql = extract_magic_sql_from_python_cell(cell).unwrap();
        assert!(sql.starts_with("SELECT region"));
        assert!(sql.contains("GROUP BY region"));
    }

    #[test]
    fn select_statements_pass_validation() {
        let (valid, formatted) = validate_and_format_sql("SELECT a FROM t WHERE o = 123", "hive");
        assert!(valid);
        assert!(formatted.unwrap().to_uppercase().contains("SELECT"));
    }

    #[test]
    fn create_table_as_select_yields_embedded_query() {
        let (valid, formatted) =
            validate_and_format_sql("CREATE TABLE x AS SELECT a, b FROM t WHERE a > 1", "hive");
        assert!(valid);
        let formatted = formatted.unwrap().to_uppercase();
        assert!(formatted.starts_with("SELECT"));
        assert!(!formatted.contains("CREATE"));
    }

    #[test]
    fn ddl_and_dml_are_rejected() {
        assert_eq!(validate_and_format_sql("DROP TABLE t", "hive"), (false, None));
        assert_eq!(validate_and_format_sql("DELETE FROM t WHERE a=1", "hive"), (false, None));
        assert_eq!(validate_and_format_sql("UPDATE t SET a=1", "hive"), (false, None));
    }

    #[test]
    fn org_id_in_query_wins_over_notebook_default() {
        let (org, source) =
            get_org_id_for_sql(Some("SELECT * FROM read_api_42.orders"), Some("7"));
        assert_eq!(org.as_deref(), Some("42"));
        assert_eq!(source.as_deref(), Some("In-Query"));

        let (org, source) = get_org_id_for_sql(Some("SELECT 1"), Some("7"));
        assert_eq!(org.as_deref(), Some("7"));
        assert_eq!(source.as_deref(), Some("Notebook"));

        let (org, source) = get_org_id_for_sql(Some("SELECT 1"), None);
        assert!(org.is_none() && source.is_none());
    }

    #[test]
    fn notebook_default_from_use_statement() {
        let content = "# MAGIC %sql\n# MAGIC USE read_api_42";
        assert_eq!(extract_notebook_default_org_id(content).as_deref(), Some("42"));
    }

    #[test]
    fn end_to_end_cell_extraction() {
        let cell = r#"df = spark.sql("SELECT a FROM t WHERE o=123")"#;
        let (sql, valid) = extract_sql_from_cell(cell, "python", "hive");
        assert!(valid);
        assert!(sql.unwrap().to_uppercase().contains("SELECT"));

        let md_cell = "# MAGIC %md\n# MAGIC ## Notes";
        assert_eq!(extract_sql_from_cell(md_cell, "python", "hive"), (None, false));

        let pip_cell = "%pip install pandas";
        assert_eq!(extract_sql_from_cell(pip_cell, "python", "hive"), (None, false));
    }
}
