//! Robust parsing of LLM JSON output: code-fence stripping, outermost
//! extraction, and truncation recovery by progressive tail trimming with
//! bracket auto-closing. One variant recovers a single object (the tree),
//! the other a JSON array (sanitized documents).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static OBJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());
static ARRAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").unwrap());
static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9 _:#()\-,]+$").unwrap());

#[derive(Debug, thiserror::Error)]
#[error("Could not parse LLM response as JSON. Response starts with: {preview}")]
pub struct ParseRecoveryError {
    pub preview: String,
}

fn preview_of(text: &str) -> ParseRecoveryError {
    ParseRecoveryError { preview: crate::utils::truncate_chars(text, 200).to_string() }
}

/// Strip markdown code fences (```json ... ```).
pub fn strip_code_fences(text: &str) -> String {
    let mut text = text.trim();
    if text.starts_with("```") {
        let lines: Vec<&str> = text.lines().collect();
        let end = if lines.last().map(|l| l.trim()) == Some("```") {
            lines.len() - 1
        } else {
            lines.len()
        };
        return lines[1..end].join("\n").trim().to_string();
    }
    if text.ends_with("```") {
        text = text[..text.len() - 3].trim();
    }
    text.to_string()
}

/// Parse a single JSON object from possibly-truncated LLM output.
pub fn parse_object_output(text: &str) -> Result<Value, ParseRecoveryError> {
    let text = strip_code_fences(text);

    // Try 1: direct parse.
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&text) {
        return Ok(value);
    }

    // Try 2: extract the outermost object from surrounding prose.
    if let Some(m) = OBJECT_RE.find(&text) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(m.as_str()) {
            return Ok(value);
        }
    }

    // Try 3: truncation recovery.
    if let Some(start) = text.find('{') {
        if let Some(value) = recover_truncated(&text[start..], false) {
            return Ok(value);
        }
    }

    Err(preview_of(&text))
}

/// Parse a JSON array from possibly-truncated LLM output.
pub fn parse_array_output(text: &str) -> Result<Vec<Value>, ParseRecoveryError> {
    let text = strip_code_fences(text);

    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&text) {
        return Ok(items);
    }

    if let Some(m) = ARRAY_RE.find(&text) {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(m.as_str()) {
            return Ok(items);
        }
    }

    // Salvage complete objects from a cut-off array.
    if let Some(start) = text.find('[') {
        let partial = &text[start..];
        if let Some(last_brace) = partial.rfind('}') {
            let candidate = format!("{}]", &partial[..=last_brace]);
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&candidate) {
                tracing::warn!(
                    "Array output was truncated — recovered {} partial documents",
                    items.len()
                );
                return Ok(items);
            }
        }
        if let Some(Value::Array(items)) = recover_truncated(partial, true) {
            return Ok(items);
        }
    }

    Err(preview_of(&text))
}

/// Progressive-trim recovery: try closing brackets on the full text, then
/// on tails ending at each plausible structural terminator, newest first.
fn recover_truncated(partial: &str, want_array: bool) -> Option<Value> {
    if let Some(value) = try_bracket_completion(partial, want_array) {
        return Some(value);
    }

    let bytes = partial.as_bytes();
    let mut candidates = Vec::new();
    for i in (1..partial.len()).rev() {
        if !partial.is_char_boundary(i + 1) {
            continue;
        }
        let ch = bytes[i] as char;
        let tail = &partial[..=i];
        let is_terminator = matches!(ch, '}' | ']' | '"')
            || tail.ends_with("true")
            || tail.ends_with("false")
            || tail.ends_with("null");
        if is_terminator {
            candidates.push(i + 1);
        }
        if candidates.len() > 50 {
            break;
        }
    }

    for end in candidates {
        if let Some(value) = try_bracket_completion(&partial[..end], want_array) {
            tracing::warn!(
                "Output truncated — recovered by trimming {} chars from end",
                partial.len() - end
            );
            return Some(value);
        }
    }
    None
}

/// Close any open strings/arrays/objects on a cleaned tail and try to parse.
fn try_bracket_completion(text: &str, want_array: bool) -> Option<Value> {
    let mut cleaned = text.trim_end().to_string();

    if cleaned.ends_with(',') {
        cleaned.pop();
    }

    // Incomplete key with no value: back up to the previous safe point.
    if cleaned.ends_with(':') {
        let last_safe = [cleaned.rfind(','), cleaned.rfind('{'), cleaned.rfind('[')]
            .into_iter()
            .flatten()
            .max();
        if let Some(pos) = last_safe.filter(|p| *p > 0) {
            cleaned.truncate(pos + 1);
        }
    }

    // Track the open-delimiter stack so interleaved objects/arrays close
    // in the right order.
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    for ch in cleaned.chars() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    if in_string {
        cleaned.push('"');
    }
    if cleaned.ends_with(',') {
        cleaned.pop();
    }

    while let Some(close) = stack.pop() {
        cleaned.push(close);
    }

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(value @ Value::Object(_)) if !want_array => Some(value),
        Ok(value @ Value::Array(_)) if want_array => Some(value),
        _ => None,
    }
}

/// One sanitized document from the blueprint pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedDoc {
    pub name: String,
    pub content: String,
    pub scope: String,
}

/// Validate and name-sanitize the array-mode output. Entries without a name
/// or content are dropped; names are capped at 100 chars and restricted to
/// the allowed character set.
pub fn parse_refactor_output(text: &str) -> Result<Vec<SanitizedDoc>, ParseRecoveryError> {
    let items = parse_array_output(text)?;
    let mut docs = Vec::new();
    for item in items {
        let Some(obj) = item.as_object() else { continue };
        let mut name = obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        let content = obj
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if name.is_empty() || content.is_empty() {
            continue;
        }
        if name.chars().count() > 100 {
            name = crate::utils::truncate_chars(&name, 100).to_string();
        }
        if !NAME_RE.is_match(&name) {
            name = name
                .chars()
                .filter(|c| {
                    c.is_ascii_alphanumeric() || " _:#()-,".contains(*c)
                })
                .collect();
        }
        docs.push(SanitizedDoc {
            name,
            content,
            scope: obj
                .get("scope")
                .and_then(Value::as_str)
                .unwrap_or("org")
                .to_string(),
        });
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_and_fenced_objects_parse() {
        let direct = parse_object_output(r#"{"id": "root"}"#).unwrap();
        assert_eq!(direct["id"], "root");

        let fenced = parse_object_output("```json\n{\"id\": \"root\"}\n```").unwrap();
        assert_eq!(fenced["id"], "root");
    }

    #[test]
    fn object_is_extracted_from_prose() {
        let v = parse_object_output("Here is the tree:\n{\"id\": \"root\"}\nDone.").unwrap();
        assert_eq!(v["id"], "root");
    }

    #[test]
    fn truncated_mid_string_recovers() {
        // Cut mid-string inside a nested child, as a max_tokens stop would.
        let cut = r#"{"id":"root","children":[{"id":"a","name":"A","type":"cat","children":[{"id":"a1"#;
        let v = parse_object_output(cut).unwrap();
        assert_eq!(v["id"], "root");
        assert_eq!(v["children"][0]["name"], "A");
    }

    #[test]
    fn truncated_after_colon_recovers() {
        let cut = r#"{"id":"root","name":"R","children":[{"id":"a","name":"#;
        let v = parse_object_output(cut).unwrap();
        assert_eq!(v["id"], "root");
    }

    #[test]
    fn hopeless_text_errors_with_preview() {
        let err = parse_object_output("not json at all").unwrap_err();
        assert!(err.preview.contains("not json"));
    }

    #[test]
    fn array_truncation_salvages_complete_entries() {
        let cut = r#"[{"name": "Doc A", "content": "body a"}, {"name": "Doc B", "content": "bo"#;
        let docs = parse_refactor_output(cut).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "Doc A");
    }

    #[test]
    fn refactor_output_sanitizes_names() {
        let input = json!([
            {"name": "  Valid Name (v2) ", "content": "ok", "scope": "org"},
            {"name": "Bad/Name<with*junk>", "content": "ok"},
            {"name": "", "content": "dropped"},
            {"name": "No content", "content": ""},
        ])
        .to_string();
        let docs = parse_refactor_output(&input).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].name, "Valid Name (v2)");
        assert_eq!(docs[1].name, "BadNamewithjunk");
        assert_eq!(docs[1].scope, "org");
    }

    #[test]
    fn long_names_are_capped_at_100() {
        let input = json!([{"name": "x".repeat(150), "content": "ok"}]).to_string();
        let docs = parse_refactor_output(&input).unwrap();
        assert_eq!(docs[0].name.chars().count(), 100);
    }
}
