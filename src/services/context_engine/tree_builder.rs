//! Tree builder — asks the LLM to organize all collected contexts into a
//! hierarchical tree, parses the (possibly truncated) JSON, validates it
//! with defaults, and re-attaches the original full content to each leaf.
//!
//! The LLM writes only short summaries in leaf `desc` fields, which keeps
//! its output small; full content is attached after parsing by matching
//! `source_doc_key`, then name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::services::llm::{ChatMessage, LlmGateway, LlmRequest, Usage};
use crate::utils::cancel::Cancelled;
use crate::utils::CancelToken;

use super::collector::CollectedContext;
use super::node::TreeNode;
use super::parsing::parse_object_output;
use super::ProgressFn;

pub const TREE_SYSTEM_PROMPT: &str = r#"You are a context organization expert. You will receive ALL context documents for an organization. Your job is to analyze them and organize them into a hierarchical tree structure.

## Tree Structure Rules:
- Root node: "Organization Context" (type: "root", id: "root")
- Categories: Logical groupings (type: "cat") — e.g. "Analytics & SQL", "Loyalty & Rewards", "Campaigns & Messaging"
- Leaf nodes: Individual context items (type: "leaf")

## For each node you must provide:
- id: unique snake_case identifier (e.g. "analytics_sql", "loyalty_master_rules")
- name: human-readable display name
- type: "root" | "cat" | "leaf"
- health: 0-100 score based on content quality, freshness, redundancy
- visibility: "public" (general use) | "private" (contains sensitive data like API keys, test data)
- children: array of child nodes (for root and cat types)

## For leaf nodes additionally provide:
- desc: A concise summary of the context content (2-3 sentences describing what this context covers and its key rules). Do NOT copy the full original text — the system will attach full content automatically after parsing.
- source: which pipeline generated it — MUST match the Source from the input exactly
- source_doc_key: original doc key if from a pipeline — MUST match the Key from the input exactly. If no Key was provided, use the Name instead.

## For category nodes additionally provide:
- secrets: array of detected secrets [{key, scope, type}] if any child contains credential references (e.g. API keys, Bearer tokens, passwords)

## Health Scoring Guidelines:
- 90-100: Fresh, well-written, no redundancy, actively useful
- 70-89: Good but may have minor overlap or slightly stale
- 50-69: Significant redundancy, partial overlap with other nodes, or outdated
- Below 50: Conflicting with other nodes, very stale, or mostly redundant

## Analysis Checks:
For EACH leaf node, also include an "analysis" field:
{
    "redundancy": {"score": 0-100, "overlaps_with": ["node_id_1"], "detail": "..."},
    "conflicts": [{"with_node": "node_id", "description": "...", "severity": "low|medium|high"}],
    "suggestions": ["potential improvement or restructure suggestion"]
}

## Secret Detection:
If any leaf content contains credentials (Bearer tokens, API keys, passwords, auth headers), detect them and:
1. List them in the parent category's "secrets" array as: {"key": "{{KEY_NAME}}", "scope": "category_name", "type": "Basic Auth|API Key|Token|Password"}
2. Add a "secretRefs" array to the leaf node referencing the key names: ["{{KEY_NAME}}"]
3. Set the leaf's visibility to "private"

## Output Format:
Return ONLY valid JSON — the tree object. No markdown code fences, no explanation, no text before or after the JSON. Start with { and end with }."#;

pub fn build_user_message(contexts: &[CollectedContext], org_id: &str) -> String {
    let mut parts = vec![format!(
        "Here are {} context documents for organization {}.\n\
         Organize them into a tree structure following the system prompt instructions.\n\n",
        contexts.len(),
        org_id
    )];
    for ctx in contexts {
        parts.push("---\n".to_string());
        parts.push(format!("Source: {} | Name: {}", ctx.source, ctx.name));
        if let Some(doc_key) = &ctx.doc_key {
            parts.push(format!(" | Key: {}", doc_key));
        }
        parts.push(format!("\n{}\n\n", ctx.content));
    }
    parts.concat()
}

// -- validation with defaults --

/// Fill missing required fields on the raw parsed value so typed
/// deserialization always succeeds on whatever the recovery salvaged.
pub fn validate_tree_value(mut value: Value) -> Value {
    let obj = value.as_object_mut().expect("validated object");
    obj.entry("id").or_insert_with(|| Value::from("root"));
    obj.entry("name").or_insert_with(|| Value::from("Organization Context"));
    obj.insert("type".to_string(), Value::from("root"));
    obj.entry("health").or_insert_with(|| Value::from(0));
    obj.entry("visibility").or_insert_with(|| Value::from("public"));
    obj.entry("children").or_insert_with(|| Value::Array(Vec::new()));

    let mut counter = 0usize;
    if let Some(children) = obj.get_mut("children").and_then(Value::as_array_mut) {
        for child in children {
            validate_node_value(child, 1, &mut counter);
        }
    }

    // Aggregate root health when the model left it unset.
    if value["health"].as_i64() == Some(0) {
        let aggregate = aggregate_health(&value);
        value["health"] = Value::from(aggregate);
    }
    value
}

fn validate_node_value(node: &mut Value, depth: usize, counter: &mut usize) {
    let Some(obj) = node.as_object_mut() else { return };
    *counter += 1;
    if !obj.contains_key("id") {
        obj.insert("id".to_string(), Value::from(format!("node_{}_{}", depth, counter)));
    }
    obj.entry("name").or_insert_with(|| Value::from("Unnamed"));
    let default_type = if depth > 1 { "leaf" } else { "cat" };
    let node_type = obj
        .get("type")
        .and_then(Value::as_str)
        .filter(|t| matches!(*t, "root" | "cat" | "leaf"))
        .unwrap_or(default_type)
        .to_string();
    obj.insert("type".to_string(), Value::from(node_type.clone()));
    if !obj.get("health").is_some_and(Value::is_i64) {
        obj.insert("health".to_string(), Value::from(70));
    }
    let visibility = obj
        .get("visibility")
        .and_then(Value::as_str)
        .filter(|v| matches!(*v, "public" | "private"))
        .unwrap_or("public")
        .to_string();
    obj.insert("visibility".to_string(), Value::from(visibility));

    if node_type == "leaf" {
        obj.remove("children");
        obj.entry("desc").or_insert_with(|| Value::from(""));
        obj.entry("source").or_insert_with(|| Value::from(""));
        obj.entry("source_doc_key").or_insert_with(|| Value::from(""));
        obj.entry("secretRefs").or_insert_with(|| Value::Array(Vec::new()));
        return;
    }

    obj.entry("children").or_insert_with(|| Value::Array(Vec::new()));
    if let Some(children) = obj.get_mut("children").and_then(Value::as_array_mut) {
        for child in children {
            validate_node_value(child, depth + 1, counter);
        }
    }
}

fn aggregate_health(node: &Value) -> i64 {
    let children = node["children"].as_array();
    match children {
        Some(children) if !children.is_empty() => {
            let total: i64 = children
                .iter()
                .map(|child| {
                    if child["children"].as_array().is_some_and(|c| !c.is_empty()) {
                        aggregate_health(child)
                    } else {
                        child["health"].as_i64().unwrap_or(70)
                    }
                })
                .sum();
            ((total as f64) / children.len() as f64).round() as i64
        }
        _ => node["health"].as_i64().unwrap_or(70),
    }
}

// -- content attach --

/// Replace LLM summaries with the original full content, matching by
/// source_doc_key first, then name (case-insensitive). Returns the number
/// of leaves attached.
pub fn attach_full_content(tree: &mut TreeNode, contexts: &[CollectedContext]) -> usize {
    let mut content_map: HashMap<String, &str> = HashMap::new();
    for ctx in contexts {
        if ctx.content.is_empty() {
            continue;
        }
        if let Some(doc_key) = &ctx.doc_key {
            content_map.insert(doc_key.to_lowercase().trim().to_string(), &ctx.content);
        }
        content_map.insert(ctx.name.to_lowercase().trim().to_string(), &ctx.content);
    }
    let attached = walk_and_attach(tree, &content_map);
    tracing::info!("Attached full content to {} leaf nodes", attached);
    attached
}

fn walk_and_attach(node: &mut TreeNode, content_map: &HashMap<String, &str>) -> usize {
    let mut count = 0;
    if let TreeNode::Leaf { meta, desc, source_doc_key, .. } = node {
        let by_key = content_map
            .get(&source_doc_key.to_lowercase().trim().to_string())
            .copied();
        let by_name = content_map
            .get(&meta.name.to_lowercase().trim().to_string())
            .copied();
        if let Some(full) = by_key.or(by_name) {
            *desc = full.to_string();
            count += 1;
        }
        return count;
    }
    if let Some(children) = node.children_mut() {
        for child in children {
            count += walk_and_attach(child, content_map);
        }
    }
    count
}

// -- main builder --

#[derive(Debug, Clone)]
pub struct TreeBuildResult {
    pub tree: TreeNode,
    pub model_used: String,
    pub provider_used: String,
    pub token_usage: Usage,
    pub system_prompt_used: String,
    pub was_truncated: bool,
}

const TREE_MAX_TOKENS: u32 = 16_000;
const MAX_RETRIES: u32 = 2;

/// Stream the tree out of the LLM with retry on transient server errors,
/// parse with truncation recovery, validate, and (unless the sanitizer
/// takes over) attach full content.
#[allow(clippy::too_many_arguments)]
pub async fn build_tree(
    gateway: &LlmGateway,
    contexts: &[CollectedContext],
    org_id: &str,
    provider: &str,
    model: &str,
    cancel: Option<Arc<CancelToken>>,
    skip_content_attach: bool,
    on_progress: Option<ProgressFn<'_>>,
) -> anyhow::Result<TreeBuildResult> {
    let emit = |phase: &str, detail: &str| {
        if let Some(progress) = on_progress {
            progress(phase, 0, 0, detail);
        }
    };

    emit("analyzing", &format!("Sending {} contexts to LLM...", contexts.len()));
    let user_message = build_user_message(contexts, org_id);

    let mut full_output = String::new();
    let mut token_usage = Usage::default();
    let mut was_truncated = false;

    for attempt in 0..=MAX_RETRIES {
        let request = LlmRequest::new(
            provider,
            model,
            TREE_SYSTEM_PROMPT,
            vec![ChatMessage::user(user_message.clone())],
            TREE_MAX_TOKENS,
        );

        let mut chars_emitted = 0usize;
        let stream_result = gateway
            .stream_text(request, cancel.clone(), |chunk| {
                chars_emitted += chunk.len();
                if chars_emitted >= 2000 {
                    chars_emitted = 0;
                    emit("analyzing", "Building tree structure...");
                }
            })
            .await;

        match stream_result {
            Ok((text, usage, stop_reason)) => {
                if stop_reason.as_deref() == Some("cancelled") {
                    return Err(Cancelled.into());
                }
                if matches!(stop_reason.as_deref(), Some("max_tokens") | Some("length")) {
                    was_truncated = true;
                    tracing::warn!(
                        "Tree generation truncated at max_tokens={} ({} chars collected)",
                        TREE_MAX_TOKENS,
                        text.len()
                    );
                    emit("analyzing", "Response was truncated — attempting recovery...");
                }
                full_output = text;
                token_usage = usage;
                break;
            }
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                let wait = Duration::from_secs(3 * (attempt as u64 + 1));
                tracing::warn!(
                    "LLM API error (attempt {}/{}), retrying in {:?}: {}",
                    attempt + 1,
                    MAX_RETRIES + 1,
                    wait,
                    e
                );
                emit("analyzing", &format!("API error — retrying in {}s...", wait.as_secs()));
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(anyhow::anyhow!("LLM tree generation failed: {}", e)),
        }
    }

    if full_output.trim().is_empty() {
        anyhow::bail!("LLM returned empty response for tree generation");
    }

    emit("validating", "Parsing tree structure...");
    let parsed = parse_object_output(&full_output)
        .map_err(|e| anyhow::anyhow!("Failed to parse tree output: {}", e))?;
    let validated = validate_tree_value(parsed);
    let mut tree: TreeNode = serde_json::from_value(validated)?;

    if was_truncated {
        emit("validating", "Tree recovered from truncated response (some nodes may be missing)");
    } else {
        emit("validating", "Tree structure validated");
    }

    if !skip_content_attach {
        emit("validating", "Attaching full context content to leaves...");
        attach_full_content(&mut tree, contexts);
        emit("validating", "Full content attached");
    } else {
        emit("validating", "Skipping content attach (sanitization will handle it)");
    }

    Ok(TreeBuildResult {
        tree,
        model_used: model.to_string(),
        provider_used: provider.to_string(),
        token_usage,
        system_prompt_used: TREE_SYSTEM_PROMPT.to_string(),
        was_truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(name: &str, doc_key: Option<&str>, content: &str) -> CollectedContext {
        CollectedContext {
            source: "databricks".to_string(),
            doc_id: Some(1),
            context_id: None,
            name: name.to_string(),
            doc_key: doc_key.map(String::from),
            content: content.to_string(),
            scope: "org".to_string(),
        }
    }

    #[test]
    fn user_message_carries_source_and_key_markers() {
        let message = build_user_message(&[ctx("Master Rules", Some("01_MASTER"), "body")], "42");
        assert!(message.contains("Source: databricks | Name: Master Rules | Key: 01_MASTER"));
        assert!(message.contains("organization 42"));
    }

    #[test]
    fn validator_fills_defaults_and_types_by_depth() {
        let raw = serde_json::json!({
            "children": [
                {"name": "Domain", "children": [{"id": "x1"}]},
            ],
        });
        let validated = validate_tree_value(raw);
        assert_eq!(validated["id"], "root");
        assert_eq!(validated["type"], "root");
        assert_eq!(validated["children"][0]["type"], "cat");
        assert_eq!(validated["children"][0]["children"][0]["type"], "leaf");
        assert_eq!(validated["children"][0]["children"][0]["health"], 70);

        // The result deserializes into the typed tree.
        let tree: TreeNode = serde_json::from_value(validated).unwrap();
        assert_eq!(tree.children()[0].children()[0].id(), "x1");
    }

    #[test]
    fn truncated_builder_output_recovers_into_a_tree() {
        // The exact truncation shape from a max_tokens stop mid-string.
        let cut = r#"{"id":"root","children":[{"id":"a","name":"A","type":"cat","children":[{"id":"a1"#;
        let parsed = super::super::parsing::parse_object_output(cut).unwrap();
        let validated = validate_tree_value(parsed);
        let tree: TreeNode = serde_json::from_value(validated).unwrap();
        assert_eq!(tree.id(), "root");
        let cat = &tree.children()[0];
        assert_eq!(cat.name(), "A");
        assert_eq!(cat.children()[0].id(), "a1");
    }

    #[test]
    fn content_attach_prefers_doc_key_over_name() {
        let contexts = vec![
            ctx("Schema Reference", Some("02_SCHEMA"), "FULL SCHEMA CONTENT"),
            ctx("Other", None, "OTHER CONTENT"),
        ];
        let raw = serde_json::json!({
            "id": "root", "name": "Organization Context", "type": "root",
            "children": [{
                "id": "cat1", "name": "Analytics", "type": "cat",
                "children": [
                    {"id": "l1", "name": "Schema docs", "type": "leaf",
                     "desc": "summary", "source": "databricks", "source_doc_key": "02_SCHEMA"},
                    {"id": "l2", "name": "Other", "type": "leaf",
                     "desc": "summary", "source": "platform", "source_doc_key": ""},
                ],
            }],
        });
        let mut tree: TreeNode =
            serde_json::from_value(validate_tree_value(raw)).unwrap();
        let attached = attach_full_content(&mut tree, &contexts);
        assert_eq!(attached, 2);
        match &tree.children()[0].children()[0] {
            TreeNode::Leaf { desc, .. } => assert_eq!(desc, "FULL SCHEMA CONTENT"),
            _ => panic!(),
        }
        match &tree.children()[0].children()[1] {
            TreeNode::Leaf { desc, .. } => assert_eq!(desc, "OTHER CONTENT"),
            _ => panic!(),
        }
    }
}
