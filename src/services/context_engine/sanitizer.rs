//! Content sanitizer — optional blueprint-driven rewrite of leaf content.
//!
//! When enabled it replaces the raw content-attach step: all collected
//! contexts go through one LLM call governed by a user-configurable
//! blueprint, the output array is parsed with the same truncation recovery
//! as the tree, and sanitized content is attached by name match with the
//! original content as fallback.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::services::llm::{ChatMessage, LlmGateway, LlmRequest, Usage};
use crate::utils::cancel::Cancelled;
use crate::utils::CancelToken;

use super::collector::CollectedContext;
use super::node::TreeNode;
use super::parsing::{parse_refactor_output, SanitizedDoc};
use super::ProgressFn;

/// Default blueprint used when the caller supplies none.
pub const DEFAULT_BLUEPRINT: &str = r#"You are a context librarian. Restructure each context document into clean,
well-organized markdown:

- Lead with a 1-2 sentence purpose statement.
- Use ## section headings; keep tables and code blocks intact.
- Remove duplicated boilerplate, broken formatting, and dead links.
- Preserve every rule, definition, SQL template, and configuration example
  exactly — compress prose, never facts.
- Keep each document self-contained."#;

pub fn build_sanitize_message(
    contexts: &[CollectedContext],
    max_output_tokens: u32,
    max_payload_chars: usize,
) -> String {
    let budget_per_file = max_output_tokens as usize / contexts.len().max(1);
    let mut parts = vec![format!(
        "Below are ALL the context documents for this organization. \
         Please restructure them according to the blueprint instructions.\n\n\
         IMPORTANT: You have a total output budget of ~{} tokens. \
         There are {} context document(s), so aim for ~{} tokens per document. \
         Be concise — compress and restructure without losing critical information.\n\n\
         Return your response as a JSON array where each element has:\n\
         - \"name\": the context document name (max 100 chars, only alphanumeric, spaces, _:#()-,)\n\
         - \"content\": the restructured context content in markdown\n\n\
         Respond ONLY with the JSON array, no additional text before or after it.\n\n---\n\n",
        max_output_tokens,
        contexts.len(),
        budget_per_file
    )];

    for (i, ctx) in contexts.iter().enumerate() {
        parts.push(format!("### Context Document {}: {}\n", i + 1, ctx.name));
        parts.push(format!("Source: {} | Scope: {}\n", ctx.source, ctx.scope));
        parts.push(format!("Content:\n{}\n\n---\n\n", ctx.content));
    }

    let message = parts.concat();
    crate::utils::truncate_chars(&message, max_payload_chars).to_string()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SanitizeOutcome {
    pub sanitized_count: usize,
    pub fallback_count: usize,
    pub total_leaves: usize,
    #[serde(skip)]
    pub token_usage: Usage,
}

/// Attach sanitized content by leaf-name match, falling back to the
/// original content map (doc-key then name) when no sanitized doc matches.
pub fn attach_sanitized_content(
    tree: &mut TreeNode,
    sanitized: &[SanitizedDoc],
    contexts: &[CollectedContext],
) -> SanitizeOutcome {
    let sanitized_map: HashMap<String, &str> = sanitized
        .iter()
        .filter(|doc| !doc.name.is_empty())
        .map(|doc| (doc.name.to_lowercase().trim().to_string(), doc.content.as_str()))
        .collect();

    let mut original_map: HashMap<String, &str> = HashMap::new();
    for ctx in contexts {
        if ctx.content.is_empty() {
            continue;
        }
        if let Some(doc_key) = &ctx.doc_key {
            original_map.insert(doc_key.to_lowercase().trim().to_string(), &ctx.content);
        }
        original_map.insert(ctx.name.to_lowercase().trim().to_string(), &ctx.content);
    }

    let mut outcome = SanitizeOutcome::default();
    attach_walk(tree, &sanitized_map, &original_map, &mut outcome);
    outcome
}

fn attach_walk(
    node: &mut TreeNode,
    sanitized_map: &HashMap<String, &str>,
    original_map: &HashMap<String, &str>,
    outcome: &mut SanitizeOutcome,
) {
    if let TreeNode::Leaf { meta, desc, source_doc_key, .. } = node {
        outcome.total_leaves += 1;
        let leaf_name = meta.name.to_lowercase().trim().to_string();
        if let Some(content) = sanitized_map.get(&leaf_name) {
            *desc = content.to_string();
            outcome.sanitized_count += 1;
        } else {
            let leaf_key = source_doc_key.to_lowercase().trim().to_string();
            if let Some(original) =
                original_map.get(&leaf_key).or_else(|| original_map.get(&leaf_name))
            {
                *desc = original.to_string();
            }
            outcome.fallback_count += 1;
        }
        return;
    }
    if let Some(children) = node.children_mut() {
        for child in children {
            attach_walk(child, sanitized_map, original_map, outcome);
        }
    }
}

/// Run the blueprint sanitization pass over the tree.
#[allow(clippy::too_many_arguments)]
pub async fn sanitize_tree_content(
    gateway: &LlmGateway,
    tree: &mut TreeNode,
    contexts: &[CollectedContext],
    blueprint: Option<&str>,
    provider: &str,
    model: &str,
    max_output_tokens: u32,
    max_payload_chars: usize,
    cancel: Option<Arc<CancelToken>>,
    on_progress: Option<ProgressFn<'_>>,
) -> anyhow::Result<SanitizeOutcome> {
    let emit = |detail: &str| {
        if let Some(progress) = on_progress {
            progress("sanitizing", 0, 0, detail);
        }
    };

    let system_prompt = blueprint
        .filter(|text| !text.trim().is_empty())
        .unwrap_or(DEFAULT_BLUEPRINT);
    let user_content = build_sanitize_message(contexts, max_output_tokens, max_payload_chars);

    emit(&format!("Sending {} contexts to LLM for sanitization...", contexts.len()));

    let request = LlmRequest::new(
        provider,
        model,
        system_prompt,
        vec![ChatMessage::user(user_content)],
        max_output_tokens,
    );
    let mut chars_emitted = 0usize;
    let (full_output, token_usage, stop_reason) = gateway
        .stream_text(request, cancel, |chunk| {
            chars_emitted += chunk.len();
            if chars_emitted >= 3000 {
                chars_emitted = 0;
            }
        })
        .await
        .map_err(|e| anyhow::anyhow!("Sanitization LLM call failed: {}", e))?;

    if stop_reason.as_deref() == Some("cancelled") {
        return Err(Cancelled.into());
    }
    if matches!(stop_reason.as_deref(), Some("max_tokens") | Some("length")) {
        tracing::warn!(
            "Sanitization LLM response was truncated at {} chars",
            full_output.len()
        );
        emit("Response was truncated — recovering partial results...");
    }
    if full_output.trim().is_empty() {
        anyhow::bail!("LLM returned empty response for sanitization");
    }

    emit("Parsing sanitized content...");
    let sanitized = parse_refactor_output(&full_output)
        .map_err(|e| anyhow::anyhow!("Sanitization output unparseable: {}", e))?;
    if sanitized.is_empty() {
        anyhow::bail!("LLM returned no parseable documents for sanitization");
    }
    tracing::info!("Sanitization produced {} documents", sanitized.len());

    emit(&format!("Attaching {} sanitized documents to tree leaves...", sanitized.len()));
    let mut outcome = attach_sanitized_content(tree, &sanitized, contexts);
    outcome.token_usage = token_usage;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::context_engine::node::{NodeAnalysis, NodeMeta};

    fn leaf(name: &str, key: &str) -> TreeNode {
        TreeNode::Leaf {
            meta: NodeMeta { id: name.to_lowercase(), name: name.into(), ..Default::default() },
            desc: "summary".into(),
            source: "databricks".into(),
            source_doc_key: key.into(),
            secret_refs: vec![],
            analysis: NodeAnalysis::default(),
        }
    }

    fn ctx(name: &str, key: Option<&str>, content: &str) -> CollectedContext {
        CollectedContext {
            source: "databricks".into(),
            doc_id: None,
            context_id: None,
            name: name.into(),
            doc_key: key.map(String::from),
            content: content.into(),
            scope: "org".into(),
        }
    }

    #[test]
    fn sanitized_wins_with_fallback_to_original() {
        let mut tree = TreeNode::Root {
            meta: NodeMeta { id: "root".into(), name: "Organization Context".into(), ..Default::default() },
            children: vec![leaf("Master Rules", "01_MASTER"), leaf("Unmatched", "99_NONE")],
        };
        let sanitized = vec![SanitizedDoc {
            name: "Master Rules".into(),
            content: "CLEANED".into(),
            scope: "org".into(),
        }];
        let contexts = vec![
            ctx("Master Rules", Some("01_MASTER"), "ORIGINAL RULES"),
            ctx("Unmatched", Some("99_NONE"), "ORIGINAL OTHER"),
        ];

        let outcome = attach_sanitized_content(&mut tree, &sanitized, &contexts);
        assert_eq!(outcome.total_leaves, 2);
        assert_eq!(outcome.sanitized_count, 1);
        assert_eq!(outcome.fallback_count, 1);

        match &tree.children()[0] {
            TreeNode::Leaf { desc, .. } => assert_eq!(desc, "CLEANED"),
            _ => panic!(),
        }
        match &tree.children()[1] {
            TreeNode::Leaf { desc, .. } => assert_eq!(desc, "ORIGINAL OTHER"),
            _ => panic!(),
        }
    }

    #[test]
    fn message_carries_per_document_budget() {
        let contexts = vec![
            ctx("A", None, "aaa"),
            ctx("B", None, "bbb"),
        ];
        let message = build_sanitize_message(&contexts, 64000, 200_000);
        assert!(message.contains("~32000 tokens per document"));
        assert!(message.contains("### Context Document 2: B"));
    }
}
