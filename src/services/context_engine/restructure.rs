//! Restructure proposer — LLM-assisted structural change over selected
//! nodes with a before/after health comparison. Proposals require explicit
//! apply to persist.

use serde::Serialize;
use serde_json::Value;

use crate::services::llm::{ChatMessage, LlmGateway, LlmRequest};
use crate::utils::truncate_chars;

use super::health::score_tree_health;
use super::node::TreeNode;
use super::parsing::parse_object_output;
use super::tree_builder::validate_tree_value;

const RESTRUCTURE_SYSTEM: &str = "You are a context tree restructuring expert. Given a set of tree nodes \
and an instruction, propose a restructured version.\n\n\
Rules:\n\
- Preserve all content (desc fields) — do NOT lose any information\n\
- Maintain valid tree structure (root > cat > leaf)\n\
- Improve health scores by reducing redundancy and conflicts\n\
- Keep node IDs stable where possible (rename only when merging)\n\n\
Return ONLY a JSON object with these fields:\n\
{\n\
  \"before\": \"brief description of current state\",\n\
  \"after\": \"brief description of proposed changes\",\n\
  \"nodes\": [... array of restructured nodes ...]\n\
}\n\n\
No markdown, no code fences. Just the JSON.";

/// How much of the serialized tree accompanies the request as context.
const TREE_CONTEXT_CHARS: usize = 5000;

#[derive(Debug, Clone, Serialize)]
pub struct RestructureProposal {
    pub before: String,
    pub after: String,
    pub new_tree: TreeNode,
    pub health_before: i64,
    pub health_after: i64,
    pub health_impact: String,
    pub needs_approval: bool,
}

/// Propose a restructure of the selected nodes. The returned tree has the
/// selected nodes removed and the proposed nodes inserted under the parent
/// of the first selected node (or the root).
pub async fn propose_restructure(
    gateway: &LlmGateway,
    tree: &TreeNode,
    node_ids: &[String],
    instruction: &str,
    provider: &str,
    model: &str,
) -> anyhow::Result<RestructureProposal> {
    let target_nodes: Vec<&TreeNode> =
        node_ids.iter().filter_map(|id| tree.find(id)).collect();
    if target_nodes.is_empty() {
        anyhow::bail!("No valid nodes found for the given IDs");
    }

    // Current whole-tree health on a scratch copy.
    let mut scored = tree.clone();
    score_tree_health(&mut scored);
    let health_before = scored.meta().health;

    let node_descriptions: Vec<String> = target_nodes
        .iter()
        .map(|node| {
            format!(
                "--- Node: {} (id: {}) ---\n{}",
                node.name(),
                node.id(),
                serde_json::to_string_pretty(node).unwrap_or_default()
            )
        })
        .collect();
    let tree_json = serde_json::to_string_pretty(tree).unwrap_or_default();
    let user_msg = format!(
        "Instruction: {}\n\nFull tree structure (for context):\n{}\n\nTarget nodes to restructure:\n\n{}",
        instruction,
        truncate_chars(&tree_json, TREE_CONTEXT_CHARS),
        node_descriptions.join("\n\n")
    );

    let request = LlmRequest::new(
        provider,
        model,
        RESTRUCTURE_SYSTEM,
        vec![ChatMessage::user(user_msg)],
        4000,
    );
    let response = gateway
        .call(&request)
        .await
        .map_err(|e| anyhow::anyhow!("Restructure proposal failed: {}", e))?;

    let proposal = parse_object_output(&response.text())
        .map_err(|e| anyhow::anyhow!("Failed to parse restructure proposal: {}", e))?;
    let proposed_nodes = proposal["nodes"].as_array().cloned().unwrap_or_default();

    let new_tree = apply_proposed_nodes(tree, node_ids, proposed_nodes)?;
    let mut new_tree = new_tree;
    score_tree_health(&mut new_tree);
    let health_after = new_tree.meta().health;
    let delta = health_after - health_before;

    Ok(RestructureProposal {
        before: proposal["before"]
            .as_str()
            .unwrap_or("Current structure")
            .to_string(),
        after: proposal["after"]
            .as_str()
            .unwrap_or("Proposed structure")
            .to_string(),
        new_tree,
        health_before,
        health_after,
        health_impact: if delta >= 0 { format!("+{}", delta) } else { delta.to_string() },
        needs_approval: true,
    })
}

/// Deep-copy the tree, remove the selected nodes, insert the proposed
/// nodes under the first selected node's parent (falling back to root).
pub fn apply_proposed_nodes(
    tree: &TreeNode,
    node_ids: &[String],
    proposed: Vec<Value>,
) -> anyhow::Result<TreeNode> {
    let parent_id = node_ids
        .first()
        .and_then(|id| tree.find_parent_id(id))
        .unwrap_or_else(|| tree.id().to_string());

    let mut new_tree = tree.clone();
    for id in node_ids {
        new_tree.remove(id);
    }

    if !proposed.is_empty() {
        let mut typed_nodes = Vec::new();
        for (i, raw) in proposed.into_iter().enumerate() {
            // Proposed nodes come back from the model; run them through the
            // default-filling validator before typing.
            let mut wrapper = serde_json::json!({"children": [raw]});
            wrapper = validate_tree_value(wrapper);
            let child = wrapper["children"][0].clone();
            let node: TreeNode = serde_json::from_value(child)
                .map_err(|e| anyhow::anyhow!("Proposed node {} is invalid: {}", i, e))?;
            typed_nodes.push(node);
        }

        let insert_target = new_tree
            .find_mut(&parent_id)
            .and_then(TreeNode::children_mut);
        match insert_target {
            Some(children) => children.extend(typed_nodes),
            None => {
                if let Some(children) = new_tree.children_mut() {
                    children.extend(typed_nodes);
                }
            }
        }
    }

    Ok(new_tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::context_engine::node::{NodeAnalysis, NodeMeta};
    use serde_json::json;

    fn fixture() -> TreeNode {
        let leaf = |id: &str| TreeNode::Leaf {
            meta: NodeMeta { id: id.into(), name: id.to_uppercase(), ..Default::default() },
            desc: "d".repeat(600),
            source: String::new(),
            source_doc_key: String::new(),
            secret_refs: vec![],
            analysis: NodeAnalysis::default(),
        };
        TreeNode::Root {
            meta: NodeMeta { id: "root".into(), name: "Organization Context".into(), ..Default::default() },
            children: vec![TreeNode::Category {
                meta: NodeMeta { id: "cat".into(), name: "Category".into(), ..Default::default() },
                secrets: vec![],
                children: vec![leaf("a"), leaf("b")],
            }],
        }
    }

    #[test]
    fn proposed_nodes_replace_selected_under_same_parent() {
        let tree = fixture();
        let merged = json!({
            "id": "merged", "name": "Merged", "type": "leaf",
            "desc": "combined content", "source": "databricks",
        });
        let new_tree = apply_proposed_nodes(
            &tree,
            &["a".to_string(), "b".to_string()],
            vec![merged],
        )
        .unwrap();

        assert!(new_tree.find("a").is_none());
        assert!(new_tree.find("b").is_none());
        assert!(new_tree.find("merged").is_some());
        assert_eq!(new_tree.find_parent_id("merged").as_deref(), Some("cat"));
    }

    #[test]
    fn unknown_parent_falls_back_to_root() {
        let tree = fixture();
        let node = json!({"id": "n1", "name": "N1", "type": "cat", "children": []});
        let new_tree =
            apply_proposed_nodes(&tree, &["missing".to_string()], vec![node]).unwrap();
        assert_eq!(new_tree.find_parent_id("n1").as_deref(), Some("root"));
    }
}
