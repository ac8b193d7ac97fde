//! Conflict detector — one LLM call over up to 20 leaf pairs; reported
//! conflicts are mirrored into both leaves' analyses.

use serde_json::Value;

use crate::services::llm::{ChatMessage, LlmGateway, LlmRequest};
use crate::utils::truncate_chars;

use super::node::{Conflict, Severity, TreeNode};

pub const MAX_PAIRS: usize = 20;

const RULE_KEYWORDS: [&str; 7] = ["rule", "rules", "default", "always", "never", "must", "should"];

#[derive(Debug, Clone)]
struct LeafInfo {
    id: String,
    name: String,
    desc: String,
    category: String,
}

fn collect_leaves(node: &TreeNode, category: &str, out: &mut Vec<LeafInfo>) {
    let category = if matches!(node, TreeNode::Category { .. }) {
        node.name().to_string()
    } else {
        category.to_string()
    };
    if let TreeNode::Leaf { meta, desc, .. } = node {
        out.push(LeafInfo {
            id: meta.id.clone(),
            name: meta.name.clone(),
            desc: desc.clone(),
            category,
        });
        return;
    }
    for child in node.children() {
        collect_leaves(child, &category, out);
    }
}

fn is_rule_like(leaf: &LeafInfo) -> bool {
    let name = leaf.name.to_lowercase();
    let head = truncate_chars(&leaf.desc, 200).to_lowercase();
    RULE_KEYWORDS.iter().any(|kw| name.contains(kw) || head.contains(kw))
}

/// Build up to `MAX_PAIRS` comparison pairs: all within-category pairs,
/// then cross-category pairs where both leaves look rule-like.
fn build_comparison_pairs(leaves: &[LeafInfo]) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(usize, usize)> = Vec::new();

    // Within-category pairs.
    for i in 0..leaves.len() {
        for j in (i + 1)..leaves.len() {
            if leaves[i].category == leaves[j].category {
                if pairs.len() >= MAX_PAIRS {
                    return pairs;
                }
                pairs.push((i, j));
            }
        }
    }

    // Cross-category pairs for rule-like leaves.
    let rule_indices: Vec<usize> = leaves
        .iter()
        .enumerate()
        .filter(|(_, l)| is_rule_like(l))
        .map(|(i, _)| i)
        .collect();
    for (a, &i) in rule_indices.iter().enumerate() {
        for &j in &rule_indices[a + 1..] {
            if leaves[i].category != leaves[j].category && !pairs.contains(&(i, j)) {
                if pairs.len() >= MAX_PAIRS {
                    return pairs;
                }
                pairs.push((i, j));
            }
        }
    }

    pairs
}

const CONFLICT_SYSTEM: &str = "You are a conflict detection expert. Analyze each pair of context \
nodes and identify if they contain contradicting rules or instructions.\n\n\
For each pair, respond with ONLY:\n\
- 'NONE' if no conflict\n\
- A JSON object if conflict found: \
{\"pair\": N, \"severity\": \"low|medium|high\", \"description\": \"what contradicts\"}\n\n\
One response per pair, separated by newlines.";

fn parse_severity(s: &str) -> Severity {
    match s {
        "high" => Severity::High,
        "medium" => Severity::Medium,
        _ => Severity::Low,
    }
}

fn add_conflict(tree: &mut TreeNode, a: &str, b: &str, description: &str, severity: Severity) {
    for (this_id, other_id) in [(a, b), (b, a)] {
        if let Some(TreeNode::Leaf { analysis, .. }) = tree.find_mut(this_id) {
            analysis.conflicts.push(Conflict {
                with_node: other_id.to_string(),
                description: description.to_string(),
                severity,
            });
        }
    }
}

/// Detect contradictions between leaf pairs with one LLM call. Returns the
/// number of conflicts recorded; failures are logged, never fatal.
pub async fn detect_conflicts(
    gateway: &LlmGateway,
    tree: &mut TreeNode,
    provider: &str,
    model: &str,
) -> usize {
    let mut leaves = Vec::new();
    collect_leaves(tree, "", &mut leaves);
    if leaves.len() < 2 {
        return 0;
    }

    let pairs = build_comparison_pairs(&leaves);
    if pairs.is_empty() {
        return 0;
    }

    let descriptions: Vec<String> = pairs
        .iter()
        .enumerate()
        .map(|(idx, (i, j))| {
            format!(
                "PAIR {}:\n  Node A: [{}] {} — {}\n  Node B: [{}] {} — {}",
                idx + 1,
                leaves[*i].id,
                leaves[*i].name,
                truncate_chars(&leaves[*i].desc, 300),
                leaves[*j].id,
                leaves[*j].name,
                truncate_chars(&leaves[*j].desc, 300),
            )
        })
        .collect();
    let user_msg = format!("Check these pairs for conflicts:\n\n{}", descriptions.join("\n\n"));

    let request =
        LlmRequest::new(provider, model, CONFLICT_SYSTEM, vec![ChatMessage::user(user_msg)], 2000);
    let response = match gateway.call(&request).await {
        Ok(response) => response.text(),
        Err(e) => {
            tracing::warn!("Conflict detection failed (non-fatal): {}", e);
            return 0;
        }
    };

    let mut count = 0;
    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() || line.eq_ignore_ascii_case("none") {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else { continue };
        let Some(pair_num) = value["pair"].as_u64() else { continue };
        let idx = (pair_num as usize).wrapping_sub(1);
        if let Some((i, j)) = pairs.get(idx) {
            add_conflict(
                tree,
                &leaves[*i].id.clone(),
                &leaves[*j].id.clone(),
                value["description"].as_str().unwrap_or_default(),
                parse_severity(value["severity"].as_str().unwrap_or("low")),
            );
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::context_engine::node::{NodeAnalysis, NodeMeta};

    fn leaf(id: &str, name: &str, desc: &str) -> TreeNode {
        TreeNode::Leaf {
            meta: NodeMeta { id: id.into(), name: name.into(), ..Default::default() },
            desc: desc.into(),
            source: String::new(),
            source_doc_key: String::new(),
            secret_refs: vec![],
            analysis: NodeAnalysis::default(),
        }
    }

    fn cat(id: &str, name: &str, children: Vec<TreeNode>) -> TreeNode {
        TreeNode::Category {
            meta: NodeMeta { id: id.into(), name: name.into(), ..Default::default() },
            secrets: vec![],
            children,
        }
    }

    #[test]
    fn pairs_cover_within_category_and_rule_like_cross_category() {
        let tree = TreeNode::Root {
            meta: NodeMeta { id: "root".into(), name: "Organization Context".into(), ..Default::default() },
            children: vec![
                cat("c1", "Analytics", vec![
                    leaf("a1", "Filters", "always apply org filter"),
                    leaf("a2", "Schema", "plain tables"),
                ]),
                cat("c2", "Loyalty", vec![leaf("b1", "Earning Rules", "points must expire")]),
            ],
        };
        let mut leaves = Vec::new();
        collect_leaves(&tree, "", &mut leaves);
        let pairs = build_comparison_pairs(&leaves);

        // Within Analytics: (a1, a2). Cross-category rule-like: a1 x b1.
        assert!(pairs.contains(&(0, 1)));
        assert!(pairs.contains(&(0, 2)));
        // a2 has no rule keywords, so no a2 x b1 pair.
        assert!(!pairs.contains(&(1, 2)));
    }

    #[test]
    fn conflicts_are_mirrored_into_both_leaves() {
        let mut tree = TreeNode::Root {
            meta: NodeMeta { id: "root".into(), name: "Organization Context".into(), ..Default::default() },
            children: vec![
                leaf("x", "X", "always do it"),
                leaf("y", "Y", "never do it"),
            ],
        };
        add_conflict(&mut tree, "x", "y", "opposite instructions", Severity::High);
        for (id, other) in [("x", "y"), ("y", "x")] {
            match tree.find(id).unwrap() {
                TreeNode::Leaf { analysis, .. } => {
                    assert_eq!(analysis.conflicts.len(), 1);
                    assert_eq!(analysis.conflicts[0].with_node, other);
                    assert_eq!(analysis.conflicts[0].severity, Severity::High);
                }
                _ => panic!(),
            }
        }
    }

    #[test]
    fn pair_cap_is_respected() {
        let many: Vec<TreeNode> = (0..12).map(|i| leaf(&format!("l{}", i), "Rules", "rule")).collect();
        let tree = TreeNode::Root {
            meta: NodeMeta { id: "root".into(), name: "Organization Context".into(), ..Default::default() },
            children: vec![cat("c", "C", many)],
        };
        let mut leaves = Vec::new();
        collect_leaves(&tree, "", &mut leaves);
        let pairs = build_comparison_pairs(&leaves);
        assert_eq!(pairs.len(), MAX_PAIRS);
    }
}
