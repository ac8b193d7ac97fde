//! Redundancy detector — LLM-rated pairwise semantic overlap between
//! leaves, applied to each node's analysis when the score clears the
//! threshold.

use serde_json::Value;

use crate::services::llm::{ChatMessage, LlmGateway, LlmRequest};
use crate::utils::truncate_chars;

use super::node::TreeNode;

const BATCH_SIZE: usize = 10;
pub const DEFAULT_THRESHOLD: i64 = 40;

#[derive(Debug, Clone)]
pub struct Overlap {
    pub node_a: String,
    pub node_b: String,
    pub score: i64,
    pub detail: String,
}

fn collect_leaf_summaries(tree: &TreeNode) -> Vec<(String, String, String)> {
    tree.leaves()
        .into_iter()
        .map(|leaf| match leaf {
            TreeNode::Leaf { meta, desc, .. } => (
                meta.id.clone(),
                meta.name.clone(),
                truncate_chars(desc, 500).to_string(),
            ),
            _ => unreachable!("leaves() returns only leaves"),
        })
        .collect()
}

const BATCH_SYSTEM: &str = "You are a semantic similarity expert. Compare the following context \
nodes and rate their pairwise overlap.\n\n\
For EACH pair with > 30% semantic overlap, output a JSON line:\n\
{\"a\": \"node_id_1\", \"b\": \"node_id_2\", \"score\": 0-100, \"detail\": \"brief explanation\"}\n\n\
Output ONLY the JSON lines (one per pair with overlap), nothing else. \
If no pairs have significant overlap, output: NONE";

/// Parse the JSON-lines overlap report. Unparseable lines are skipped.
pub fn parse_overlap_lines(text: &str) -> Vec<Overlap> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.eq_ignore_ascii_case("none") {
                return None;
            }
            let value: Value = serde_json::from_str(line).ok()?;
            Some(Overlap {
                node_a: value["a"].as_str()?.to_string(),
                node_b: value["b"].as_str()?.to_string(),
                score: value["score"].as_i64().unwrap_or(0),
                detail: value["detail"].as_str().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// Apply one overlap to both leaves: keep the max incoming score and append
/// the other leaf's id to overlaps_with.
pub fn apply_overlap(tree: &mut TreeNode, overlap: &Overlap) {
    for (this_id, other_id) in [
        (&overlap.node_a, &overlap.node_b),
        (&overlap.node_b, &overlap.node_a),
    ] {
        if let Some(TreeNode::Leaf { analysis, .. }) = tree.find_mut(this_id) {
            let redundancy = &mut analysis.redundancy;
            if overlap.score > redundancy.score {
                redundancy.score = overlap.score;
                redundancy.detail = overlap.detail.clone();
            }
            if !redundancy.overlaps_with.contains(other_id) {
                redundancy.overlaps_with.push(other_id.clone());
            }
        }
    }
}

/// Detect semantic overlap in batches of 10 leaves. Returns the number of
/// overlaps applied at or above the threshold. Batch failures are logged
/// and skipped, never fatal.
pub async fn detect_redundancy(
    gateway: &LlmGateway,
    tree: &mut TreeNode,
    provider: &str,
    model: &str,
    threshold: i64,
) -> usize {
    let leaves = collect_leaf_summaries(tree);
    if leaves.len() < 2 {
        return 0;
    }

    let mut all_overlaps = Vec::new();
    for batch in leaves.chunks(BATCH_SIZE) {
        if batch.len() < 2 {
            continue;
        }
        let descriptions: Vec<String> = batch
            .iter()
            .enumerate()
            .map(|(i, (id, name, desc))| format!("NODE {} [{}]: {}\n{}", i + 1, id, name, desc))
            .collect();
        let user_msg = format!(
            "Compare these nodes for semantic overlap:\n\n{}",
            descriptions.join("\n\n---\n\n")
        );

        let request =
            LlmRequest::new(provider, model, BATCH_SYSTEM, vec![ChatMessage::user(user_msg)], 1500);
        match gateway.call(&request).await {
            Ok(response) => all_overlaps.extend(parse_overlap_lines(&response.text())),
            Err(e) => {
                tracing::warn!("Redundancy batch check failed (non-fatal): {}", e);
            }
        }
    }

    let mut applied = 0;
    for overlap in &all_overlaps {
        if overlap.score >= threshold {
            apply_overlap(tree, overlap);
            applied += 1;
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::context_engine::node::{NodeAnalysis, NodeMeta};

    fn two_leaf_tree() -> TreeNode {
        let leaf = |id: &str| TreeNode::Leaf {
            meta: NodeMeta { id: id.into(), name: id.to_uppercase(), ..Default::default() },
            desc: "body".into(),
            source: String::new(),
            source_doc_key: String::new(),
            secret_refs: vec![],
            analysis: NodeAnalysis::default(),
        };
        TreeNode::Root {
            meta: NodeMeta { id: "root".into(), name: "Organization Context".into(), ..Default::default() },
            children: vec![leaf("a"), leaf("b")],
        }
    }

    #[test]
    fn overlap_lines_parse_and_skip_noise() {
        let text = "NONE\n{\"a\": \"a\", \"b\": \"b\", \"score\": 62, \"detail\": \"same KPIs\"}\nnot json";
        let overlaps = parse_overlap_lines(text);
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].score, 62);
    }

    #[test]
    fn applying_keeps_max_score_and_mirrors_ids() {
        let mut tree = two_leaf_tree();
        apply_overlap(
            &mut tree,
            &Overlap { node_a: "a".into(), node_b: "b".into(), score: 50, detail: "first".into() },
        );
        apply_overlap(
            &mut tree,
            &Overlap { node_a: "a".into(), node_b: "b".into(), score: 45, detail: "weaker".into() },
        );

        for (id, other) in [("a", "b"), ("b", "a")] {
            match tree.find(id).unwrap() {
                TreeNode::Leaf { analysis, .. } => {
                    assert_eq!(analysis.redundancy.score, 50);
                    assert_eq!(analysis.redundancy.detail, "first");
                    assert_eq!(analysis.redundancy.overlaps_with, vec![other.to_string()]);
                }
                _ => panic!(),
            }
        }
    }
}
