//! Health scorer — deterministic bottom-up composite per node.
//!
//! Weights: content 30%, redundancy 25%, conflicts 25%, completeness 20%.
//! Categories and the root score as the arithmetic mean of their children.

use super::node::{NodeAnalysis, NodeMeta, TreeNode};

const W_CONTENT: f64 = 0.30;
const W_REDUNDANCY: f64 = 0.25;
const W_CONFLICTS: f64 = 0.25;
const W_COMPLETENESS: f64 = 0.20;

fn score_content(desc: &str) -> i64 {
    let length = desc.trim().chars().count();
    if length == 0 {
        return 30;
    }
    match length {
        l if l > 500 => 100,
        l if l > 200 => 85,
        l if l > 100 => 70,
        l if l > 30 => 50,
        _ => 30,
    }
}

fn score_redundancy(analysis: &NodeAnalysis) -> i64 {
    let score = analysis.redundancy.score;
    if score == 0 {
        100
    } else {
        (100 - score).max(0)
    }
}

fn score_conflicts(analysis: &NodeAnalysis) -> i64 {
    if analysis.conflicts.is_empty() {
        return 100;
    }
    let penalty: i64 = analysis.conflicts.iter().map(|c| c.severity.penalty()).sum();
    (100 - penalty).max(0)
}

/// Fraction of required fields present: name, id, valid type (always true
/// for a typed node), valid visibility (always true), desc-or-children.
fn score_completeness(meta: &NodeMeta, has_body: bool) -> i64 {
    let mut score = 2; // type and visibility are valid by construction
    if !meta.name.is_empty() {
        score += 1;
    }
    if !meta.id.is_empty() {
        score += 1;
    }
    if has_body {
        score += 1;
    }
    ((score as f64 / 5.0) * 100.0).round() as i64
}

fn score_leaf(meta: &NodeMeta, desc: &str, analysis: &NodeAnalysis) -> i64 {
    let weighted = score_content(desc) as f64 * W_CONTENT
        + score_redundancy(analysis) as f64 * W_REDUNDANCY
        + score_conflicts(analysis) as f64 * W_CONFLICTS
        + score_completeness(meta, !desc.is_empty()) as f64 * W_COMPLETENESS;
    weighted.round() as i64
}

/// Walk the tree bottom-up and write every node's `health`.
/// Deterministic: the same tree always yields the same scores.
pub fn score_tree_health(tree: &mut TreeNode) {
    score_node(tree);
}

fn score_node(node: &mut TreeNode) -> i64 {
    let health = match node {
        TreeNode::Leaf { meta, desc, analysis, .. } => score_leaf(meta, desc, analysis),
        TreeNode::Category { meta, children, .. } | TreeNode::Root { meta, children } => {
            if children.is_empty() {
                score_completeness(meta, false)
            } else {
                let total: i64 = children.iter_mut().map(score_node).sum();
                ((total as f64) / children.len() as f64).round() as i64
            }
        }
    };
    node.meta_mut().health = health;
    health
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::context_engine::node::{Conflict, NodeMeta, Redundancy, Severity};

    fn leaf(id: &str, desc: &str, analysis: NodeAnalysis) -> TreeNode {
        TreeNode::Leaf {
            meta: NodeMeta { id: id.into(), name: id.to_uppercase(), ..Default::default() },
            desc: desc.into(),
            source: "databricks".into(),
            source_doc_key: String::new(),
            secret_refs: vec![],
            analysis,
        }
    }

    fn tree(children: Vec<TreeNode>) -> TreeNode {
        TreeNode::Root {
            meta: NodeMeta { id: "root".into(), name: "Organization Context".into(), ..Default::default() },
            children: vec![TreeNode::Category {
                meta: NodeMeta { id: "cat".into(), name: "Category".into(), ..Default::default() },
                secrets: vec![],
                children,
            }],
        }
    }

    #[test]
    fn clean_long_leaf_scores_100() {
        let mut t = tree(vec![leaf("a", &"x".repeat(600), NodeAnalysis::default())]);
        score_tree_health(&mut t);
        // 100*0.3 + 100*0.25 + 100*0.25 + 100*0.2 = 100
        assert_eq!(t.children()[0].children()[0].meta().health, 100);
        assert_eq!(t.children()[0].meta().health, 100);
        assert_eq!(t.meta().health, 100);
    }

    #[test]
    fn conflicts_and_redundancy_penalize() {
        let analysis = NodeAnalysis {
            redundancy: Redundancy { score: 60, overlaps_with: vec!["b".into()], detail: String::new() },
            conflicts: vec![
                Conflict { with_node: "b".into(), description: String::new(), severity: Severity::High },
                Conflict { with_node: "c".into(), description: String::new(), severity: Severity::Low },
            ],
            suggestions: vec![],
        };
        let mut t = tree(vec![leaf("a", &"x".repeat(600), analysis)]);
        score_tree_health(&mut t);
        // content 100*0.3 + redundancy 40*0.25 + conflicts 82*0.25 + completeness 100*0.2
        let health = t.children()[0].children()[0].meta().health;
        assert_eq!(health, (30.0 + 10.0 + 20.5 + 20.0_f64).round() as i64);
    }

    #[test]
    fn scoring_is_deterministic() {
        let build = || {
            tree(vec![
                leaf("a", "short", NodeAnalysis::default()),
                leaf("b", &"y".repeat(250), NodeAnalysis::default()),
            ])
        };
        let mut first = build();
        let mut second = build();
        score_tree_health(&mut first);
        score_tree_health(&mut second);
        assert_eq!(first, second);

        // Re-scoring an already-scored tree is a fixpoint.
        let snapshot = first.clone();
        score_tree_health(&mut first);
        assert_eq!(first, snapshot);
    }

    #[test]
    fn empty_category_scores_completeness_only() {
        let mut t = tree(vec![]);
        score_tree_health(&mut t);
        // name + id + type + visibility present, no children/desc: 4/5.
        assert_eq!(t.children()[0].meta().health, 80);
    }

    #[test]
    fn empty_desc_leaf_uses_floor_content_score() {
        let mut t = tree(vec![leaf("a", "", NodeAnalysis::default())]);
        score_tree_health(&mut t);
        // content 30*0.3 + 100*0.25 + 100*0.25 + completeness 80*0.2 = 75
        assert_eq!(t.children()[0].children()[0].meta().health, 75);
    }
}
