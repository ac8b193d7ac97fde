//! Context tree node model.
//!
//! `TreeNode` is a sum over the three node roles; every walk is an
//! exhaustive match. Serialization matches the JSON shape the tree builder
//! prompts for (`type` tag, `secretRefs`, `source_doc_key`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Default for Visibility {
    fn default() -> Self {
        Self::Public
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Health penalty applied per conflict.
    pub fn penalty(&self) -> i64 {
        match self {
            Self::High => 15,
            Self::Medium => 8,
            Self::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Redundancy {
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub overlaps_with: Vec<String>,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub with_node: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAnalysis {
    #[serde(default)]
    pub redundancy: Redundancy,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// A detected secret recorded on the enclosing category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretEntry {
    pub key: String,
    pub scope: String,
    #[serde(rename = "type")]
    pub secret_type: String,
}

/// Fields shared by every node role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub health: i64,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TreeNode {
    #[serde(rename = "root")]
    Root {
        #[serde(flatten)]
        meta: NodeMeta,
        #[serde(default)]
        children: Vec<TreeNode>,
    },
    #[serde(rename = "cat")]
    Category {
        #[serde(flatten)]
        meta: NodeMeta,
        #[serde(default)]
        secrets: Vec<SecretEntry>,
        #[serde(default)]
        children: Vec<TreeNode>,
    },
    #[serde(rename = "leaf")]
    Leaf {
        #[serde(flatten)]
        meta: NodeMeta,
        #[serde(default)]
        desc: String,
        #[serde(default)]
        source: String,
        #[serde(default)]
        source_doc_key: String,
        #[serde(default, rename = "secretRefs")]
        secret_refs: Vec<String>,
        #[serde(default)]
        analysis: NodeAnalysis,
    },
}

impl TreeNode {
    pub fn meta(&self) -> &NodeMeta {
        match self {
            Self::Root { meta, .. } | Self::Category { meta, .. } | Self::Leaf { meta, .. } => meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut NodeMeta {
        match self {
            Self::Root { meta, .. } | Self::Category { meta, .. } | Self::Leaf { meta, .. } => meta,
        }
    }

    pub fn id(&self) -> &str {
        &self.meta().id
    }

    pub fn name(&self) -> &str {
        &self.meta().name
    }

    pub fn children(&self) -> &[TreeNode] {
        match self {
            Self::Root { children, .. } | Self::Category { children, .. } => children,
            Self::Leaf { .. } => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<TreeNode>> {
        match self {
            Self::Root { children, .. } | Self::Category { children, .. } => Some(children),
            Self::Leaf { .. } => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    pub fn find(&self, node_id: &str) -> Option<&TreeNode> {
        if self.id() == node_id {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find(node_id))
    }

    pub fn find_mut(&mut self, node_id: &str) -> Option<&mut TreeNode> {
        if self.id() == node_id {
            return Some(self);
        }
        self.children_mut()?
            .iter_mut()
            .find_map(|child| child.find_mut(node_id))
    }

    /// Id of the parent of `node_id`, if any.
    pub fn find_parent_id(&self, node_id: &str) -> Option<String> {
        let children = self.children();
        if children.iter().any(|c| c.id() == node_id) {
            return Some(self.id().to_string());
        }
        children.iter().find_map(|child| child.find_parent_id(node_id))
    }

    /// Remove a node by id anywhere in the tree. Returns true when found.
    /// A removed node's id is never reused within a run.
    pub fn remove(&mut self, node_id: &str) -> bool {
        let Some(children) = self.children_mut() else { return false };
        if let Some(pos) = children.iter().position(|c| c.id() == node_id) {
            children.remove(pos);
            return true;
        }
        children.iter_mut().any(|child| child.remove(node_id))
    }

    /// All leaf nodes, depth-first.
    pub fn leaves(&self) -> Vec<&TreeNode> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a TreeNode>) {
        if self.is_leaf() {
            out.push(self);
        }
        for child in self.children() {
            child.collect_leaves(out);
        }
    }

    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(TreeNode::node_count).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_tree() -> TreeNode {
        TreeNode::Root {
            meta: NodeMeta {
                id: "root".into(),
                name: "Organization Context".into(),
                health: 0,
                visibility: Visibility::Public,
            },
            children: vec![TreeNode::Category {
                meta: NodeMeta {
                    id: "analytics".into(),
                    name: "Analytics & SQL".into(),
                    health: 0,
                    visibility: Visibility::Public,
                },
                secrets: vec![],
                children: vec![TreeNode::Leaf {
                    meta: NodeMeta {
                        id: "master_rules".into(),
                        name: "Master Rules".into(),
                        health: 0,
                        visibility: Visibility::Public,
                    },
                    desc: "Rules body".into(),
                    source: "databricks".into(),
                    source_doc_key: "01_MASTER".into(),
                    secret_refs: vec![],
                    analysis: NodeAnalysis::default(),
                }],
            }],
        }
    }

    #[test]
    fn serde_shape_matches_prompted_json() {
        let tree = sample_tree();
        let v = serde_json::to_value(&tree).unwrap();
        assert_eq!(v["type"], "root");
        assert_eq!(v["children"][0]["type"], "cat");
        let leaf = &v["children"][0]["children"][0];
        assert_eq!(leaf["type"], "leaf");
        assert_eq!(leaf["source_doc_key"], "01_MASTER");
        assert!(leaf["secretRefs"].is_array());
    }

    #[test]
    fn parse_serialize_parse_round_trips() {
        let tree = sample_tree();
        let serialized = serde_json::to_string(&tree).unwrap();
        let reparsed: TreeNode = serde_json::from_str(&serialized).unwrap();
        let reserialized = serde_json::to_string(&reparsed).unwrap();
        let reparsed_again: TreeNode = serde_json::from_str(&reserialized).unwrap();
        assert_eq!(reparsed, reparsed_again);
        assert_eq!(tree, reparsed);
    }

    #[test]
    fn find_remove_and_parent_lookup() {
        let mut tree = sample_tree();
        assert!(tree.find("master_rules").is_some());
        assert_eq!(tree.find_parent_id("master_rules").as_deref(), Some("analytics"));
        assert!(tree.remove("master_rules"));
        assert!(tree.find("master_rules").is_none());
        assert!(!tree.remove("master_rules"));
    }

    #[test]
    fn missing_optional_fields_default() {
        let v = json!({
            "type": "leaf", "id": "x", "name": "X",
        });
        let node: TreeNode = serde_json::from_value(v).unwrap();
        match node {
            TreeNode::Leaf { meta, desc, analysis, .. } => {
                assert_eq!(meta.health, 0);
                assert_eq!(meta.visibility, Visibility::Public);
                assert!(desc.is_empty());
                assert_eq!(analysis.redundancy.score, 0);
            }
            _ => panic!("expected leaf"),
        }
    }
}
