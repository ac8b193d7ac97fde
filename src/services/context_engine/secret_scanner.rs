//! Secret scanner — two-pass credential scan over tree leaves.
//!
//! Pass one walks every leaf, replaces each credential literal with a
//! `{{key}}` placeholder, flips the leaf private, and records the secret
//! under its enclosing category. Pass two attaches the collected buckets to
//! the category nodes, deduplicating by key. Scanning is idempotent: a
//! placeholder never re-matches.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use super::node::{SecretEntry, TreeNode, Visibility};

struct SecretPattern {
    regex: Regex,
    name: &'static str,
    secret_type: &'static str,
}

static PATTERNS: Lazy<Vec<SecretPattern>> = Lazy::new(|| {
    [
        (
            r"(?i)(?:Authorization)\s*[:=]\s*(?:Basic|Bearer)\s+[\w+/=.\-]+",
            "auth_header",
            "Basic Auth",
        ),
        (r"(?i)(?:api[_\-]?key|apikey|x-api-key)\s*[:=]\s*[\w\-]{16,}", "api_key", "API Key"),
        (r"(?i)(?:token|access_token|refresh_token)\s*[:=]\s*[\w\-]{16,}", "token", "Token"),
        (r"(?i)(?:password|passwd|pwd)\s*[:=]\s*\S{8,}", "password", "Password"),
        (
            r"(?i)(?:secret|client_secret|oauth_secret)\s*[:=]\s*[\w\-]{16,}",
            "client_secret",
            "Client Secret",
        ),
        (r"(?i)Bearer\s+[\w\-.]+\.[\w\-.]+\.[\w\-.]+", "jwt_token", "JWT Token"),
    ]
    .iter()
    .map(|(pattern, name, secret_type)| SecretPattern {
        regex: Regex::new(pattern).expect("static pattern"),
        name,
        secret_type,
    })
    .collect()
});

/// Full tree secret scan. Returns the total number of secrets found.
pub fn scan_tree_secrets(tree: &mut TreeNode) -> usize {
    let mut buckets: BTreeMap<String, Vec<SecretEntry>> = BTreeMap::new();
    scan_and_collect(tree, "root", &mut buckets);
    let total = buckets.values().map(Vec::len).sum();
    attach_category_secrets(tree, &buckets);
    total
}

fn scan_and_collect(
    node: &mut TreeNode,
    parent_category: &str,
    buckets: &mut BTreeMap<String, Vec<SecretEntry>>,
) {
    let category = if matches!(node, TreeNode::Category { .. }) {
        node.name().to_string()
    } else {
        parent_category.to_string()
    };

    if let TreeNode::Leaf { meta, desc, secret_refs, .. } = node {
        if !desc.is_empty() {
            let mut found_refs: Vec<String> = Vec::new();
            let mut key_counts: BTreeMap<&str, usize> = BTreeMap::new();

            for pattern in PATTERNS.iter() {
                // Collect against the current text; earlier replacements
                // remove literals later patterns would otherwise re-find.
                loop {
                    let m = pattern
                        .regex
                        .find_iter(desc)
                        .find(|m| !m.as_str().contains("{{"));
                    let Some(m) = m else { break };
                    let index = key_counts.entry(pattern.name).or_insert(0);
                    let key = if *index == 0 {
                        pattern.name.to_string()
                    } else {
                        format!("{}_{}", pattern.name, index)
                    };
                    *index += 1;

                    let literal = m.as_str().to_string();
                    *desc = desc.replace(&literal, &format!("{{{{{}}}}}", key));

                    found_refs.push(key.clone());
                    buckets.entry(category.clone()).or_default().push(SecretEntry {
                        key,
                        scope: category.clone(),
                        secret_type: pattern.secret_type.to_string(),
                    });
                }
            }

            if !found_refs.is_empty() {
                meta.visibility = Visibility::Private;
                for key in found_refs {
                    if !secret_refs.contains(&key) {
                        secret_refs.push(key);
                    }
                }
                tracing::info!(
                    "Found secrets in leaf '{}', extracted as: {:?}",
                    meta.name,
                    secret_refs
                );
            }
        }
        return;
    }

    if let Some(children) = node.children_mut() {
        for child in children {
            scan_and_collect(child, &category, buckets);
        }
    }
}

fn attach_category_secrets(node: &mut TreeNode, buckets: &BTreeMap<String, Vec<SecretEntry>>) {
    if let TreeNode::Category { meta, secrets, .. } = node {
        if let Some(found) = buckets.get(&meta.name) {
            for entry in found {
                if !secrets.iter().any(|s| s.key == entry.key) {
                    secrets.push(entry.clone());
                }
            }
        }
    }
    if let Some(children) = node.children_mut() {
        for child in children {
            attach_category_secrets(child, buckets);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::context_engine::node::{NodeAnalysis, NodeMeta};

    fn tree_with_leaf(desc: &str) -> TreeNode {
        TreeNode::Root {
            meta: NodeMeta { id: "root".into(), name: "Organization Context".into(), ..Default::default() },
            children: vec![TreeNode::Category {
                meta: NodeMeta { id: "integrations".into(), name: "Integrations".into(), ..Default::default() },
                secrets: vec![],
                children: vec![TreeNode::Leaf {
                    meta: NodeMeta { id: "api_guide".into(), name: "API Guide".into(), ..Default::default() },
                    desc: desc.into(),
                    source: "confluence".into(),
                    source_doc_key: String::new(),
                    secret_refs: vec![],
                    analysis: NodeAnalysis::default(),
                }],
            }],
        }
    }

    fn leaf(tree: &TreeNode) -> (&NodeMeta, &str, &[String]) {
        match &tree.children()[0].children()[0] {
            TreeNode::Leaf { meta, desc, secret_refs, .. } => (meta, desc, secret_refs),
            _ => panic!("expected leaf"),
        }
    }

    fn category_secrets(tree: &TreeNode) -> &[SecretEntry] {
        match &tree.children()[0] {
            TreeNode::Category { secrets, .. } => secrets,
            _ => panic!("expected category"),
        }
    }

    #[test]
    fn bearer_credential_is_extracted_and_scoped() {
        let mut tree = tree_with_leaf("Call the API with Authorization: Bearer abc.def.ghi");
        let found = scan_tree_secrets(&mut tree);
        assert_eq!(found, 1);

        let (meta, desc, refs) = leaf(&tree);
        assert!(desc.contains("{{auth_header}}"));
        assert!(!desc.contains("abc.def.ghi"));
        assert_eq!(meta.visibility, Visibility::Private);
        assert_eq!(refs, ["auth_header"]);

        let secrets = category_secrets(&tree);
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].scope, "Integrations");
        assert_eq!(secrets[0].secret_type, "Basic Auth");
    }

    #[test]
    fn scanning_twice_changes_nothing() {
        let mut tree =
            tree_with_leaf("password = hunter2hunter2 and api_key: abcdefghij0123456789");
        scan_tree_secrets(&mut tree);
        let after_first = serde_json::to_string(&tree).unwrap();
        let found_second = scan_tree_secrets(&mut tree);
        let after_second = serde_json::to_string(&tree).unwrap();
        assert_eq!(found_second, 0);
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn no_secret_literal_survives_a_pass() {
        let mut tree = tree_with_leaf(
            "token= aaaabbbbccccdddd1111 then client_secret: zzzzyyyyxxxxwwww2222",
        );
        scan_tree_secrets(&mut tree);
        let (_, desc, _) = leaf(&tree);
        assert!(!desc.contains("aaaabbbbccccdddd1111"));
        assert!(!desc.contains("zzzzyyyyxxxxwwww2222"));
        assert!(desc.contains("{{token}}"));
        assert!(desc.contains("{{client_secret}}"));
    }

    #[test]
    fn duplicate_types_get_indexed_keys() {
        let mut tree = tree_with_leaf(
            "first api_key: abcdefghij0123456789 second apikey: zyxwvutsrq9876543210",
        );
        scan_tree_secrets(&mut tree);
        let (_, _, refs) = leaf(&tree);
        assert_eq!(refs, ["api_key", "api_key_1"]);
    }

    #[test]
    fn patterns_match_case_insensitively() {
        // No "authorization" keyword here, so only the jwt_token pattern
        // can catch the lowercase bearer literal.
        let mut tree = tree_with_leaf("send bearer aaa.bbb.ccc with every request");
        let found = scan_tree_secrets(&mut tree);
        assert_eq!(found, 1);

        let (meta, desc, refs) = leaf(&tree);
        assert!(desc.contains("{{jwt_token}}"));
        assert!(!desc.contains("aaa.bbb.ccc"));
        assert_eq!(meta.visibility, Visibility::Private);
        assert_eq!(refs, ["jwt_token"]);

        let secrets = category_secrets(&tree);
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].secret_type, "JWT Token");

        // Upper-cased keyword variants of the other patterns redact too.
        let mut tree = tree_with_leaf("PASSWORD = hunter2hunter2");
        assert_eq!(scan_tree_secrets(&mut tree), 1);
        let (_, desc, refs) = leaf(&tree);
        assert!(desc.contains("{{password}}"));
        assert_eq!(refs, ["password"]);
    }

    #[test]
    fn clean_leaves_stay_public() {
        let mut tree = tree_with_leaf("Nothing sensitive here.");
        assert_eq!(scan_tree_secrets(&mut tree), 0);
        let (meta, _, refs) = leaf(&tree);
        assert_eq!(meta.visibility, Visibility::Public);
        assert!(refs.is_empty());
        assert!(category_secrets(&tree).is_empty());
    }
}
