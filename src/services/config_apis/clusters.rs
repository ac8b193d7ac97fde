//! Config clustering: group by (entity type, subtype) and select up to five
//! diverse templates per cluster.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::services::databricks::counters::Freq;

use super::counters::split_naming;
use super::fingerprint::ConfigFingerprint;

pub const MAX_TEMPLATES_PER_TYPE: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigCluster {
    pub entity_type: String,
    pub entity_subtype: String,
    pub count: usize,
    pub template_ids: Vec<String>,
    /// Full template objects, not summaries.
    pub templates: Vec<Value>,
    /// Fields present in >= 70% of cluster members.
    pub common_fields: Vec<String>,
    /// field -> {value -> count}, top 20 values per field.
    pub field_value_dist: BTreeMap<String, BTreeMap<String, i64>>,
    /// "PREFIX*" when >= 30% of names share a prefix, else empty.
    pub naming_pattern: String,
    pub avg_depth: f64,
    pub avg_fields: f64,
    pub structural_features: StructuralFeatureCounts,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuralFeatureCounts {
    pub has_rules: usize,
    pub has_conditions: usize,
    pub has_workflow: usize,
}

pub fn build_clusters(
    fps: &[ConfigFingerprint],
    max_templates: usize,
) -> Vec<ConfigCluster> {
    let mut groups: BTreeMap<(String, String), Vec<&ConfigFingerprint>> = BTreeMap::new();
    for fp in fps {
        groups
            .entry((fp.entity_type.clone(), fp.entity_subtype.clone()))
            .or_default()
            .push(fp);
    }

    let mut clusters: Vec<ConfigCluster> = groups
        .into_iter()
        .map(|((entity_type, entity_subtype), members)| {
            build_one_cluster(entity_type, entity_subtype, &members, max_templates)
        })
        .collect();

    clusters.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.entity_type.cmp(&b.entity_type))
            .then_with(|| a.entity_subtype.cmp(&b.entity_subtype))
    });

    tracing::info!(
        "Built {} config clusters from {} fingerprints (max {} templates each)",
        clusters.len(),
        fps.len(),
        max_templates
    );
    clusters
}

fn build_one_cluster(
    entity_type: String,
    entity_subtype: String,
    members: &[&ConfigFingerprint],
    max_templates: usize,
) -> ConfigCluster {
    let count = members.len();

    let selected = select_diverse_templates(members, max_templates);
    let template_ids = selected.iter().map(|fp| fp.id.clone()).collect();
    let templates = selected.iter().map(|fp| fp.raw_object.clone()).collect();

    // Common fields: present in >= 70% of members.
    let mut field_counter: Freq<String> = Freq::default();
    for fp in members {
        for field in &fp.field_names {
            field_counter.add(field.clone(), 1);
        }
    }
    let threshold = ((count as f64 * 0.7) as i64).max(1);
    let common_fields: Vec<String> = field_counter
        .most_common(usize::MAX)
        .into_iter()
        .filter(|(_, n)| *n >= threshold)
        .map(|(field, _)| field)
        .collect();

    // Per-field categorical value distribution, top 20 per field.
    let mut dist: BTreeMap<String, Freq<String>> = BTreeMap::new();
    for fp in members {
        for (field, value) in &fp.field_values {
            let display = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            dist.entry(field.clone())
                .or_default()
                .add(crate::utils::truncate_chars(&display, 100).to_string(), 1);
        }
    }
    let field_value_dist: BTreeMap<String, BTreeMap<String, i64>> = dist
        .into_iter()
        .map(|(field, freq)| (field, freq.most_common(20).into_iter().collect()))
        .collect();

    let depths: usize = members.iter().map(|fp| fp.depth).sum();
    let fields: usize = members.iter().map(|fp| fp.total_fields).sum();

    ConfigCluster {
        entity_type,
        entity_subtype,
        count,
        template_ids,
        templates,
        common_fields,
        field_value_dist,
        naming_pattern: detect_naming_pattern(members),
        avg_depth: round1(depths as f64 / count.max(1) as f64),
        avg_fields: round1(fields as f64 / count.max(1) as f64),
        structural_features: StructuralFeatureCounts {
            has_rules: members.iter().filter(|fp| fp.has_rules).count(),
            has_conditions: members.iter().filter(|fp| fp.has_conditions).count(),
            has_workflow: members.iter().filter(|fp| fp.has_workflow).count(),
        },
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Pick up to `n` diverse templates: the simplest and the most complex by
/// depth x field-count, then evenly-spaced picks from the middle.
fn select_diverse_templates<'a>(
    fps: &[&'a ConfigFingerprint],
    n: usize,
) -> Vec<&'a ConfigFingerprint> {
    if fps.len() <= n {
        return fps.to_vec();
    }

    let mut scored: Vec<&ConfigFingerprint> = fps.to_vec();
    scored.sort_by_key(|fp| (fp.complexity(), fp.id.clone()));

    let mut selected: Vec<&ConfigFingerprint> = vec![scored[0], scored[scored.len() - 1]];

    let remaining = n.saturating_sub(2);
    if remaining > 0 {
        let middle = &scored[1..scored.len() - 1];
        if middle.len() <= remaining {
            selected.extend(middle.iter().copied());
        } else {
            let step = middle.len() as f64 / remaining as f64;
            for i in 0..remaining {
                let idx = ((i as f64 * step) as usize).min(middle.len() - 1);
                let candidate = middle[idx];
                if !selected.iter().any(|s| s.id == candidate.id) {
                    selected.push(candidate);
                } else if let Some(alt) =
                    middle.iter().find(|m| !selected.iter().any(|s| s.id == m.id))
                {
                    selected.push(alt);
                }
            }
        }
    }

    selected.truncate(n);
    selected
}

/// "PREFIX<sep>*" when at least 30% of names (min 2) share a prefix.
fn detect_naming_pattern(fps: &[&ConfigFingerprint]) -> String {
    let names: Vec<&str> = fps
        .iter()
        .map(|fp| fp.entity_name.as_str())
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() {
        return String::new();
    }

    let mut prefixes: Freq<String> = Freq::default();
    for name in &names {
        if let Some((prefix, _)) = split_naming(name) {
            if !prefix.is_empty() {
                prefixes.add(prefix.to_string(), 1);
            }
        }
    }

    if let Some((top_prefix, top_count)) = prefixes.most_common(1).into_iter().next() {
        let min_share = ((names.len() as f64 * 0.3) as i64).max(2);
        if top_count >= min_share {
            let sep = split_naming(names[0]).map(|(_, s)| s).unwrap_or("_");
            let sep_char = match sep {
                "underscore" => "_",
                "kebab" => "-",
                _ => " ",
            };
            return format!("{}{}*", top_prefix, sep_char);
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fp(id: &str, subtype: &str, name: &str, depth: usize, fields: usize) -> ConfigFingerprint {
        ConfigFingerprint {
            id: id.into(),
            category: "campaigns".into(),
            entity_type: "campaign".into(),
            entity_subtype: subtype.into(),
            entity_name: name.into(),
            field_names: vec!["name".into(), "status".into()],
            depth,
            total_fields: fields,
            raw_object: json!({"id": id}),
            ..Default::default()
        }
    }

    #[test]
    fn template_selection_keeps_extremes_and_spreads_middle() {
        let fps: Vec<ConfigFingerprint> = (0..12)
            .map(|i| fp(&format!("c{}", i), "TXN", "X_y", i + 1, 10))
            .collect();
        let refs: Vec<&ConfigFingerprint> = fps.iter().collect();
        let selected = select_diverse_templates(&refs, 5);
        assert_eq!(selected.len(), 5);
        // Simplest and most complex are always present.
        assert!(selected.iter().any(|s| s.id == "c0"));
        assert!(selected.iter().any(|s| s.id == "c11"));
        // No duplicates.
        let mut ids: Vec<&str> = selected.iter().map(|s| s.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn clusters_group_by_type_and_subtype() {
        let fps = vec![
            fp("a", "TRANSACTIONAL", "TXN_a", 2, 5),
            fp("b", "TRANSACTIONAL", "TXN_b", 3, 6),
            fp("c", "MARKETING", "MKT_a", 2, 5),
        ];
        let clusters = build_clusters(&fps, 5);
        assert_eq!(clusters.len(), 2);
        let txn = clusters
            .iter()
            .find(|c| c.entity_subtype == "TRANSACTIONAL")
            .unwrap();
        assert_eq!(txn.count, 2);
        assert!(txn.common_fields.contains(&"name".to_string()));
        assert_eq!(txn.naming_pattern, "TXN_*");
    }

    #[test]
    fn weak_prefixes_yield_no_naming_pattern() {
        let fps = vec![
            fp("a", "T", "alpha_one", 1, 1),
            fp("b", "T", "beta_two", 1, 1),
            fp("c", "T", "gamma_three", 1, 1),
        ];
        let refs: Vec<&ConfigFingerprint> = fps.iter().collect();
        assert_eq!(detect_naming_pattern(&refs), "");
    }
}
