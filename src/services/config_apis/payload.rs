//! Payload builders for the five configuration-reference documents.
//!
//! Each slot is bound to a set of entity types. Payloads carry an org
//! profile, the full cluster templates as an entity catalog, a union-schema
//! field reference, and inferred config standards.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::services::databricks::counters::Freq;

use super::clusters::ConfigCluster;
use super::counters::ConfigCounters;
use super::fingerprint::ConfigFingerprint;

pub const DOC_KEYS: [&str; 5] = [
    "01_LOYALTY_MASTER",
    "02_CAMPAIGN_REFERENCE",
    "03_PROMOTION_RULES",
    "04_AUDIENCE_SEGMENTS",
    "05_CUSTOMIZATIONS",
];

pub fn doc_name(key: &str) -> &'static str {
    match key {
        "01_LOYALTY_MASTER" => "Loyalty Programs Reference",
        "02_CAMPAIGN_REFERENCE" => "Campaign & Messaging Reference",
        "03_PROMOTION_RULES" => "Promotion & Rewards Reference",
        "04_AUDIENCE_SEGMENTS" => "Audiences & Segmentation Reference",
        "05_CUSTOMIZATIONS" => "Fields, Labels & Org Settings Reference",
        _ => "Configuration Reference",
    }
}

pub fn doc_focus(key: &str) -> &'static str {
    match key {
        "01_LOYALTY_MASTER" => {
            "Programs, tiers, earning/expiry strategies, currencies, partner programs, \
             events — with real configs this org uses"
        }
        "02_CAMPAIGN_REFERENCE" => {
            "Campaigns by type, message templates per channel, scheduling patterns, \
             channel configs — real examples from this org"
        }
        "03_PROMOTION_RULES" => {
            "Loyalty/cart promotions with full workflow structures, coupon series with \
             discount rules, product catalog, reward groups — real promotion configs from this org"
        }
        "04_AUDIENCE_SEGMENTS" => {
            "Audience definitions, filter structures, target groups, behavioral events, \
             test/control configs — real examples"
        }
        _ => {
            "Complete catalog of ALL extended fields (customer/txn/lineitem), custom \
             fields, labels, behavioral events, org hierarchy, channel domain properties"
        }
    }
}

/// Entity types owned by each doc slot.
pub fn entity_types_for(key: &str) -> &'static [&'static str] {
    match key {
        "01_LOYALTY_MASTER" => &[
            "program", "tier", "strategy", "alternate_currency", "partner_program",
            "event_type", "loyalty_custom_field",
        ],
        "02_CAMPAIGN_REFERENCE" => {
            &["campaign", "campaign_config", "message", "sms_template", "email_template"]
        }
        "03_PROMOTION_RULES" => &[
            "loyalty_promotion", "cart_promotion", "coupon_series", "rewards_group",
            "promotion_custom_field", "product_category", "product_brand", "product_attribute",
        ],
        "04_AUDIENCE_SEGMENTS" => {
            &["audience", "target_group", "behavioral_event", "audience_filter"]
        }
        _ => &[
            "customer_ef", "txn_ef", "line_item_ef", "customer_label", "org_hierarchy_node",
            "org_behavioral_event",
        ],
    }
}

fn included(inclusions: Option<&Value>, doc_key: &str, item: &str) -> bool {
    inclusions
        .and_then(|inc| inc.get(doc_key))
        .and_then(|d| d.get(item))
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

/// Org-level profile: entity counts, naming conventions, and the subtype /
/// channel distributions.
pub fn build_org_profile(counters: &ConfigCounters, clusters: &[ConfigCluster]) -> Value {
    let mut entity_counts = Map::new();
    for (entity, n) in counters.entity_type.most_common(usize::MAX) {
        entity_counts.insert(entity, json!(n));
    }

    let naming: Vec<&str> = clusters
        .iter()
        .filter(|cl| !cl.naming_pattern.is_empty())
        .map(|cl| cl.naming_pattern.as_str())
        .collect();

    let type_distribution: Vec<Value> = counters
        .entity_subtype
        .most_common(30)
        .into_iter()
        .map(|(k, n)| json!([k, n]))
        .collect();

    let channel_distribution: Vec<Value> = counters
        .field_value
        .most_common(usize::MAX)
        .into_iter()
        .filter(|((field, _), _)| field == "channel" || field == "medium")
        .map(|((_, value), n)| json!([value, n]))
        .collect();

    json!({
        "entity_counts": entity_counts,
        "naming_conventions": naming,
        "type_distribution": type_distribution,
        "channel_distribution": channel_distribution,
    })
}

/// Union schema for one entity type: per field presence-pct, dominant
/// types, and sample values.
pub fn build_union_schema(fps: &[ConfigFingerprint], entity_type: &str) -> Value {
    let members: Vec<&ConfigFingerprint> =
        fps.iter().filter(|fp| fp.entity_type == entity_type).collect();
    if members.is_empty() {
        return json!({});
    }
    let total = members.len() as f64;

    let mut presence: Freq<String> = Freq::default();
    let mut types: BTreeMap<String, Freq<String>> = BTreeMap::new();
    let mut samples: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for fp in &members {
        for field in &fp.field_names {
            presence.add(field.clone(), 1);
        }
        for (field, field_type) in &fp.field_types {
            types.entry(field.clone()).or_default().add(field_type.clone(), 1);
        }
        for (field, value) in &fp.field_values {
            let display = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let entry = samples.entry(field.clone()).or_default();
            if entry.len() < 5 && !entry.contains(&display) {
                entry.push(display);
            }
        }
    }

    let mut schema = Map::new();
    for (field, n) in presence.most_common(usize::MAX) {
        let dominant_type = types
            .get(&field)
            .and_then(|freq| freq.most_common(1).into_iter().next())
            .map(|(t, _)| t)
            .unwrap_or_else(|| "unknown".to_string());
        let mut entry = json!({
            "presence_pct": ((n as f64 / total) * 1000.0).round() / 10.0,
            "type": dominant_type,
        });
        if let Some(sample) = samples.get(&field) {
            entry["samples"] = json!(sample);
        }
        schema.insert(field, entry);
    }
    Value::Object(schema)
}

/// Inferred standards: dominant values (>= 70%) or observed enumerations,
/// plus cluster naming patterns.
pub fn build_config_standards(clusters: &[ConfigCluster]) -> Vec<String> {
    let mut standards = Vec::new();
    for cluster in clusters {
        let entity = if cluster.entity_subtype.is_empty() {
            cluster.entity_type.clone()
        } else {
            format!("{}:{}", cluster.entity_type, cluster.entity_subtype)
        };

        if !cluster.naming_pattern.is_empty() {
            standards.push(format!("{}: names follow {}", entity, cluster.naming_pattern));
        }

        for (field, dist) in &cluster.field_value_dist {
            let total: i64 = dist.values().sum();
            if total == 0 {
                continue;
            }
            let mut entries: Vec<(&String, &i64)> = dist.iter().collect();
            entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            let (top_value, top_count) = entries[0];
            let pct = (*top_count as f64 / total as f64) * 100.0;
            if pct >= 70.0 {
                standards.push(format!(
                    "{}.{}: dominant value '{}' ({:.0}% of configs)",
                    entity, field, top_value, pct
                ));
            } else {
                let values: Vec<&str> =
                    entries.iter().take(5).map(|(v, _)| v.as_str()).collect();
                standards.push(format!("{}.{}: observed values = {:?}", entity, field, values));
            }
        }
    }
    standards
}

/// One built payload plus its display metadata.
#[derive(Debug, Clone)]
pub struct ConfigDocPayload {
    pub doc_name: String,
    pub focus: String,
    pub payload: Value,
}

/// Build payloads for every slot that has at least one populated cluster.
pub fn build_payloads(
    fps: &[ConfigFingerprint],
    counters: &ConfigCounters,
    clusters: &[ConfigCluster],
    inventory: &Value,
    inclusions: Option<&Value>,
) -> BTreeMap<String, ConfigDocPayload> {
    let org_profile = build_org_profile(counters, clusters);
    let mut payloads = BTreeMap::new();

    for key in DOC_KEYS {
        let entity_types = entity_types_for(key);
        let doc_clusters: Vec<&ConfigCluster> = clusters
            .iter()
            .filter(|cl| entity_types.contains(&cl.entity_type.as_str()))
            .filter(|cl| included(inclusions, key, &cl.entity_type))
            .collect();
        if doc_clusters.is_empty() {
            continue;
        }

        let mut entity_catalog = Map::new();
        for cluster in &doc_clusters {
            let catalog_key = if cluster.entity_subtype.is_empty() {
                cluster.entity_type.clone()
            } else {
                format!("{}:{}", cluster.entity_type, cluster.entity_subtype)
            };
            entity_catalog.insert(
                catalog_key,
                json!({
                    "count": cluster.count,
                    "common_fields": cluster.common_fields,
                    "naming_pattern": cluster.naming_pattern,
                    "avg_depth": cluster.avg_depth,
                    "avg_fields": cluster.avg_fields,
                    "structural_features": cluster.structural_features,
                    "templates": cluster.templates,
                }),
            );
        }

        let mut field_reference = Map::new();
        for entity_type in entity_types {
            let schema = build_union_schema(fps, entity_type);
            if schema.as_object().is_some_and(|m| !m.is_empty()) {
                field_reference.insert(entity_type.to_string(), schema);
            }
        }

        let owned_clusters: Vec<ConfigCluster> =
            doc_clusters.iter().map(|cl| (*cl).clone()).collect();
        let standards = build_config_standards(&owned_clusters);

        payloads.insert(
            key.to_string(),
            ConfigDocPayload {
                doc_name: doc_name(key).to_string(),
                focus: doc_focus(key).to_string(),
                payload: json!({
                    "doc": doc_name(key),
                    "focus": doc_focus(key),
                    "org_profile": org_profile,
                    "inventory": inventory,
                    "entity_catalog": entity_catalog,
                    "field_reference": field_reference,
                    "config_standards": standards,
                }),
            },
        );
    }

    payloads
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::config_apis::clusters::build_clusters;
    use crate::services::config_apis::counters::build_counters;

    fn campaign(id: &str, name: &str, status: &str) -> ConfigFingerprint {
        ConfigFingerprint {
            id: id.into(),
            category: "campaigns".into(),
            entity_type: "campaign".into(),
            entity_subtype: "TRANSACTIONAL".into(),
            entity_name: name.into(),
            field_names: vec!["name".into(), "status".into(), "channel".into()],
            field_types: [
                ("name".to_string(), "string".to_string()),
                ("status".to_string(), "string".to_string()),
            ]
            .into(),
            field_values: [
                ("status".to_string(), json!(status)),
                ("channel".to_string(), json!("SMS")),
            ]
            .into(),
            depth: 2,
            total_fields: 3,
            raw_object: json!({"name": name, "status": status}),
            ..Default::default()
        }
    }

    fn fixture() -> Vec<ConfigFingerprint> {
        vec![
            campaign("c0", "TXN_a", "ACTIVE"),
            campaign("c1", "TXN_b", "ACTIVE"),
            campaign("c2", "TXN_c", "PAUSED"),
        ]
    }

    #[test]
    fn union_schema_reports_presence_and_samples() {
        let fps = fixture();
        let schema = build_union_schema(&fps, "campaign");
        assert_eq!(schema["name"]["presence_pct"], 100.0);
        assert_eq!(schema["status"]["type"], "string");
        let samples: Vec<&str> = schema["status"]["samples"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(samples.contains(&"ACTIVE"));
    }

    #[test]
    fn standards_distinguish_dominant_and_observed() {
        let fps = fixture();
        let clusters = build_clusters(&fps, 5);
        let standards = build_config_standards(&clusters);
        // SMS is 100% dominant; status splits 2/1 so it is enumerated.
        assert!(standards.iter().any(|s| s.contains("channel") && s.contains("dominant")));
        assert!(standards.iter().any(|s| s.contains("status") && s.contains("observed")));
        assert!(standards.iter().any(|s| s.contains("TXN_*")));
    }

    #[test]
    fn payloads_include_full_templates() {
        let fps = fixture();
        let (counters, _) = build_counters(&fps);
        let clusters = build_clusters(&fps, 5);
        let inventory = json!({"campaigns": {"total_objects": 3}});
        let payloads = build_payloads(&fps, &counters, &clusters, &inventory, None);

        let campaign_doc = payloads.get("02_CAMPAIGN_REFERENCE").unwrap();
        let catalog = &campaign_doc.payload["entity_catalog"]["campaign:TRANSACTIONAL"];
        assert_eq!(catalog["templates"].as_array().unwrap().len(), 3);
        // Slots without matching entity types are skipped.
        assert!(!payloads.contains_key("04_AUDIENCE_SEGMENTS"));
    }
}
