//! Config fingerprint — decomposes each platform config object into typed
//! structural components for frequency analysis and template selection.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

/// Keys indicating rule / condition / workflow structures, matched by a
/// recursive key-name scan.
static RULE_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "rule", "rules", "ruleExpression", "ruleSetCondition", "earningRule", "expiryRule",
        "burnRule", "promotionRule", "conditionExpression", "expression",
    ]
});

static CONDITION_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "condition", "conditions", "conditionExpression", "filter", "filters", "criteria",
        "whereClause", "constraintType", "limitConstraints", "scopeConstraints",
    ]
});

static WORKFLOW_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "workflow", "workflows", "actions", "action", "steps", "eventActions", "allocation",
        "allocationActions", "messageBody", "schedule", "scheduleCron",
    ]
});

/// Fields commonly holding a type or subtype value, probed in order.
const TYPE_FIELDS: [&str; 13] = [
    "type", "campaignType", "promotionType", "seriesType", "discountType", "audienceType",
    "targetType", "entityType", "fieldType", "dataType", "module", "scope", "status",
];

const NAME_FIELDS: [&str; 11] = [
    "name", "programName", "campaignName", "seriesName", "promotionName", "audienceName",
    "groupName", "label", "displayName", "title", "description",
];

const ID_FIELDS: [&str; 9] = [
    "id", "programId", "campaignId", "seriesId", "promotionId", "audienceId", "groupId",
    "entityId", "code",
];

/// Enum-like fields whose values are worth counting.
const CATEGORICAL_FIELDS: [&str; 23] = [
    "type", "status", "module", "scope", "channel", "medium", "campaignType", "promotionType",
    "discountType", "seriesType", "audienceType", "targetType", "entityType", "fieldType",
    "dataType", "isActive", "isEnabled", "isDeleted", "allocationType", "allocatePointsOn",
    "pointsExpiryType", "ownerType", "ownedBy",
];

const MAX_STRING_LEN: usize = 2000;
const MAX_ARRAY_LEN: usize = 50;

/// Category -> {api_key -> entity type}.
static ENTITY_MAP: Lazy<HashMap<&'static str, HashMap<&'static str, &'static str>>> =
    Lazy::new(|| {
        HashMap::from([
            (
                "loyalty",
                HashMap::from([
                    ("programs", "program"),
                    ("tiers", "tier"),
                    ("earning_strategies", "strategy"),
                    ("expiry_strategies", "strategy"),
                    ("alternate_currencies", "alternate_currency"),
                    ("partner_programs", "partner_program"),
                    ("event_types", "event_type"),
                    ("custom_fields", "loyalty_custom_field"),
                ]),
            ),
            (
                "campaigns",
                HashMap::from([
                    ("campaigns", "campaign"),
                    ("campaign_details", "campaign_config"),
                    ("campaign_messages", "message"),
                    ("sms_templates", "sms_template"),
                    ("email_templates", "email_template"),
                ]),
            ),
            (
                "promotions",
                HashMap::from([
                    ("loyalty_promotions", "loyalty_promotion"),
                    ("cart_promotions", "cart_promotion"),
                    ("custom_fields", "promotion_custom_field"),
                    ("rewards_groups", "rewards_group"),
                ]),
            ),
            (
                "audiences",
                HashMap::from([
                    ("audiences", "audience"),
                    ("target_groups", "target_group"),
                    ("behavioral_events", "behavioral_event"),
                    ("dim_attr_availability", "audience_filter"),
                ]),
            ),
            (
                "coupons",
                HashMap::from([
                    ("coupon_series", "coupon_series"),
                    ("product_categories", "product_category"),
                    ("product_brands", "product_brand"),
                    ("product_attributes", "product_attribute"),
                ]),
            ),
            (
                "extended_fields",
                HashMap::from([
                    ("customer_extended_fields", "customer_ef"),
                    ("transaction_extended_fields", "txn_ef"),
                    ("lineitem_extended_fields", "line_item_ef"),
                ]),
            ),
            (
                "org_settings",
                HashMap::from([
                    ("behavioral_events", "org_behavioral_event"),
                    ("customer_labels", "customer_label"),
                    ("org_hierarchy", "org_hierarchy_node"),
                    ("target_groups", "target_group"),
                ]),
            ),
        ])
    });

pub fn entity_type_for(category: &str, api_key: &str) -> String {
    if let Some(entity) = ENTITY_MAP.get(category).and_then(|m| m.get(api_key)) {
        return entity.to_string();
    }
    // Fallback: singularized api key.
    api_key.strip_suffix('s').unwrap_or(api_key).to_string()
}

/// Fingerprint of one config object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFingerprint {
    pub id: String,
    pub category: String,
    pub entity_type: String,
    #[serde(default)]
    pub entity_subtype: String,
    #[serde(default)]
    pub entity_name: String,
    #[serde(default)]
    pub entity_id: Option<Value>,

    #[serde(default)]
    pub field_names: Vec<String>,
    #[serde(default)]
    pub nested_objects: Vec<String>,
    #[serde(default)]
    pub field_types: BTreeMap<String, String>,
    #[serde(default)]
    pub field_values: BTreeMap<String, Value>,

    #[serde(default)]
    pub depth: usize,
    #[serde(default)]
    pub total_fields: usize,
    #[serde(default)]
    pub has_rules: bool,
    #[serde(default)]
    pub has_conditions: bool,
    #[serde(default)]
    pub has_workflow: bool,

    /// The object itself, with long strings and arrays capped.
    #[serde(default)]
    pub raw_object: Value,
}

impl ConfigFingerprint {
    pub fn complexity(&self) -> usize {
        self.depth * self.total_fields.max(1)
    }
}

// -- helpers --

/// Extract the item list from the platform's varied response envelopes.
pub fn extract_items(data: &Value) -> Vec<Value> {
    if let Some(list) = data.as_array() {
        return list.clone();
    }
    if let Some(obj) = data.as_object() {
        if obj.contains_key("_error") {
            return Vec::new();
        }
        for key in [
            "data", "entity", "entities", "programs", "tiers", "strategies", "promotions",
            "campaigns", "audiences", "results", "items", "records", "config",
        ] {
            match obj.get(key) {
                Some(Value::Array(list)) => return list.clone(),
                Some(Value::Object(inner)) => {
                    if let Some(Value::Array(list)) = inner.get("data") {
                        return list.clone();
                    }
                }
                _ => {}
            }
        }
    }
    Vec::new()
}

fn infer_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn compute_depth(value: &Value, current: usize) -> usize {
    match value {
        Value::Object(map) if !map.is_empty() => map
            .values()
            .map(|v| compute_depth(v, current + 1))
            .max()
            .unwrap_or(current),
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .take(20)
            .map(|v| compute_depth(v, current + 1))
            .max()
            .unwrap_or(current),
        _ => current,
    }
}

fn count_fields(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.len() + map.values().map(count_fields).sum::<usize>(),
        Value::Array(items) => items.iter().take(20).map(count_fields).sum(),
        _ => 0,
    }
}

/// Cap long strings (2000 chars) and long arrays (50 elements, with a
/// summary element noting the omission).
fn cap_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > MAX_STRING_LEN => {
            Value::String(format!("{}…", crate::utils::truncate_chars(s, MAX_STRING_LEN)))
        }
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), cap_value(v))).collect())
        }
        Value::Array(items) if items.len() > MAX_ARRAY_LEN => {
            let mut capped: Vec<Value> = items.iter().take(MAX_ARRAY_LEN).map(cap_value).collect();
            capped.push(json!(format!("… ({} more items)", items.len() - MAX_ARRAY_LEN)));
            Value::Array(capped)
        }
        Value::Array(items) => Value::Array(items.iter().map(cap_value).collect()),
        other => other.clone(),
    }
}

fn detect_keywords(value: &Value, keywords: &[&str], depth: usize) -> bool {
    if depth > 8 {
        return false;
    }
    match value {
        Value::Object(map) => map.iter().any(|(k, v)| {
            keywords.contains(&k.as_str())
                || (matches!(v, Value::Object(_) | Value::Array(_))
                    && detect_keywords(v, keywords, depth + 1))
        }),
        Value::Array(items) => items
            .iter()
            .take(10)
            .any(|item| detect_keywords(item, keywords, depth + 1)),
        _ => false,
    }
}

fn extract_first<'a>(obj: &'a Value, fields: &[&str]) -> Option<&'a Value> {
    fields
        .iter()
        .map(|f| &obj[*f])
        .find(|v| !v.is_null())
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// -- extraction --

/// Parse one config object into a fingerprint.
pub fn extract_fingerprint(
    fp_id: &str,
    category: &str,
    entity_type: &str,
    obj: &Value,
) -> ConfigFingerprint {
    let Some(map) = obj.as_object() else {
        return ConfigFingerprint {
            id: fp_id.to_string(),
            category: category.to_string(),
            entity_type: entity_type.to_string(),
            raw_object: json!({"_value": crate::utils::truncate_chars(&obj.to_string(), 500)}),
            ..Default::default()
        };
    };

    let field_names: Vec<String> = map.keys().cloned().collect();
    let field_types: BTreeMap<String, String> = map
        .iter()
        .map(|(k, v)| (k.clone(), infer_type(v).to_string()))
        .collect();
    let nested_objects: Vec<String> = map
        .iter()
        .filter(|(_, v)| matches!(v, Value::Object(_) | Value::Array(_)))
        .map(|(k, _)| k.clone())
        .collect();

    let field_values: BTreeMap<String, Value> = map
        .iter()
        .filter(|(k, v)| CATEGORICAL_FIELDS.contains(&k.as_str()) && !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let entity_name = extract_first(obj, &NAME_FIELDS)
        .map(value_to_display)
        .unwrap_or_default();
    let entity_id = extract_first(obj, &ID_FIELDS).cloned();
    let entity_subtype = extract_first(obj, &TYPE_FIELDS)
        .map(value_to_display)
        .unwrap_or_default();

    ConfigFingerprint {
        id: fp_id.to_string(),
        category: category.to_string(),
        entity_type: entity_type.to_string(),
        entity_subtype,
        entity_name: crate::utils::truncate_chars(&entity_name, 200).to_string(),
        entity_id,
        field_names,
        nested_objects,
        field_types,
        field_values,
        depth: compute_depth(obj, 0),
        total_fields: count_fields(obj),
        has_rules: detect_keywords(obj, &RULE_KEYWORDS, 0),
        has_conditions: detect_keywords(obj, &CONDITION_KEYWORDS, 0),
        has_workflow: detect_keywords(obj, &WORKFLOW_KEYWORDS, 0),
        raw_object: cap_value(obj),
    }
}

/// Extract fingerprints from the whole extracted-data map
/// {category -> {api_key -> response}}. Returns (fingerprints, counts by
/// entity type).
pub fn extract_all_fingerprints(
    raw_data: &Value,
) -> (Vec<ConfigFingerprint>, BTreeMap<String, usize>) {
    let mut fingerprints = Vec::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();

    let Some(categories) = raw_data.as_object() else {
        return (fingerprints, counts);
    };

    for (category, api_data) in categories {
        let Some(api_map) = api_data.as_object() else { continue };
        for (api_key, response) in api_map {
            let entity_type = entity_type_for(category, api_key);
            let items = extract_items(response);

            if items.is_empty() {
                // A bare object response is itself one config entity.
                if response.is_object() && response.get("_error").is_none() {
                    let fp_id = format!("{}__{}__0", category, api_key);
                    fingerprints.push(extract_fingerprint(&fp_id, category, &entity_type, response));
                    *counts.entry(entity_type).or_insert(0) += 1;
                }
                continue;
            }

            let n = items.len();
            for (idx, item) in items.iter().enumerate() {
                let fp_id = format!("{}__{}__{}", category, api_key, idx);
                fingerprints.push(extract_fingerprint(&fp_id, category, &entity_type, item));
            }
            *counts.entry(entity_type).or_insert(0) += n;
        }
    }

    tracing::info!(
        "Extracted {} config fingerprints across {} entity types",
        fingerprints.len(),
        counts.len()
    );
    (fingerprints, counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_decomposes_a_campaign_object() {
        let obj = json!({
            "id": 9, "name": "TXN_WINBACK_Q3", "campaignType": "TRANSACTIONAL",
            "status": "ACTIVE",
            "messageBody": {"channel": "SMS", "text": "hi"},
            "rules": [{"ruleExpression": "points > 100"}],
        });
        let fp = extract_fingerprint("campaigns__campaigns__0", "campaigns", "campaign", &obj);
        assert_eq!(fp.entity_name, "TXN_WINBACK_Q3");
        assert_eq!(fp.entity_subtype, "TRANSACTIONAL");
        assert_eq!(fp.entity_id, Some(json!(9)));
        assert!(fp.has_rules);
        assert!(fp.has_workflow); // messageBody
        assert!(fp.field_names.contains(&"campaignType".to_string()));
        assert_eq!(fp.field_values.get("status"), Some(&json!("ACTIVE")));
        assert!(fp.depth >= 2);
    }

    #[test]
    fn long_strings_and_arrays_are_capped() {
        let obj = json!({
            "name": "x",
            "blob": "y".repeat(3000),
            "items": (0..80).collect::<Vec<i32>>(),
        });
        let fp = extract_fingerprint("c__k__0", "c", "k", &obj);
        let blob = fp.raw_object["blob"].as_str().unwrap();
        assert!(blob.chars().count() <= MAX_STRING_LEN + 1);
        let items = fp.raw_object["items"].as_array().unwrap();
        assert_eq!(items.len(), MAX_ARRAY_LEN + 1);
        assert!(items.last().unwrap().as_str().unwrap().contains("30 more items"));
    }

    #[test]
    fn items_are_found_across_envelope_shapes() {
        assert_eq!(extract_items(&json!([1, 2, 3])).len(), 3);
        assert_eq!(extract_items(&json!({"data": [1, 2]})).len(), 2);
        assert_eq!(extract_items(&json!({"entity": {"data": [1]}})).len(), 1);
        assert!(extract_items(&json!({"_error": "x"})).is_empty());
        assert!(extract_items(&json!({"other": 1})).is_empty());
    }

    #[test]
    fn batch_extraction_counts_entity_types() {
        let raw = json!({
            "loyalty": {
                "programs": {"data": [{"programId": 1, "name": "Main"}]},
                "tiers": [{"id": 1}, {"id": 2}],
            },
        });
        let (fps, counts) = extract_all_fingerprints(&raw);
        assert_eq!(fps.len(), 3);
        assert_eq!(counts.get("program"), Some(&1));
        assert_eq!(counts.get("tier"), Some(&2));
    }

    #[test]
    fn unknown_api_key_falls_back_to_singular() {
        assert_eq!(entity_type_for("loyalty", "widgets"), "widget");
        assert_eq!(entity_type_for("campaigns", "sms_templates"), "sms_template");
    }
}
