//! Frequency counters over config fingerprints — the config analog of the
//! SQL pipeline's counter stage. Counts are unweighted (one per object).

use serde_json::{json, Value};

use crate::services::databricks::counters::Freq;

use super::fingerprint::ConfigFingerprint;

#[derive(Debug, Clone, Default)]
pub struct ConfigCounters {
    pub entity_type: Freq<String>,
    /// "entity_type:subtype"
    pub entity_subtype: Freq<String>,
    /// (entity_type, field)
    pub field_usage: Freq<(String, String)>,
    /// (field, inferred type)
    pub field_type: Freq<(String, String)>,
    /// (field, value) for categorical fields
    pub field_value: Freq<(String, String)>,
    pub nested_structure: Freq<String>,
    pub structural: Freq<String>,
    pub naming_prefix: Freq<String>,
    pub naming_separator: Freq<String>,
    pub complexity: Freq<String>,
}

pub fn build_counters(fps: &[ConfigFingerprint]) -> (ConfigCounters, usize) {
    let mut c = ConfigCounters::default();
    let total = fps.len();

    for fp in fps {
        c.entity_type.add(fp.entity_type.clone(), 1);
        if !fp.entity_subtype.is_empty() {
            c.entity_subtype
                .add(format!("{}:{}", fp.entity_type, fp.entity_subtype), 1);
        }

        for field in &fp.field_names {
            c.field_usage.add((fp.entity_type.clone(), field.clone()), 1);
        }
        for (field, field_type) in &fp.field_types {
            c.field_type.add((field.clone(), field_type.clone()), 1);
        }
        for (field, value) in &fp.field_values {
            let display = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            c.field_value
                .add((field.clone(), crate::utils::truncate_chars(&display, 100).to_string()), 1);
        }
        for key in &fp.nested_objects {
            c.nested_structure.add(key.clone(), 1);
        }

        if fp.has_rules {
            c.structural.add("has_rules".to_string(), 1);
        }
        if fp.has_conditions {
            c.structural.add("has_conditions".to_string(), 1);
        }
        if fp.has_workflow {
            c.structural.add("has_workflow".to_string(), 1);
        }

        if !fp.entity_name.is_empty() {
            let name = fp.entity_name.trim();
            if let Some((prefix, separator)) = split_naming(name) {
                c.naming_prefix.add(prefix.to_string(), 1);
                c.naming_separator.add(separator.to_string(), 1);
            } else {
                c.naming_separator.add("none".to_string(), 1);
            }
        }

        let bucket = match fp.depth {
            0..=2 => "shallow(0-2)",
            3..=5 => "medium(3-5)",
            _ => "deep(6+)",
        };
        c.complexity.add(bucket.to_string(), 1);
    }

    (c, total)
}

/// Split a config name on its separator style. Returns (prefix, style).
pub fn split_naming(name: &str) -> Option<(&str, &str)> {
    if name.contains('_') {
        Some((name.split('_').next().unwrap_or(name), "underscore"))
    } else if name.contains('-') {
        Some((name.split('-').next().unwrap_or(name), "kebab"))
    } else if name.contains(' ') {
        Some((name.split(' ').next().unwrap_or(name), "space"))
    } else {
        None
    }
}

/// JSON-serializable `[[key, n]]` lists; tuple keys joined with `.`.
pub fn counters_to_json(c: &ConfigCounters, top_n: usize) -> Value {
    fn simple(freq: &Freq<String>, top_n: usize) -> Value {
        Value::Array(freq.most_common(top_n).iter().map(|(k, n)| json!([k, n])).collect())
    }
    fn pair(freq: &Freq<(String, String)>, top_n: usize) -> Value {
        Value::Array(
            freq.most_common(top_n)
                .iter()
                .map(|((a, b), n)| json!([format!("{}.{}", a, b), n]))
                .collect(),
        )
    }

    json!({
        "entity_type": simple(&c.entity_type, top_n),
        "entity_subtype": simple(&c.entity_subtype, top_n),
        "field_usage": pair(&c.field_usage, top_n),
        "field_type": pair(&c.field_type, top_n),
        "field_value": pair(&c.field_value, top_n),
        "nested_structure": simple(&c.nested_structure, top_n),
        "structural": simple(&c.structural, top_n),
        "naming_prefix": simple(&c.naming_prefix, top_n),
        "naming_separator": simple(&c.naming_separator, top_n),
        "complexity": simple(&c.complexity, top_n),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fp(entity_type: &str, subtype: &str, name: &str, depth: usize) -> ConfigFingerprint {
        ConfigFingerprint {
            id: "x".into(),
            category: "c".into(),
            entity_type: entity_type.into(),
            entity_subtype: subtype.into(),
            entity_name: name.into(),
            field_names: vec!["name".into(), "status".into()],
            field_values: [("status".to_string(), json!("ACTIVE"))].into(),
            depth,
            total_fields: 2,
            ..Default::default()
        }
    }

    #[test]
    fn counters_cover_all_dimensions() {
        let fps = vec![
            fp("campaign", "TRANSACTIONAL", "TXN_winback", 2),
            fp("campaign", "MARKETING", "TXN_upsell", 4),
            fp("program", "", "Main Program", 7),
        ];
        let (c, total) = build_counters(&fps);
        assert_eq!(total, 3);
        assert_eq!(c.entity_type.get(&"campaign".to_string()), 2);
        assert_eq!(c.entity_subtype.get(&"campaign:TRANSACTIONAL".to_string()), 1);
        assert_eq!(c.naming_prefix.get(&"TXN".to_string()), 2);
        assert_eq!(c.naming_separator.get(&"underscore".to_string()), 2);
        assert_eq!(c.naming_separator.get(&"space".to_string()), 1);
        assert_eq!(c.complexity.get(&"shallow(0-2)".to_string()), 1);
        assert_eq!(c.complexity.get(&"medium(3-5)".to_string()), 1);
        assert_eq!(c.complexity.get(&"deep(6+)".to_string()), 1);
        assert_eq!(c.field_value.get(&("status".to_string(), "ACTIVE".to_string())), 3);
    }

    #[test]
    fn tuple_keys_serialize_dotted() {
        let fps = vec![fp("campaign", "", "x_y", 1)];
        let (c, _) = build_counters(&fps);
        let v = counters_to_json(&c, 10);
        let usage = v["field_usage"].as_array().unwrap();
        assert!(usage
            .iter()
            .any(|entry| entry[0].as_str().unwrap() == "campaign.name"));
    }
}
