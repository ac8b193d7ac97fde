//! Extraction categories and their parameter schemas, declared so a thin UI
//! can render the submit form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub key: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigCategory {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    /// Whether a numeric program id is auto-resolved when absent.
    pub needs_program_id: bool,
}

fn program_id_param() -> ParamSpec {
    ParamSpec {
        key: "program_id",
        label: "Program ID",
        kind: "number",
        required: false,
        default: None,
    }
}

pub fn available_categories() -> Vec<ConfigCategory> {
    vec![
        ConfigCategory {
            id: "loyalty",
            label: "Loyalty",
            description: "Programs, tiers, earning/expiry strategies, currencies, partner programs, events",
            params: vec![program_id_param()],
            needs_program_id: true,
        },
        ConfigCategory {
            id: "extended_fields",
            label: "Extended Fields",
            description: "Customer, transaction, and line-item extended field catalogs",
            params: vec![],
            needs_program_id: false,
        },
        ConfigCategory {
            id: "campaigns",
            label: "Campaigns",
            description: "Campaigns, per-campaign details and messages, SMS/email templates",
            params: vec![ParamSpec {
                key: "campaign_limit",
                label: "Max campaigns to expand",
                kind: "number",
                required: false,
                default: Some(Value::from(25)),
            }],
            needs_program_id: false,
        },
        ConfigCategory {
            id: "promotions",
            label: "Promotions",
            description: "Loyalty and cart promotions, reward groups, promotion custom fields",
            params: vec![program_id_param()],
            needs_program_id: true,
        },
        ConfigCategory {
            id: "coupons",
            label: "Coupons",
            description: "Coupon series, product brands/categories/attributes, reward custom fields",
            params: vec![program_id_param()],
            needs_program_id: true,
        },
        ConfigCategory {
            id: "audiences",
            label: "Audiences",
            description: "Audiences, target groups, behavioral events, filter dimensions",
            params: vec![],
            needs_program_id: false,
        },
        ConfigCategory {
            id: "org_settings",
            label: "Org Settings",
            description: "Org-level behavioral events, customer labels, hierarchy, target groups",
            params: vec![],
            needs_program_id: false,
        },
    ]
}

pub fn category_by_id(id: &str) -> Option<ConfigCategory> {
    available_categories().into_iter().find(|c| c.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seven_categories_are_declared() {
        let categories = available_categories();
        assert_eq!(categories.len(), 7);
        assert!(categories.iter().any(|c| c.id == "loyalty" && c.needs_program_id));
        assert!(category_by_id("audiences").is_some());
        assert!(category_by_id("nope").is_none());
    }
}
