//! Config-platform API client.
//!
//! Auth mode is decided per path: bearer by default, cookie for a fixed set
//! of path markers. Headers are prepared freshly per request so neither
//! mode's auth header can leak into the other — a cookie-auth request never
//! carries `Authorization` and a bearer request never carries `Cookie`.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const SERVICE_ARYA: &str = "/arya/api/v1";
pub const SERVICE_EMF: &str = "/loyalty/emf/v1";
pub const SERVICE_INTOUCH_V2: &str = "/v2";
pub const SERVICE_INTOUCH_V3: &str = "/v3";
pub const SERVICE_IRIS: &str = "/iris/v2";
pub const SERVICE_COUPONS: &str = "/coupon/api/v1";
pub const SERVICE_PROMOTIONS: &str = "/v1/promotion-management";
pub const SERVICE_NSE: &str = "/arya/api/v1/nse";
pub const SERVICE_CREATIVES: &str = "/arya/api/v1/creatives";
pub const SERVICE_REWARD_CORE: &str = "/core/v1";
pub const SERVICE_ADIONA: &str = "/adiona/api/v1";
pub const SERVICE_ORG_SETTINGS: &str = "/arya/api/v1/org-settings";

/// Paths that require cookie-based auth instead of a Bearer token.
pub const COOKIE_AUTH_MARKERS: [&str; 5] =
    ["/iris/", "/adiona/", "/nse/", "/nfs/", "/core/v1/"];

const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{message}")]
    Api { message: String, status_code: Option<u16> },

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

impl PlatformError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status_code, .. } => *status_code,
            _ => None,
        }
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self.status_code(), Some(401) | Some(403))
    }
}

pub struct PlatformClient {
    base_url: String,
    token: String,
    org_id: String,
    http: reqwest::Client,
}

impl PlatformClient {
    pub fn new(host: &str, token: &str, org_id: &str) -> Result<Self, PlatformError> {
        // Auth headers deliberately stay out of the client defaults; they
        // are applied per request by prepare_headers().
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PlatformError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: format!("https://{}", host.trim_matches('/')),
            token: token.to_string(),
            org_id: org_id.to_string(),
            http,
        })
    }

    pub fn needs_cookie_auth(path: &str) -> bool {
        COOKIE_AUTH_MARKERS.iter().any(|marker| path.contains(marker))
    }

    /// Build the full header set for one request.
    ///
    /// - Cookie-auth paths get `Cookie: CT=…; OID=…`, the org headers, a
    ///   browser user-agent, and a fresh request id — never `Authorization`.
    /// - Bearer paths get `Authorization: Bearer …` — never `Cookie`.
    pub fn prepare_headers(&self, path: &str) -> Result<Vec<(String, String)>, PlatformError> {
        let mut headers: Vec<(String, String)> =
            vec![("Accept".to_string(), "application/json".to_string())];

        if Self::needs_cookie_auth(path) {
            if self.org_id.is_empty() {
                return Err(PlatformError::MissingCredentials(
                    "org_id is required for cookie-auth endpoints".to_string(),
                ));
            }
            if self.token.is_empty() {
                return Err(PlatformError::MissingCredentials(
                    "token is required for cookie-auth endpoints".to_string(),
                ));
            }
            headers.push(("X-CAP-API-AUTH-ORG-ID".to_string(), self.org_id.clone()));
            headers.push(("X-CAP-ORG".to_string(), self.org_id.clone()));
            headers.push((
                "Cookie".to_string(),
                format!("CT={}; OID={}", self.token, self.org_id),
            ));
            headers.push(("User-Agent".to_string(), BROWSER_UA.to_string()));
            headers.push(("X-CAP-REQUEST-ID".to_string(), Uuid::new_v4().to_string()));
        } else {
            if self.token.is_empty() {
                return Err(PlatformError::MissingCredentials(
                    "token is required for bearer endpoints".to_string(),
                ));
            }
            headers.push(("Authorization".to_string(), format!("Bearer {}", self.token)));
            if !self.org_id.is_empty() {
                headers.push(("X-CAP-API-AUTH-ORG-ID".to_string(), self.org_id.clone()));
            }
        }

        Ok(headers)
    }

    fn header_map(&self, path: &str) -> Result<reqwest::header::HeaderMap, PlatformError> {
        let mut map = reqwest::header::HeaderMap::new();
        for (name, value) in self.prepare_headers(path)? {
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| PlatformError::Transport(e.to_string()))?;
            let value = reqwest::header::HeaderValue::from_str(&value)
                .map_err(|e| PlatformError::Transport(e.to_string()))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    /// Raise when the JSON envelope reports failure despite HTTP success.
    fn check_api_response(data: &Value, status_code: u16) -> Result<(), PlatformError> {
        if !data.is_object() {
            return Ok(());
        }
        if data["success"] == Value::Bool(false) {
            return Err(PlatformError::Api {
                message: format!(
                    "API returned success=false: {}",
                    data["message"].as_str().unwrap_or("Unknown")
                ),
                status_code: Some(status_code),
            });
        }
        if let Some(status) = data.get("status").filter(|s| s.is_object()) {
            if let Some(code) = status["code"].as_i64() {
                if code != 200 && code != 201 {
                    return Err(PlatformError::Api {
                        message: format!(
                            "API error code {}: {}",
                            code,
                            status["message"].as_str().unwrap_or("Unknown")
                        ),
                        status_code: Some(code as u16),
                    });
                }
            }
            if status["success"] == Value::Bool(false) {
                return Err(PlatformError::Api {
                    message: format!(
                        "API returned success=false: {}",
                        status["message"].as_str().unwrap_or("Unknown")
                    ),
                    status_code: Some(status_code),
                });
            }
        }
        Ok(())
    }

    pub async fn get(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, PlatformError> {
        let headers = self.header_map(path)?;
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .headers(headers)
            .query(params)
            .send()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Api {
                message: format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    crate::utils::truncate_chars(&body, 500)
                ),
                status_code: Some(status.as_u16()),
            });
        }

        let data: Value = match response.json().await {
            Ok(v) => v,
            Err(_) => return Ok(Value::Null),
        };
        Self::check_api_response(&data, status.as_u16())?;
        Ok(data)
    }
}

// ---------------------------------------------------------------------------
// Service-area clients
// ---------------------------------------------------------------------------

macro_rules! endpoint {
    ($(#[$meta:meta])* $name:ident, $path:expr) => {
        $(#[$meta])*
        pub async fn $name(&self) -> Result<Value, PlatformError> {
            self.client.get($path, &[]).await
        }
    };
}

pub struct LoyaltyApi {
    client: Arc<PlatformClient>,
}

impl LoyaltyApi {
    pub fn new(client: Arc<PlatformClient>) -> Self {
        Self { client }
    }

    pub async fn list_programs(&self) -> Result<Value, PlatformError> {
        self.client
            .get(&format!("{}/programs", SERVICE_EMF), &[])
            .await
    }

    pub async fn list_tiers(&self, program_id: i64) -> Result<Value, PlatformError> {
        self.client
            .get(&format!("{}/programs/{}/tiers", SERVICE_EMF, program_id), &[])
            .await
    }

    pub async fn list_earning_strategies(&self, program_id: i64) -> Result<Value, PlatformError> {
        self.client
            .get(
                &format!("{}/programs/{}/strategies", SERVICE_EMF, program_id),
                &[("strategyType", "EARNING".to_string())],
            )
            .await
    }

    pub async fn list_expiry_strategies(&self, program_id: i64) -> Result<Value, PlatformError> {
        self.client
            .get(
                &format!("{}/programs/{}/strategies", SERVICE_EMF, program_id),
                &[("strategyType", "EXPIRY".to_string())],
            )
            .await
    }

    endpoint!(list_alternate_currencies, &format!("{}/currencies", SERVICE_EMF));

    pub async fn list_partner_programs(&self, program_id: i64) -> Result<Value, PlatformError> {
        self.client
            .get(&format!("{}/programs/{}/partnerPrograms", SERVICE_EMF, program_id), &[])
            .await
    }

    endpoint!(list_event_types, &format!("{}/eventTypes", SERVICE_EMF));

    pub async fn list_custom_fields(&self, program_id: i64) -> Result<Value, PlatformError> {
        self.client
            .get(&format!("{}/programs/{}/customFields", SERVICE_EMF, program_id), &[])
            .await
    }
}

pub struct CampaignApi {
    client: Arc<PlatformClient>,
}

impl CampaignApi {
    pub fn new(client: Arc<PlatformClient>) -> Self {
        Self { client }
    }

    pub async fn list_campaigns(&self) -> Result<Value, PlatformError> {
        self.client
            .get(
                &format!("{}/campaigns", SERVICE_ARYA),
                &[("limit", "100".to_string()), ("offset", "0".to_string())],
            )
            .await
    }

    pub async fn get_campaign_details(&self, campaign_id: i64) -> Result<Value, PlatformError> {
        self.client
            .get(&format!("{}/campaigns/{}", SERVICE_ARYA, campaign_id), &[])
            .await
    }

    pub async fn list_campaign_messages(&self, campaign_id: i64) -> Result<Value, PlatformError> {
        self.client
            .get(&format!("{}/campaigns/{}/messages", SERVICE_ARYA, campaign_id), &[])
            .await
    }

    // Template stores live behind cookie-auth services.
    endpoint!(list_sms_templates, &format!("{}/templates/sms", SERVICE_IRIS));
    endpoint!(list_email_templates, &format!("{}/templates", SERVICE_CREATIVES));
}

pub struct PromotionApi {
    client: Arc<PlatformClient>,
}

impl PromotionApi {
    pub fn new(client: Arc<PlatformClient>) -> Self {
        Self { client }
    }

    pub async fn list_loyalty_promotions(&self, program_id: i64) -> Result<Value, PlatformError> {
        self.client
            .get(
                &format!("{}/promotions", SERVICE_PROMOTIONS),
                &[("programId", program_id.to_string())],
            )
            .await
    }

    endpoint!(list_cart_promotions, &format!("{}/cart-promotions", SERVICE_PROMOTIONS));
    endpoint!(list_custom_fields, &format!("{}/customFields", SERVICE_PROMOTIONS));
    endpoint!(list_rewards_groups, &format!("{}/rewards/groups", SERVICE_REWARD_CORE));
}

pub struct CouponApi {
    client: Arc<PlatformClient>,
}

impl CouponApi {
    pub fn new(client: Arc<PlatformClient>) -> Self {
        Self { client }
    }

    pub async fn list_coupon_series(
        &self,
        program_id: Option<i64>,
    ) -> Result<Value, PlatformError> {
        let mut params = vec![("ownedBy", "NONE".to_string())];
        if let Some(pid) = program_id {
            params.push(("ownerId", pid.to_string()));
        }
        self.client
            .get(&format!("{}/config", SERVICE_COUPONS), &params)
            .await
    }

    endpoint!(get_product_categories, &format!("{}/productCategories", SERVICE_COUPONS));
    endpoint!(get_product_brands, &format!("{}/productBrands", SERVICE_COUPONS));
    endpoint!(get_product_attributes, &format!("{}/productAttributes", SERVICE_COUPONS));
}

pub struct AudienceApi {
    client: Arc<PlatformClient>,
}

impl AudienceApi {
    pub fn new(client: Arc<PlatformClient>) -> Self {
        Self { client }
    }

    endpoint!(list_audiences, &format!("{}/audiences", SERVICE_NSE));
    endpoint!(list_target_groups, &format!("{}/targetGroups", SERVICE_INTOUCH_V3));
    endpoint!(list_behavioral_events, &format!("{}/behavioralEvents", SERVICE_NSE));
    endpoint!(dim_attr_availability, &format!("{}/dimAttrAvailability", SERVICE_ADIONA));
}

pub struct ExtendedFieldsApi {
    client: Arc<PlatformClient>,
}

impl ExtendedFieldsApi {
    pub fn new(client: Arc<PlatformClient>) -> Self {
        Self { client }
    }

    pub async fn extended_fields(&self, entity: &str) -> Result<Value, PlatformError> {
        self.client
            .get(
                &format!("{}/extendedFields", SERVICE_INTOUCH_V2),
                &[("entityType", entity.to_uppercase())],
            )
            .await
    }
}

pub struct OrgSettingsApi {
    client: Arc<PlatformClient>,
}

impl OrgSettingsApi {
    pub fn new(client: Arc<PlatformClient>) -> Self {
        Self { client }
    }

    endpoint!(behavioral_events, &format!("{}/behavioralEvents", SERVICE_ORG_SETTINGS));
    endpoint!(customer_labels, &format!("{}/customerLabels", SERVICE_ORG_SETTINGS));
    endpoint!(org_hierarchy, &format!("{}/orgHierarchy", SERVICE_ORG_SETTINGS));
    endpoint!(target_groups, &format!("{}/targetGroups", SERVICE_ORG_SETTINGS));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> PlatformClient {
        PlatformClient::new("api.example.com", "tok-123", "42").unwrap()
    }

    fn header(headers: &[(String, String)], name: &str) -> Option<String> {
        headers.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone())
    }

    #[test]
    fn bearer_paths_never_carry_cookie() {
        let c = client();
        let headers = c.prepare_headers("/loyalty/emf/v1/programs").unwrap();
        assert_eq!(header(&headers, "Authorization").unwrap(), "Bearer tok-123");
        assert!(header(&headers, "Cookie").is_none());
    }

    #[test]
    fn cookie_paths_never_carry_authorization() {
        let c = client();
        let headers = c.prepare_headers("/iris/v2/templates/sms").unwrap();
        assert!(header(&headers, "Authorization").is_none());
        assert_eq!(header(&headers, "Cookie").unwrap(), "CT=tok-123; OID=42");
        assert!(header(&headers, "User-Agent").unwrap().contains("Mozilla"));
        assert!(header(&headers, "X-CAP-REQUEST-ID").is_some());
    }

    #[test]
    fn auth_isolation_holds_for_every_marker() {
        let c = client();
        for marker in COOKIE_AUTH_MARKERS {
            let path = format!("{}resource", marker);
            let headers = c.prepare_headers(&path).unwrap();
            assert!(header(&headers, "Authorization").is_none(), "leak on {}", path);
            assert!(header(&headers, "Cookie").is_some(), "missing cookie on {}", path);
        }
    }

    #[test]
    fn alternating_auth_modes_do_not_leak_state() {
        let c = client();
        let first = c.prepare_headers("/loyalty/emf/v1/programs").unwrap();
        let _cookie = c.prepare_headers("/iris/v2/templates/sms").unwrap();
        let third = c.prepare_headers("/loyalty/emf/v1/programs").unwrap();
        assert_eq!(header(&first, "Authorization"), header(&third, "Authorization"));
        assert!(header(&third, "Cookie").is_none());
    }

    #[test]
    fn envelope_errors_are_detected() {
        let err = PlatformClient::check_api_response(
            &serde_json::json!({"success": false, "message": "nope"}),
            200,
        )
        .unwrap_err();
        assert!(err.to_string().contains("success=false"));

        let err = PlatformClient::check_api_response(
            &serde_json::json!({"status": {"code": 401, "message": "denied"}}),
            200,
        )
        .unwrap_err();
        assert!(err.is_auth_error());

        assert!(PlatformClient::check_api_response(
            &serde_json::json!({"status": {"code": 200}, "data": []}),
            200
        )
        .is_ok());
    }
}
