use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::targets::{ProxyClient, ProxyRegistry, SignValidator};

/// Success envelope of the gateway.
///
/// Serializes as `{"CODE":"ok","DATA":<data>}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(rename = "CODE")]
    pub code: &'static str,
    #[serde(rename = "DATA")]
    pub data: Option<T>,
}

impl ApiResponse<()> {
    /// Acknowledgement with no payload (`"DATA": null`).
    pub fn empty() -> Self {
        Self {
            code: "ok",
            data: None,
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: "ok",
            data: Some(data),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, axum::Json(self)).into_response()
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Whether the initialization action has run
    pub initialized: bool,
    /// Whether the gate is disabled by configuration
    pub gate_disabled: bool,
    /// Service version
    pub version: String,
    /// Seconds since the process started
    pub uptime_seconds: u64,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Current settings of the signing validator (secrets omitted).
#[derive(Debug, Serialize)]
pub struct SignSettings {
    pub enabled: bool,
    pub sign_key_set: bool,
}

impl From<&SignValidator> for SignSettings {
    fn from(sign: &SignValidator) -> Self {
        Self {
            enabled: sign.is_enabled(),
            sign_key_set: sign.has_sign_key(),
        }
    }
}

/// Current settings of one proxy client (secrets omitted).
#[derive(Debug, Serialize)]
pub struct ProxyClientSettings {
    #[serde(flatten)]
    pub client: ProxyClient,
    pub sign_key_set: bool,
}

impl From<ProxyClient> for ProxyClientSettings {
    fn from(client: ProxyClient) -> Self {
        let sign_key_set = client.has_sign_key();
        Self {
            client,
            sign_key_set,
        }
    }
}

/// Settings snapshot of the middlewares configured by initialization.
#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    /// `None` when no signing validator is registered
    pub apisign: Option<SignSettings>,
    /// Clients by backend alias, empty when no proxy is registered
    pub apiproxy: BTreeMap<String, ProxyClientSettings>,
}

impl SettingsResponse {
    pub fn collect(sign: Option<&SignValidator>, proxy: Option<&ProxyRegistry>) -> Self {
        Self {
            apisign: sign.map(SignSettings::from),
            apiproxy: proxy
                .map(|p| {
                    p.snapshot()
                        .into_iter()
                        .map(|(alias, client)| (alias, client.into()))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_response_serialization() {
        let json = serde_json::to_string(&ApiResponse::empty()).unwrap();
        assert_eq!(json, r#"{"CODE":"ok","DATA":null}"#);
    }

    #[test]
    fn test_ok_response_serialization() {
        let json = serde_json::to_value(ApiResponse::ok(vec![1, 2])).unwrap();
        assert_eq!(json["CODE"], "ok");
        assert_eq!(json["DATA"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_settings_response_hides_secrets() {
        let sign = SignValidator::new("sign-secret", true);
        let proxy = ProxyRegistry::with_aliases(["b1"]);
        proxy.update_client("b1", |c| {
            c.sign_key = "client-secret".to_string();
            c.gw_url = "http://gw".to_string();
        });

        let response = SettingsResponse::collect(Some(&sign), Some(&proxy));
        let json = serde_json::to_string(&response).unwrap();

        assert!(!json.contains("secret"));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["apisign"]["sign_key_set"], true);
        assert_eq!(value["apiproxy"]["b1"]["gw_url"], "http://gw");
        assert_eq!(value["apiproxy"]["b1"]["sign_key_set"], true);
    }

    #[test]
    fn test_settings_response_without_middlewares() {
        let response = SettingsResponse::collect(None, None);
        assert!(response.apisign.is_none());
        assert!(response.apiproxy.is_empty());
    }
}
