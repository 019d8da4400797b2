// RaspAP REST API client (client-count endpoint)

//! RaspAP client-count API
//!
//! Thin client for the RaspAP REST endpoint that reports the stations
//! associated with the AP interface. Credentials come from the
//! environment; with no API key configured the call is skipped entirely
//! and the count is zero. This is informational data, so every failure
//! degrades to a zero count.

use serde_json::Value;
use std::time::Duration;

/// Environment variable holding the RaspAP API key.
pub const API_KEY_ENV: &str = "RASPAP_API_KEY";
/// Environment variable overriding the RaspAP API base URL.
pub const BASE_URL_ENV: &str = "RASPAP_API_BASE_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:8081";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the RaspAP REST API.
pub struct RaspApClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RaspApClient {
    /// Build from the environment. A missing API key is not an error; it
    /// just disables the API calls.
    pub fn from_env() -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        let base_url =
            std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        if api_key.is_none() {
            log::debug!("{} not set, client counts will read 0", API_KEY_ENV);
        }

        Self::new(base_url, api_key)
    }

    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Number of stations currently associated with the AP interface.
    /// Missing credentials, transport failures, and unexpected bodies all
    /// yield zero.
    pub async fn active_clients(&self, ap_iface: &str) -> u32 {
        let Some(api_key) = &self.api_key else {
            return 0;
        };

        let url = format!("{}/clients/{}", self.base_url, ap_iface);
        let response = match self
            .http
            .get(&url)
            .header("access_token", api_key)
            .header("accept", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::debug!("RaspAP API error [{}]: {}", url, e);
                return 0;
            }
        };

        if !response.status().is_success() {
            log::debug!("RaspAP API [{}] returned {}", url, response.status());
            return 0;
        }

        match response.json::<Value>().await {
            Ok(body) => count_active_clients(&body),
            Err(e) => {
                log::debug!("RaspAP API [{}] body was not JSON: {}", url, e);
                0
            }
        }
    }
}

/// Count the entries of the `active_clients` field, which the API reports
/// as either an array or an object keyed by MAC.
fn count_active_clients(body: &Value) -> u32 {
    match body.get("active_clients") {
        Some(Value::Array(list)) => list.len() as u32,
        Some(Value::Object(map)) => map.len() as u32,
        _ => 0,
    }
}
