//! Provider configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Provider HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider API base URL
    pub base_url: String,
    /// OAuth2 token endpoint (client-credentials grant)
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// OAuth2 client id (optional for unauthenticated providers)
    pub client_id: Option<String>,
    /// OAuth2 client secret
    pub client_secret: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum acceptable cloud coverage percentage
    #[serde(default = "default_max_cloud_coverage")]
    pub max_cloud_coverage: u8,
    /// Access token cache lifetime in seconds
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

fn default_token_url() -> String {
    "https://services.sentinel-hub.com/oauth/token".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_cloud_coverage() -> u8 {
    30
}

fn default_token_ttl_secs() -> u64 {
    50 * 60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            token_url: default_token_url(),
            client_id: None,
            client_secret: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_cloud_coverage: default_max_cloud_coverage(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Client credentials, when both halves are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some((id.as_str(), secret.as_str()))
            }
            _ => None,
        }
    }

    /// Endpoint returning per-pixel values.
    pub fn values_url(&self) -> String {
        format!("{}/values", self.base_url.trim_end_matches('/'))
    }
}
