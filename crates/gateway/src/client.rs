//! HTTP provider client.
//!
//! Posts the parcel geometry, index and date to the provider's values
//! endpoint and classifies the response into [`GatewayError`] variants.
//! Access tokens are cached and dropped as soon as the provider answers 401.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use moka::future::Cache;
use monitor_core::{Boundary, IndexType};
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use telemetry::{health, metrics};
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::GatewayError;
use crate::{ProviderGateway, RawValues};

/// One token per configured client id.
const TOKEN_CACHE_MAX_CAPACITY: u64 = 16;

#[derive(Debug, Serialize)]
struct ValuesRequest<'a> {
    geometry: serde_json::Value,
    index: &'a str,
    date: NaiveDate,
    max_cloud_coverage: u8,
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Provider gateway over HTTP.
#[derive(Clone)]
pub struct HttpGateway {
    config: ProviderConfig,
    http_client: reqwest::Client,
    /// client id -> access token
    tokens: Cache<String, String>,
}

impl HttpGateway {
    /// Creates a new HTTP gateway.
    pub fn new(config: ProviderConfig) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::fatal(format!("failed to create HTTP client: {}", e)))?;

        let tokens = Cache::builder()
            .max_capacity(TOKEN_CACHE_MAX_CAPACITY)
            .time_to_live(config.token_ttl())
            .build();

        Ok(Self {
            config,
            http_client,
            tokens,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Returns a bearer token, or `None` when no credentials are configured.
    async fn access_token(&self) -> Result<Option<String>, GatewayError> {
        let Some((client_id, client_secret)) = self.config.credentials() else {
            return Ok(None);
        };

        if let Some(cached) = self.tokens.get(client_id).await {
            debug!("Provider token cache hit");
            return Ok(Some(cached));
        }

        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Provider token request failed");
            return Err(match GatewayError::from_status(status.as_u16(), None, &body) {
                // a missing token endpoint is a configuration problem, not a data gap
                GatewayError::NoData => GatewayError::fatal("token endpoint not found"),
                other => other,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::transient(format!("invalid token response: {}", e)))?;

        self.tokens
            .insert(client_id.to_string(), token.access_token.clone())
            .await;

        Ok(Some(token.access_token))
    }

    async fn invalidate_token(&self) {
        if let Some((client_id, _)) = self.config.credentials() {
            self.tokens.invalidate(client_id).await;
        }
    }

    async fn request_values(
        &self,
        boundary: &Boundary,
        index_type: IndexType,
        date: NaiveDate,
    ) -> Result<RawValues, GatewayError> {
        let token = self.access_token().await?;

        let payload = ValuesRequest {
            geometry: boundary.to_geojson(),
            index: index_type.as_str(),
            date,
            max_cloud_coverage: self.config.max_cloud_coverage,
        };

        let mut request = self.http_client.post(self.config.values_url()).json(&payload);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
        }

        if !status.is_success() || status == reqwest::StatusCode::NO_CONTENT {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status.as_u16(), retry_after, &body));
        }

        let body: ValuesResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::transient(format!("invalid values response: {}", e)))?;

        if body.values.is_empty() {
            return Err(GatewayError::NoData);
        }

        Ok(RawValues::new(
            body.values
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect(),
        ))
    }
}

#[async_trait]
impl ProviderGateway for HttpGateway {
    async fn fetch(
        &self,
        boundary: &Boundary,
        index_type: IndexType,
        date: NaiveDate,
    ) -> Result<RawValues, GatewayError> {
        let start = Instant::now();
        let result = self.request_values(boundary, index_type, date).await;

        metrics().gateway_requests.inc();
        metrics()
            .fetch_latency_ms
            .observe(start.elapsed().as_millis() as u64);

        match &result {
            Ok(values) => {
                health().provider.set_healthy();
                debug!(
                    index_type = %index_type,
                    date = %date,
                    pixels = values.values.len(),
                    latency_ms = %start.elapsed().as_millis(),
                    "Fetched provider values"
                );
            }
            Err(GatewayError::NoData) => health().provider.set_healthy(),
            Err(e) => {
                metrics().gateway_errors.inc();
                if matches!(e, GatewayError::Fatal(_)) {
                    health().provider.set_unhealthy(e.to_string());
                }
            }
        }

        result
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Transport-level failures are retryable unless the request itself was malformed.
fn classify_transport(e: reqwest::Error) -> GatewayError {
    if e.is_builder() {
        GatewayError::fatal(format!("invalid provider request: {}", e))
    } else {
        GatewayError::transient(format!("provider request failed: {}", e))
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
