//! Gateway discovery
//!
//! The REST layer tells a bot where to connect, how many shards to run and
//! how many sessions it may still start. [`HttpGatewayInfo`] fetches this
//! from `GET {api}/gateway/bot`.

use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Response of the gateway discovery endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub url: String,

    /// Recommended shard count
    pub shards: u32,

    pub session_start_limit: SessionStartLimit,
}

/// Identify quota of the credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,

    /// Milliseconds until `remaining` returns to `total`
    pub reset_after: u64,

    /// Identify slots per refill period
    pub max_concurrency: u32,
}

impl SessionStartLimit {
    #[must_use]
    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after)
    }
}

impl Default for SessionStartLimit {
    fn default() -> Self {
        Self {
            total: 1000,
            remaining: 1000,
            reset_after: 0,
            max_concurrency: 1,
        }
    }
}

/// Source of [`GatewayInfo`]
#[async_trait]
pub trait GatewayInfoProvider: Send + Sync {
    async fn fetch_gateway_info(&self) -> GatewayResult<GatewayInfo>;
}

/// Fetches gateway info over HTTP
pub struct HttpGatewayInfo {
    http: reqwest::Client,
    api_url: String,
}

impl HttpGatewayInfo {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Client for `api_url` (e.g. `https://api.fluxer.app/v1`) authenticated
    /// as the given bot token.
    pub fn new(api_url: impl Into<String>, token: &str) -> GatewayResult<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bot {token}"))
            .map_err(|e| GatewayError::InvalidConfig(format!("invalid token header: {e}")))?;
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/gateway/bot", self.api_url)
    }
}

impl fmt::Debug for HttpGatewayInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGatewayInfo")
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[async_trait]
impl GatewayInfoProvider for HttpGatewayInfo {
    async fn fetch_gateway_info(&self) -> GatewayResult<GatewayInfo> {
        let info: GatewayInfo = self
            .http
            .get(self.endpoint())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::info!(
            url = %info.url,
            shards = info.shards,
            remaining = info.session_start_limit.remaining,
            max_concurrency = info.session_start_limit.max_concurrency,
            "Fetched gateway info"
        );

        Ok(info)
    }
}
