//! Gateway engine configuration

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{IdentifyProperties, PresenceUpdatePayload};
use crate::ratelimit::RateLimitConfig;
use crate::shard::{ReconnectBackoff, SessionState};
use crate::transport::{Compression, FrameDecoder, Utf8Decoder};
use fluxer_common::ClientConfig;
use fluxer_core::Intents;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Builds a fresh [`FrameDecoder`] for every socket
pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn FrameDecoder> + Send + Sync>;

/// What a caller send does when the command budget is empty
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SendPolicy {
    /// Wait for the window to reset, then retry once
    #[default]
    Block,
    /// Fail immediately with `RateLimited`
    NonBlocking,
}

/// Configuration shared by every shard of a client
#[derive(Clone)]
pub struct GatewayConfig {
    pub token: String,

    /// Base gateway URL, without query parameters
    pub gateway_url: String,

    pub version: u8,
    pub compression: Compression,
    pub intents: Intents,

    /// Member count above which offline members are omitted
    pub large_threshold: u32,

    pub properties: IdentifyProperties,

    /// Presence advertised in Identify
    pub presence: Option<PresenceUpdatePayload>,

    pub auto_reconnect: bool,

    /// Shard count to use instead of the recommended one
    pub shard_count: Option<u32>,

    pub rate_limit: RateLimitConfig,
    pub send_policy: SendPolicy,
    pub backoff: ReconnectBackoff,

    /// Upper bound for closing a shard
    pub shutdown_timeout: Duration,

    /// Session to resume on the first connect
    pub session: Option<SessionState>,

    decoder: DecoderFactory,
}

impl GatewayConfig {
    pub const DEFAULT_GATEWAY_URL: &'static str = "wss://gateway.fluxer.app";
    pub const DEFAULT_VERSION: u8 = 1;
    pub const DEFAULT_LARGE_THRESHOLD: u32 = 50;
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            gateway_url: Self::DEFAULT_GATEWAY_URL.to_string(),
            version: Self::DEFAULT_VERSION,
            compression: Compression::None,
            intents: Intents::default(),
            large_threshold: Self::DEFAULT_LARGE_THRESHOLD,
            properties: IdentifyProperties::default(),
            presence: None,
            auto_reconnect: true,
            shard_count: None,
            rate_limit: RateLimitConfig::default(),
            send_policy: SendPolicy::Block,
            backoff: ReconnectBackoff::default(),
            shutdown_timeout: Self::DEFAULT_SHUTDOWN_TIMEOUT,
            session: None,
            decoder: Arc::new(|| Box::new(Utf8Decoder) as Box<dyn FrameDecoder>),
        }
    }

    /// Engine configuration from environment-loaded client settings
    #[must_use]
    pub fn from_client_config(client: &ClientConfig) -> Self {
        let mut config = Self::new(client.token.clone())
            .with_intents(client.intents)
            .with_large_threshold(client.large_threshold)
            .with_auto_reconnect(client.auto_reconnect);
        if let Some(url) = &client.gateway_url {
            config.gateway_url.clone_from(url);
        }
        config.shard_count = client.shard_count;
        config
    }

    #[must_use]
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    #[must_use]
    pub fn with_large_threshold(mut self, large_threshold: u32) -> Self {
        self.large_threshold = large_threshold;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: IdentifyProperties) -> Self {
        self.properties = properties;
        self
    }

    #[must_use]
    pub fn with_presence(mut self, presence: PresenceUpdatePayload) -> Self {
        self.presence = Some(presence);
        self
    }

    #[must_use]
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    #[must_use]
    pub fn with_shard_count(mut self, shard_count: u32) -> Self {
        self.shard_count = Some(shard_count);
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    #[must_use]
    pub fn with_send_policy(mut self, send_policy: SendPolicy) -> Self {
        self.send_policy = send_policy;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Resume this session on the first connect instead of identifying
    #[must_use]
    pub fn with_session(mut self, session: SessionState) -> Self {
        self.session = Some(session);
        self
    }

    /// Decoder for binary frames, e.g. a zlib-stream inflater
    #[must_use]
    pub fn with_decoder<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn FrameDecoder> + Send + Sync + 'static,
    {
        self.decoder = Arc::new(factory);
        self
    }

    pub(crate) fn new_decoder(&self) -> Box<dyn FrameDecoder> {
        (self.decoder)()
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.token.trim().is_empty() {
            return Err(GatewayError::InvalidConfig("token is empty".to_string()));
        }
        if self.gateway_url.is_empty() {
            return Err(GatewayError::InvalidConfig("gateway url is empty".to_string()));
        }
        if self.version == 0 {
            return Err(GatewayError::InvalidConfig("version must be positive".to_string()));
        }
        if !(50..=250).contains(&self.large_threshold) {
            return Err(GatewayError::InvalidConfig(format!(
                "large threshold {} outside 50..=250",
                self.large_threshold
            )));
        }
        if self.shard_count == Some(0) {
            return Err(GatewayError::InvalidConfig("shard count must be positive".to_string()));
        }
        if self.rate_limit.capacity == 0 || self.rate_limit.window.is_zero() {
            return Err(GatewayError::InvalidConfig(
                "rate limit needs a positive capacity and window".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("gateway_url", &self.gateway_url)
            .field("version", &self.version)
            .field("compression", &self.compression)
            .field("intents", &self.intents)
            .field("large_threshold", &self.large_threshold)
            .field("properties", &self.properties)
            .field("presence", &self.presence)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("shard_count", &self.shard_count)
            .field("rate_limit", &self.rate_limit)
            .field("send_policy", &self.send_policy)
            .field("backoff", &self.backoff)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("session", &self.session)
            .finish()
    }
}
