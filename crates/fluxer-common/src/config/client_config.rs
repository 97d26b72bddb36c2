//! Client configuration
//!
//! Loads the bot credentials and gateway settings from environment variables.

use fluxer_core::Intents;
use serde::Deserialize;
use std::env;
use std::fmt;

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// Client configuration loaded from the environment
#[derive(Clone)]
pub struct ClientConfig {
    /// Bot token, sent in Identify and as the REST `Authorization` header
    pub token: String,
    /// REST API base URL, used to fetch gateway info
    pub api_url: String,
    /// Explicit gateway URL; fetched from the API when absent
    pub gateway_url: Option<String>,
    /// Explicit shard count; the recommended count is used when absent
    pub shard_count: Option<u32>,
    pub intents: Intents,
    pub auto_reconnect: bool,
    pub large_threshold: u32,
    pub env: Environment,
}

// Default value functions
fn default_api_url() -> String {
    "https://api.fluxer.app/v1".to_string()
}

fn default_large_threshold() -> u32 {
    50
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_url: default_api_url(),
            gateway_url: None,
            shard_count: None,
            intents: Intents::default(),
            auto_reconnect: true,
            large_threshold: default_large_threshold(),
            env: Environment::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `FLUXER_TOKEN` is missing or a variable cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("FLUXER_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingVar("FLUXER_TOKEN"))?;

        let mut config = Self::new(token);

        if let Some(url) = lookup("FLUXER_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        config.gateway_url = lookup("FLUXER_GATEWAY_URL").filter(|u| !u.is_empty());

        if let Some(raw) = lookup("FLUXER_SHARD_COUNT") {
            let count: u32 = parse_var("FLUXER_SHARD_COUNT", &raw)?;
            if count == 0 {
                return Err(ConfigError::InvalidValue("FLUXER_SHARD_COUNT", raw));
            }
            config.shard_count = Some(count);
        }

        if let Some(raw) = lookup("FLUXER_INTENTS") {
            config.intents = Intents::parse(&raw)
                .map_err(|_| ConfigError::InvalidValue("FLUXER_INTENTS", raw.clone()))?;
        }

        if let Some(raw) = lookup("FLUXER_AUTO_RECONNECT") {
            config.auto_reconnect = parse_bool("FLUXER_AUTO_RECONNECT", &raw)?;
        }

        if let Some(raw) = lookup("FLUXER_LARGE_THRESHOLD") {
            config.large_threshold = parse_var("FLUXER_LARGE_THRESHOLD", &raw)?;
        }

        if let Some(raw) = lookup("APP_ENV") {
            config.env = Environment::parse(&raw).unwrap_or_default();
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name, raw.to_string()))
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(name, raw.to_string())),
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("gateway_url", &self.gateway_url)
            .field("shard_count", &self.shard_count)
            .field("intents", &self.intents)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("large_threshold", &self.large_threshold)
            .field("env", &self.env)
            .finish()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
