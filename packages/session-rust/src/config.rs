//! Adapter configuration types.
//!
//! All durations are stored as integer milliseconds so the structs map
//! directly onto JSON; accessors convert to [`Duration`].

use std::time::Duration;

use serde::Deserialize;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse adapter config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("client.retry_interval_ms must be greater than zero")]
    ZeroRetryInterval,
}

/// Top-level configuration for both adapters and logging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub client: ClientConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl AdapterConfig {
    /// Parses and validates a JSON document. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::ZeroRetryInterval`] for a zero retry interval.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroRetryInterval`] for a zero retry interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.retry_interval_ms == 0 {
            return Err(ConfigError::ZeroRetryInterval);
        }
        Ok(())
    }
}

/// Client adapter settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Pause between resends after a transient rejection.
    pub retry_interval_ms: u64,
    /// Budget applied to requests that carry no timeout of their own.
    pub default_timeout_ms: Option<u64>,
}

impl ClientConfig {
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 100,
            default_timeout_ms: None,
        }
    }
}

/// Server adapter settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host part of the `mbus://` URIs built for inbound messages.
    pub host: String,
    /// How long `close_and_drain` waits for in-flight requests.
    pub drain_timeout_ms: u64,
}

impl ServerConfig {
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            drain_timeout_ms: 30_000,
        }
    }
}

/// Subscriber settings for [`crate::telemetry::init_tracing`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}
