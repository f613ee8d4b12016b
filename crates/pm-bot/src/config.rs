//! Configuration for pm-bot.
//!
//! Loaded from a TOML file with env-var overrides for endpoints.
//! Credentials never live in the file; see `gate::Credentials`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use pm_core::OrderType;
use pm_feed::{BackoffPolicy, SessionConfig};

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BotConfig {
    /// Logging level (trace/debug/info/warn/error).
    pub log_level: String,
    /// Stream session parameters.
    pub stream: StreamConfig,
    /// Trading gateway endpoint.
    pub gateway: GatewayConfig,
    /// The monitored market.
    pub market: MarketConfig,
    /// Engine parameters.
    pub trading: TradingConfig,
}

/// Stream session parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Market channel WebSocket URL.
    pub ws_url: String,
    /// Connect attempt timeout (seconds).
    pub connect_timeout_secs: u64,
    /// Liveness check cadence (seconds).
    pub heartbeat_interval_secs: u64,
    /// Maximum silence before a forced reconnect (seconds).
    pub heartbeat_timeout_secs: u64,
    /// First reconnect delay (milliseconds).
    pub reconnect_base_ms: u64,
    /// Reconnect delay cap (milliseconds).
    pub reconnect_max_ms: u64,
    /// Consecutive failures before the session goes terminal.
    pub max_retries: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: pm_feed::session::DEFAULT_WS_URL.to_string(),
            connect_timeout_secs: 10,
            heartbeat_interval_secs: 10,
            heartbeat_timeout_secs: 60,
            reconnect_base_ms: 1000,
            reconnect_max_ms: 30000,
            max_retries: 10,
        }
    }
}

impl StreamConfig {
    /// Build the session config for `pm_feed::session::spawn`.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ws_url: self.ws_url.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            backoff: BackoffPolicy {
                base: Duration::from_millis(self.reconnect_base_ms),
                max: Duration::from_millis(self.reconnect_max_ms),
                max_retries: self.max_retries,
            },
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
        }
    }
}

/// Trading gateway endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the order/position gateway.
    pub base_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api/v1/polymarket".to_string(),
        }
    }
}

/// One tradable token of the monitored market.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub token_id: String,
    pub outcome: String,
}

/// The monitored market.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MarketConfig {
    /// Condition ID used for position queries.
    pub condition_id: String,
    /// Tokens to subscribe to and trade.
    pub tokens: Vec<TokenConfig>,
}

/// Engine parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Where rule configs persist.
    pub rules_path: PathBuf,
    /// Position refresh cadence (seconds).
    pub refresh_interval_secs: u64,
    /// Minimum order size used until the venue reports one.
    pub default_min_order_size: Decimal,
    /// Order type for rule fires (GTC/FOK/IOC).
    pub order_type: String,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from("data/rules.json"),
            refresh_interval_secs: 30,
            default_min_order_size: Decimal::ONE,
            order_type: "GTC".to_string(),
        }
    }
}

impl TradingConfig {
    /// Parse the configured order type.
    pub fn order_type(&self) -> Result<OrderType, ConfigError> {
        match self.order_type.to_uppercase().as_str() {
            "GTC" => Ok(OrderType::Gtc),
            "FOK" => Ok(OrderType::Fok),
            "IOC" => Ok(OrderType::Ioc),
            other => Err(ConfigError::Invalid(format!("unknown order type: {other}"))),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: BotConfig = toml::from_str(&contents)?;
        if config.log_level.is_empty() {
            config.log_level = "info".to_string();
        }
        Ok(config)
    }

    /// Apply endpoint overrides from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PM_WS_URL") {
            if !url.trim().is_empty() {
                self.stream.ws_url = url;
            }
        }
        if let Ok(url) = std::env::var("PM_GATEWAY_URL") {
            if !url.trim().is_empty() {
                self.gateway.base_url = url;
            }
        }
    }

    /// Validate before wiring anything up.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.market.condition_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "market.condition_id must be set".to_string(),
            ));
        }
        if self.market.tokens.is_empty() {
            return Err(ConfigError::Invalid(
                "market.tokens must list at least one token".to_string(),
            ));
        }
        for token in &self.market.tokens {
            if token.token_id.trim().is_empty() || token.outcome.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "market.tokens entries need token_id and outcome".to_string(),
                ));
            }
        }
        if self.trading.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "trading.refresh_interval_secs must be positive".to_string(),
            ));
        }
        if self.stream.heartbeat_interval_secs == 0 || self.stream.heartbeat_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "stream heartbeat settings must be positive".to_string(),
            ));
        }
        self.trading.order_type()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            log_level = "debug"

            [market]
            condition_id = "cond1"

            [[market.tokens]]
            token_id = "t1"
            outcome = "Lakers"

            [[market.tokens]]
            token_id = "t2"
            outcome = "Celtics"
        "#
    }

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config: BotConfig = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.market.tokens.len(), 2);
        // untouched sections fall back to defaults
        assert_eq!(config.stream.heartbeat_timeout_secs, 60);
        assert_eq!(config.stream.max_retries, 10);
        assert_eq!(config.trading.refresh_interval_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_market() {
        let config = BotConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validation_rejects_unknown_order_type() {
        let mut config: BotConfig = toml::from_str(minimal_toml()).unwrap();
        config.trading.order_type = "LIMIT".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_config_mapping() {
        let config: BotConfig = toml::from_str(minimal_toml()).unwrap();
        let session = config.stream.session_config();
        assert_eq!(session.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(session.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(session.backoff.base, Duration::from_millis(1000));
        assert_eq!(session.backoff.max, Duration::from_millis(30000));
    }

    #[test]
    fn test_order_type_parsing() {
        let mut trading = TradingConfig::default();
        assert_eq!(trading.order_type().unwrap(), OrderType::Gtc);
        trading.order_type = "ioc".to_string();
        assert_eq!(trading.order_type().unwrap(), OrderType::Ioc);
    }
}
