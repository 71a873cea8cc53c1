//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `hubmq.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use hubmq_broker::BrokerOptions;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Request broker settings.
    pub broker: BrokerConfig,
    /// Event forwarder settings.
    pub events: EventsConfig,
    /// Liveness and queue tuning.
    pub heartbeat: HeartbeatConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Request broker listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port for the request/reply endpoint.
    pub request_port: u16,
}

/// Event forwarder listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// TCP port publishers connect to.
    pub in_port: u16,
    /// TCP port subscribers connect to.
    pub out_port: u16,
}

/// Heartbeat and queue tuning.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Heartbeat cadence in milliseconds.
    pub interval_ms: u64,
    /// Missed intervals tolerated before a worker is evicted.
    pub liveness: u32,
    /// Per-service cap on queued requests.
    pub max_pending: usize,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Config {
    /// Load configuration from `hubmq.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or
    /// parsed, or when the resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("hubmq.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HUBMQ_HOST") {
            self.broker.host = val;
        }
        if let Ok(val) = std::env::var("HUBMQ_REQUEST_PORT") {
            if let Ok(port) = val.parse() {
                self.broker.request_port = port;
            }
        }
        if let Ok(val) = std::env::var("HUBMQ_EVENTS_IN_PORT") {
            if let Ok(port) = val.parse() {
                self.events.in_port = port;
            }
        }
        if let Ok(val) = std::env::var("HUBMQ_EVENTS_OUT_PORT") {
            if let Ok(port) = val.parse() {
                self.events.out_port = port;
            }
        }
        if let Ok(val) = std::env::var("HUBMQ_LOG") {
            self.logging.filter = val;
        } else if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let ports = [
            self.broker.request_port,
            self.events.in_port,
            self.events.out_port,
        ];
        if ports.contains(&0) {
            return Err(ConfigError::Validation(
                "ports must be greater than zero".to_string(),
            ));
        }
        if ports[0] == ports[1] || ports[0] == ports[2] || ports[1] == ports[2] {
            return Err(ConfigError::Validation(
                "request and event ports must be distinct".to_string(),
            ));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "heartbeat interval must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat.liveness == 0 {
            return Err(ConfigError::Validation(
                "heartbeat liveness must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat.max_pending == 0 {
            return Err(ConfigError::Validation(
                "pending request capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Request endpoint in `tcp://host:port` form.
    #[must_use]
    pub fn request_addr(&self) -> String {
        format!("tcp://{}:{}", self.broker.host, self.broker.request_port)
    }

    /// Publisher-facing event endpoint in `tcp://host:port` form.
    #[must_use]
    pub fn events_in_addr(&self) -> String {
        format!("tcp://{}:{}", self.broker.host, self.events.in_port)
    }

    /// Subscriber-facing event endpoint in `tcp://host:port` form.
    #[must_use]
    pub fn events_out_addr(&self) -> String {
        format!("tcp://{}:{}", self.broker.host, self.events.out_port)
    }

    /// Broker tuning derived from the heartbeat section.
    #[must_use]
    pub fn broker_options(&self) -> BrokerOptions {
        BrokerOptions {
            heartbeat_interval: std::time::Duration::from_millis(self.heartbeat.interval_ms),
            liveness: self.heartbeat.liveness,
            max_pending: self.heartbeat.max_pending,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            request_port: 40410,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            in_port: 40411,
            out_port: 40412,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2500,
            liveness: 3,
            max_pending: 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "hubmqd=info,hubmq_broker=info,hubmq_client=info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.broker.host, "0.0.0.0");
        assert_eq!(config.broker.request_port, 40410);
        assert_eq!(config.events.in_port, 40411);
        assert_eq!(config.events.out_port, 40412);
        assert_eq!(config.heartbeat.interval_ms, 2500);
        assert_eq!(config.heartbeat.liveness, 3);
        assert_eq!(config.heartbeat.max_pending, 1024);
    }

    #[test]
    fn should_parse_minimal_toml() {
        let toml = "";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.broker.request_port, 40410);
        assert_eq!(config.logging.filter, LoggingConfig::default().filter);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [broker]
            host = '127.0.0.1'
            request_port = 5550

            [events]
            in_port = 5551
            out_port = 5552

            [heartbeat]
            interval_ms = 1000
            liveness = 5
            max_pending = 64

            [logging]
            filter = 'debug'
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.broker.host, "127.0.0.1");
        assert_eq!(config.broker.request_port, 5550);
        assert_eq!(config.events.in_port, 5551);
        assert_eq!(config.events.out_port, 5552);
        assert_eq!(config.heartbeat.interval_ms, 1000);
        assert_eq!(config.heartbeat.liveness, 5);
        assert_eq!(config.heartbeat.max_pending, 64);
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn should_parse_partial_toml_keeping_defaults() {
        let toml = "
            [broker]
            request_port = 6000
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.broker.host, "0.0.0.0");
        assert_eq!(config.broker.request_port, 6000);
        assert_eq!(config.events.in_port, 40411);
    }

    #[test]
    fn should_fall_back_to_defaults_when_file_missing() {
        let config = Config::from_file("/nonexistent/hubmq.toml").unwrap();
        assert_eq!(config.broker.request_port, 40410);
    }

    #[test]
    fn should_reject_invalid_toml() {
        let result = toml::from_str::<Config>("broker = nope");
        assert!(result.is_err());
    }

    #[test]
    fn should_reject_zero_port() {
        let mut config = Config::default();
        config.broker.request_port = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn should_reject_colliding_ports() {
        let mut config = Config::default();
        config.events.in_port = config.broker.request_port;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn should_reject_zero_heartbeat_interval() {
        let mut config = Config::default();
        config.heartbeat.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_zero_liveness() {
        let mut config = Config::default();
        config.heartbeat.liveness = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_zero_pending_capacity() {
        let mut config = Config::default();
        config.heartbeat.max_pending = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_accept_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn should_format_bind_addresses() {
        let config = Config::default();
        assert_eq!(config.request_addr(), "tcp://0.0.0.0:40410");
        assert_eq!(config.events_in_addr(), "tcp://0.0.0.0:40411");
        assert_eq!(config.events_out_addr(), "tcp://0.0.0.0:40412");
    }

    #[test]
    fn should_build_broker_options() {
        let mut config = Config::default();
        config.heartbeat.interval_ms = 1000;
        config.heartbeat.liveness = 2;
        let options = config.broker_options();
        assert_eq!(
            options.heartbeat_interval,
            std::time::Duration::from_millis(1000)
        );
        assert_eq!(options.liveness, 2);
        assert_eq!(options.max_pending, 1024);
    }
}
