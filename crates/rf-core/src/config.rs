//! Configuration parsing for the rsi-feed pipeline.
//!
//! The producer, the gateway, and the runner all read their settings from a
//! single JSON file. Every block and every field is optional; the accessor
//! methods supply defaults.
//!
//! # Example config
//!
//! ```json
//! {
//!   "service": { "module_name": "rsi-feed", "log_path": "/tmp/log" },
//!   "broker": { "brokers": ["localhost:9092"] },
//!   "producer": { "topic": "trade-data", "source_path": "trades_data.csv", "retry_attempts": 3 },
//!   "gateway": { "listen_addr": "127.0.0.1:8080", "topics": ["trade-data"], "window_size": 20 }
//! }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::FeedError;
use crate::retry::RetryPolicy;

/// Default topic for raw trade payloads.
pub const DEFAULT_TOPIC: &str = "trade-data";
/// Default viewer listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
/// Default number of Updates retained per token.
pub const DEFAULT_WINDOW_SIZE: usize = 20;
/// Default per-viewer send queue capacity.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 256;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    pub service: Option<ServiceMeta>,
    /// Broker connection settings.
    pub broker: Option<BrokerConfig>,
    /// Ingestion producer settings.
    pub producer: Option<ProducerConfig>,
    /// Fan-out gateway settings.
    pub gateway: Option<GatewayConfig>,
}

/// Module metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

/// Broker connection settings. Consumed by broker implementations; the
/// in-process broker only logs them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfig {
    /// Bootstrap addresses (e.g. `["localhost:9092"]`).
    pub brokers: Option<Vec<String>>,
    pub client_id: Option<String>,
}

impl BrokerConfig {
    pub fn brokers(&self) -> Vec<String> {
        self.brokers.clone().unwrap_or_else(|| vec!["localhost:9092".to_string()])
    }
}

/// Ingestion producer settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProducerConfig {
    /// Topic the raw trade payloads are published to.
    pub topic: Option<String>,
    /// CSV dataset path.
    pub source_path: Option<String>,
    /// Total publish attempts per record, including the first (default: 3).
    pub retry_attempts: Option<u32>,
    /// Initial retry backoff in milliseconds (default: 100).
    pub retry_backoff_ms: Option<u64>,
    /// Backoff cap in milliseconds (default: 2000).
    pub max_backoff_ms: Option<u64>,
}

impl ProducerConfig {
    pub fn topic(&self) -> String {
        self.topic.clone().unwrap_or_else(|| DEFAULT_TOPIC.to_string())
    }

    /// Retry policy for per-record publishes.
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.retry_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff: self.retry_backoff_ms.map(Duration::from_millis).unwrap_or(defaults.initial_backoff),
            max_backoff: self.max_backoff_ms.map(Duration::from_millis).unwrap_or(defaults.max_backoff),
        }
    }
}

/// Fan-out gateway settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    /// Viewer listen address (default: `127.0.0.1:8080`).
    pub listen_addr: Option<String>,
    /// Topics to subscribe (default: `["trade-data"]`).
    pub topics: Option<Vec<String>>,
    /// Updates retained per token (default: 20).
    pub window_size: Option<usize>,
    /// Per-viewer send queue capacity (default: 256).
    pub send_queue_capacity: Option<usize>,
    /// Stats log interval in seconds; 0 disables (default: 30).
    pub stats_interval_sec: Option<u64>,
}

impl GatewayConfig {
    pub fn listen_addr(&self) -> String {
        self.listen_addr.clone().unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.clone().unwrap_or_else(|| vec![DEFAULT_TOPIC.to_string()])
    }

    pub fn window_size(&self) -> usize {
        self.window_size.unwrap_or(DEFAULT_WINDOW_SIZE)
    }

    pub fn send_queue_capacity(&self) -> usize {
        self.send_queue_capacity.unwrap_or(DEFAULT_SEND_QUEUE_CAPACITY)
    }

    /// `None` when periodic stats logging is disabled.
    pub fn stats_interval(&self) -> Option<Duration> {
        match self.stats_interval_sec.unwrap_or(30) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl AppConfig {
    pub fn module_name(&self) -> String {
        self.service.as_ref().and_then(|m| m.module_name.clone()).unwrap_or_else(|| "rsi-feed".to_string())
    }

    pub fn log_path(&self) -> Option<String> {
        self.service.as_ref().and_then(|m| m.log_path.clone())
    }

    pub fn broker(&self) -> BrokerConfig {
        self.broker.clone().unwrap_or_default()
    }

    pub fn producer(&self) -> ProducerConfig {
        self.producer.clone().unwrap_or_default()
    }

    pub fn gateway(&self) -> GatewayConfig {
        self.gateway.clone().unwrap_or_default()
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), FeedError> {
        let producer = self.producer();
        let gateway = self.gateway();

        if producer.topic().trim().is_empty() {
            return Err(FeedError::Config("producer.topic must not be empty".into()));
        }
        if producer.retry_policy().max_attempts == 0 {
            return Err(FeedError::Config("producer.retry_attempts must be at least 1".into()));
        }
        if gateway.window_size() == 0 {
            return Err(FeedError::Config("gateway.window_size must be positive".into()));
        }
        if gateway.send_queue_capacity() == 0 {
            return Err(FeedError::Config("gateway.send_queue_capacity must be positive".into()));
        }
        let topics = gateway.topics();
        if topics.is_empty() || topics.iter().any(|t| t.trim().is_empty()) {
            return Err(FeedError::Config("gateway.topics must be non-empty names".into()));
        }
        gateway
            .listen_addr()
            .parse::<SocketAddr>()
            .map_err(|e| FeedError::Config(format!("gateway.listen_addr: {e}")))?;
        Ok(())
    }
}

/// Load, parse, and validate a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.module_name(), "rsi-feed");
        assert_eq!(cfg.producer().topic(), "trade-data");
        let gw = cfg.gateway();
        assert_eq!(gw.window_size(), 20);
        assert_eq!(gw.send_queue_capacity(), 256);
        assert_eq!(gw.listen_addr(), "127.0.0.1:8080");
        assert_eq!(gw.topics(), vec!["trade-data".to_string()]);
        assert_eq!(cfg.producer().retry_policy().max_attempts, 3);
    }

    #[test]
    fn explicit_values() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{
                "service": {"module_name": "feed-a", "log_path": "/tmp/log"},
                "producer": {"topic": "trades", "retry_attempts": 5, "retry_backoff_ms": 10},
                "gateway": {"listen_addr": "0.0.0.0:9000", "topics": ["a", "b"], "window_size": 50,
                            "send_queue_capacity": 8, "stats_interval_sec": 0}
            }"#,
        )
        .unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.module_name(), "feed-a");
        assert_eq!(cfg.log_path().as_deref(), Some("/tmp/log"));
        let policy = cfg.producer().retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(10));
        let gw = cfg.gateway();
        assert_eq!(gw.topics().len(), 2);
        assert_eq!(gw.window_size(), 50);
        assert!(gw.stats_interval().is_none());
    }

    #[test]
    fn invalid_values_rejected() {
        for json in [
            r#"{"gateway": {"window_size": 0}}"#,
            r#"{"gateway": {"send_queue_capacity": 0}}"#,
            r#"{"gateway": {"listen_addr": "not-an-addr"}}"#,
            r#"{"gateway": {"topics": []}}"#,
            r#"{"producer": {"retry_attempts": 0}}"#,
            r#"{"producer": {"topic": " "}}"#,
        ] {
            let cfg: AppConfig = serde_json::from_str(json).unwrap();
            assert!(matches!(cfg.validate(), Err(FeedError::Config(_))), "{json}");
        }
    }
}
