//! Configuration types for mids-trigger

use crate::telemetry::LogFormat;
use crate::ws::WsConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub strategy: ManagerConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Exchange environment
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Mainnet,
    Testnet,
}

impl Environment {
    pub fn ws_url(&self) -> &'static str {
        match self {
            Self::Mainnet => "wss://api.hyperliquid.xyz/ws",
            Self::Testnet => "wss://api.hyperliquid-testnet.xyz/ws",
        }
    }

    pub fn info_url(&self) -> &'static str {
        match self {
            Self::Mainnet => "https://api.hyperliquid.xyz/info",
            Self::Testnet => "https://api.hyperliquid-testnet.xyz/info",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mainnet => f.write_str("mainnet"),
            Self::Testnet => f.write_str("testnet"),
        }
    }
}

/// Streaming feed configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub environment: Environment,

    /// Overrides the environment's WebSocket URL
    #[serde(default)]
    pub ws_url: Option<String>,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Attempt `n` waits `n * base`
    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay_secs: u64,

    /// 0 retries forever
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_disconnect_timeout")]
    pub disconnect_timeout_secs: u64,

    /// Instruments whose price updates drive strategy evaluation
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

fn default_heartbeat_interval() -> u64 {
    30
}
fn default_reconnect_base_delay() -> u64 {
    5
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_disconnect_timeout() -> u64 {
    10
}
fn default_symbols() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string()]
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            ws_url: None,
            heartbeat_interval_secs: default_heartbeat_interval(),
            reconnect_base_delay_secs: default_reconnect_base_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            disconnect_timeout_secs: default_disconnect_timeout(),
            symbols: default_symbols(),
        }
    }
}

impl FeedConfig {
    pub fn ws_url(&self) -> &str {
        self.ws_url
            .as_deref()
            .unwrap_or_else(|| self.environment.ws_url())
    }

    pub fn to_ws_config(&self) -> WsConfig {
        WsConfig::new(self.ws_url())
            .max_reconnects(self.max_reconnect_attempts)
            .base_delay(Duration::from_secs(self.reconnect_base_delay_secs))
            .heartbeat_interval(Duration::from_secs(self.heartbeat_interval_secs.max(1)))
            .disconnect_timeout(Duration::from_secs(self.disconnect_timeout_secs))
    }
}

/// Price cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Local entries younger than this are served without a refresh
    #[serde(default = "default_freshness_ms")]
    pub freshness_ms: u64,

    /// Warn on every Nth fallback refresh
    #[serde(default = "default_fallback_warn_every")]
    pub fallback_warn_every: u64,

    /// Overrides the environment's info URL
    #[serde(default)]
    pub info_url: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Serve reads from the push feed when connected
    #[serde(default = "default_true")]
    pub use_push: bool,
}

fn default_freshness_ms() -> u64 {
    2_000
}
fn default_fallback_warn_every() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness_ms: default_freshness_ms(),
            fallback_warn_every: default_fallback_warn_every(),
            info_url: None,
            request_timeout_secs: default_request_timeout(),
            use_push: true,
        }
    }
}

impl CacheConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }
}

/// Strategy manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManagerConfig {
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,

    /// Minimum spacing between samples fed to the sampling pool
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval_secs: u64,

    /// Samples kept per instrument
    #[serde(default = "default_sample_window")]
    pub sample_window: usize,

    /// JSON file holding per-account strategy configs
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Price updates buffered between the feed and the manager
    #[serde(default = "default_dispatch_buffer")]
    pub dispatch_buffer: usize,
}

fn default_reload_interval() -> u64 {
    60
}
fn default_sampling_interval() -> u64 {
    18
}
fn default_sample_window() -> usize {
    10
}
fn default_store_path() -> PathBuf {
    PathBuf::from("strategies.json")
}
fn default_dispatch_buffer() -> usize {
    1024
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reload_interval_secs: default_reload_interval(),
            sampling_interval_secs: default_sampling_interval(),
            sample_window: default_sample_window(),
            store_path: default_store_path(),
            dispatch_buffer: default_dispatch_buffer(),
        }
    }
}

impl ManagerConfig {
    /// Never shorter than one second
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs.max(1))
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs(self.sampling_interval_secs)
    }
}

/// Decision routine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecisionConfig {
    /// Endpoint receiving `{"account_id": N}` on every trigger; unset logs only
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_decision_timeout")]
    pub timeout_secs: u64,
}

fn default_decision_timeout() -> u64 {
    120
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_decision_timeout(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Prometheus scrape port; exporter disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: None,
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn info_url(&self) -> &str {
        self.cache
            .info_url
            .as_deref()
            .unwrap_or_else(|| self.feed.environment.info_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialize() {
        let toml = r#"
            [feed]
            environment = "testnet"
            heartbeat_interval_secs = 15
            reconnect_base_delay_secs = 2
            max_reconnect_attempts = 4
            symbols = ["BTC", "SOL"]

            [cache]
            freshness_ms = 1500
            fallback_warn_every = 5

            [strategy]
            reload_interval_secs = 30
            sampling_interval_secs = 10
            store_path = "/var/lib/trigger/strategies.json"

            [decision]
            webhook_url = "http://localhost:8080/decide"

            [telemetry]
            metrics_port = 9090
            log_level = "debug"
            log_format = "json"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.feed.environment, Environment::Testnet);
        assert_eq!(config.feed.ws_url(), "wss://api.hyperliquid-testnet.xyz/ws");
        assert_eq!(config.info_url(), "https://api.hyperliquid-testnet.xyz/info");
        assert_eq!(config.feed.symbols, vec!["BTC", "SOL"]);
        assert_eq!(config.cache.freshness(), Duration::from_millis(1500));
        assert_eq!(config.strategy.reload_interval(), Duration::from_secs(30));
        assert_eq!(config.strategy.sample_window, 10);
        assert_eq!(config.telemetry.metrics_port, Some(9090));
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.feed.environment, Environment::Mainnet);
        assert_eq!(config.feed.max_reconnect_attempts, 10);
        assert_eq!(config.cache.freshness(), Duration::from_secs(2));
        assert_eq!(config.cache.fallback_warn_every, 10);
        assert!(config.cache.use_push);
        assert_eq!(config.strategy.reload_interval(), Duration::from_secs(60));
        assert_eq!(config.strategy.sampling_interval(), Duration::from_secs(18));
        assert!(config.decision.webhook_url.is_none());
        assert!(config.telemetry.metrics_port.is_none());
    }

    #[test]
    fn test_url_overrides() {
        let toml = r#"
            [feed]
            ws_url = "ws://127.0.0.1:9000/ws"

            [cache]
            info_url = "http://127.0.0.1:9000/info"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.feed.ws_url(), "ws://127.0.0.1:9000/ws");
        assert_eq!(config.info_url(), "http://127.0.0.1:9000/info");
    }

    #[test]
    fn test_ws_config_from_feed() {
        let feed = FeedConfig {
            reconnect_base_delay_secs: 3,
            max_reconnect_attempts: 7,
            ..Default::default()
        };
        let ws = feed.to_ws_config();
        assert_eq!(ws.url, "wss://api.hyperliquid.xyz/ws");
        assert_eq!(ws.reconnect_delay(2), Duration::from_secs(6));
        assert_eq!(ws.max_reconnect_attempts, 7);
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let toml = r#"
            [feed]
            heartbeat_interval_secs = 0

            [strategy]
            reload_interval_secs = 0
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.feed.to_ws_config().heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.strategy.reload_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(include_str!("../config.toml.example")).unwrap();
        assert_eq!(config.feed.symbols, vec!["BTC", "ETH"]);
        assert_eq!(config.strategy.dispatch_buffer, 1024);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }
}
