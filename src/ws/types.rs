//! WebSocket types and configuration

use std::time::Duration;
use thiserror::Error;

/// Shortest heartbeat period the send loop will tick at
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// WebSocket connection configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket URL to connect to
    pub url: String,
    /// Reconnect attempts after a fault before giving up (0 = infinite)
    pub max_reconnect_attempts: u32,
    /// Base delay; attempt `n` waits `n * base`
    pub reconnect_base_delay: Duration,
    /// Interval between application-level pings
    pub heartbeat_interval: Duration,
    /// Upper bound on how long `disconnect` waits for the loops to wind down
    pub disconnect_timeout: Duration,
    /// Largest inbound frame accepted
    pub max_message_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 10,
            reconnect_base_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(10),
            max_message_size: 10 * 1024 * 1024,
        }
    }
}

impl WsConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set maximum reconnection attempts
    pub fn max_reconnects(mut self, n: u32) -> Self {
        self.max_reconnect_attempts = n;
        self
    }

    /// Set the linear backoff base delay
    pub fn base_delay(mut self, d: Duration) -> Self {
        self.reconnect_base_delay = d;
        self
    }

    /// Set heartbeat interval, at least [`MIN_HEARTBEAT_INTERVAL`]
    pub fn heartbeat_interval(mut self, d: Duration) -> Self {
        self.heartbeat_interval = d.max(MIN_HEARTBEAT_INTERVAL);
        self
    }

    /// Set disconnect timeout
    pub fn disconnect_timeout(mut self, d: Duration) -> Self {
        self.disconnect_timeout = d;
        self
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay.saturating_mul(attempt)
    }

    /// Whether another reconnect attempt is allowed after `attempt` failures
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_reconnect_attempts == 0 || attempt <= self.max_reconnect_attempts
    }

    /// Sum of every backoff delay before giving up (zero when retries are unbounded)
    pub fn total_backoff(&self) -> Duration {
        (1..=self.max_reconnect_attempts)
            .map(|n| self.reconnect_delay(n))
            .sum()
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notifications published to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake completed and subscriptions replayed
    Connected,
    /// Connection closed on request
    Disconnected,
    /// Waiting `delay` before reconnect attempt `attempt`
    Reconnecting { attempt: u32, delay: Duration },
    /// Retry cap exceeded; the connection stays down
    Fatal { attempts: u32 },
}

/// WebSocket errors
#[derive(Debug, Clone, Error)]
pub enum WsError {
    /// Handshake or socket failure
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// Maximum reconnection attempts exceeded
    #[error("Maximum reconnection attempts exceeded")]
    MaxReconnectsExceeded,
    /// Outbound channel gone
    #[error("Channel closed")]
    ChannelClosed,
    /// Send failed
    #[error("Send failed: {0}")]
    SendFailed(String),
    /// `connect` called while the supervisor is still alive
    #[error("Connection already running")]
    AlreadyRunning,
}
