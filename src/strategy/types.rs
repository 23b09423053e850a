//! Strategy types
//!
//! Per-account trigger configuration as held by the store, the reason a
//! trigger fired, and the status snapshot the manager reports.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Trigger configuration for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub account_id: i64,

    /// Absolute sampled price move, in percent, that fires a trigger
    pub price_threshold_percent: Decimal,

    /// Maximum time between triggers
    pub trigger_interval_secs: u64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub last_trigger_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl StrategyConfig {
    pub fn new(
        account_id: i64,
        price_threshold_percent: Decimal,
        trigger_interval_secs: u64,
    ) -> Self {
        Self {
            account_id,
            price_threshold_percent,
            trigger_interval_secs,
            enabled: true,
            last_trigger_at: None,
        }
    }

    pub fn with_last_trigger(mut self, at: DateTime<Utc>) -> Self {
        self.last_trigger_at = Some(at);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Why a strategy fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TriggerReason {
    /// Interval since the last trigger elapsed
    pub time: bool,
    /// Sampled price move crossed the threshold
    pub price: bool,
    pub elapsed_secs: i64,
    pub change_percent: Option<Decimal>,
}

impl TriggerReason {
    pub fn label(&self) -> &'static str {
        match (self.time, self.price) {
            (true, true) => "time+price",
            (true, false) => "time",
            (false, true) => "price",
            (false, false) => "none",
        }
    }
}

/// Snapshot of one account's trigger state
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub enabled: bool,
    pub running: bool,
    pub price_threshold_percent: Decimal,
    pub trigger_interval_secs: u64,
    pub last_trigger_at: Option<DateTime<Utc>>,
}

/// Snapshot of the strategy manager
#[derive(Debug, Clone, Serialize)]
pub struct StrategyStatus {
    pub running: bool,
    pub strategy_count: usize,
    pub strategies: BTreeMap<i64, AccountStatus>,
}

/// Strategy store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store contents invalid: {0}")]
    Format(#[from] serde_json::Error),
    #[error("unknown account {0}")]
    UnknownAccount(i64),
}
