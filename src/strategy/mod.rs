//! Strategy trigger module
//!
//! Decides per account when the external decision routine runs. A trigger
//! fires when either the account's interval has elapsed since its last
//! trigger or the sampled price move crosses its threshold, and never while
//! a previous invocation for the same account is still in flight.

mod decision;
mod manager;
mod sampling;
mod state;
mod store;
mod types;

pub use decision::{decision_from_config, LogOnlyDecision, WebhookDecision};
pub use manager::StrategyManager;
pub use sampling::SamplingPool;
pub use state::{RunningGuard, StrategyState};
pub use store::{JsonFileStore, MemoryStore};
pub use types::{AccountStatus, StoreError, StrategyConfig, StrategyStatus, TriggerReason};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Rolling price samples used by the price leg of a trigger
pub trait PriceSampler: Send + Sync {
    /// Whether enough time has passed since the instrument's last sample
    fn should_sample(&self, instrument: &str, at: DateTime<Utc>) -> bool;

    fn add_sample(&self, instrument: &str, price: Decimal, at: DateTime<Utc>);

    /// Percent move across the sample window
    fn price_change_percent(&self, instrument: &str) -> Option<Decimal>;
}

/// Persistent per-account strategy configuration
#[async_trait]
pub trait StrategyStore: Send + Sync {
    async fn load(&self) -> Result<Vec<StrategyConfig>, StoreError>;

    /// Persist the time of the latest trigger for an account
    async fn record_trigger(&self, account_id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// The expensive external routine run on every trigger
#[async_trait]
pub trait DecisionRoutine: Send + Sync {
    async fn invoke(&self, account_id: i64) -> anyhow::Result<()>;
}
