//! Feed subscriptions and the registry replayed after every (re)connect

use super::message::Channel;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

/// Candle interval accepted by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "8h")]
    EightHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
}

impl CandleInterval {
    pub const ALL: [CandleInterval; 14] = [
        Self::OneMinute,
        Self::ThreeMinutes,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::TwoHours,
        Self::FourHours,
        Self::EightHours,
        Self::TwelveHours,
        Self::OneDay,
        Self::ThreeDays,
        Self::OneWeek,
        Self::OneMonth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::TwoHours => "2h",
            Self::FourHours => "4h",
            Self::EightHours => "8h",
            Self::TwelveHours => "12h",
            Self::OneDay => "1d",
            Self::ThreeDays => "3d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1M",
        }
    }
}

impl FromStr for CandleInterval {
    type Err = SubscriptionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|interval| interval.as_str() == value)
            .ok_or_else(|| SubscriptionError::InvalidInterval(value.to_string()))
    }
}

/// Subscription construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("invalid candle interval '{0}'")]
    InvalidInterval(String),
}

/// A declarative request for one category of pushed updates
///
/// Serializes to the wire form `{"type": <kind>, ...params}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Subscription {
    AllMids {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        dex: Option<String>,
    },
    Trades {
        coin: String,
    },
    #[serde(rename_all = "camelCase")]
    L2Book {
        coin: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        n_sig_figs: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        mantissa: Option<u32>,
    },
    Candle {
        coin: String,
        interval: CandleInterval,
    },
    Bbo {
        coin: String,
    },
    ActiveAssetCtx {
        coin: String,
    },
    ClearinghouseState {
        user: String,
    },
    OpenOrders {
        user: String,
    },
    OrderUpdates {
        user: String,
    },
    UserEvents {
        user: String,
    },
    #[serde(rename_all = "camelCase")]
    UserFills {
        user: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        aggregate_by_time: Option<bool>,
    },
    UserFundings {
        user: String,
    },
    Notification {
        user: String,
    },
}

impl Subscription {
    pub fn all_mids() -> Self {
        Self::AllMids { dex: None }
    }

    pub fn all_mids_for_dex(dex: impl Into<String>) -> Self {
        Self::AllMids {
            dex: Some(dex.into()),
        }
    }

    pub fn trades(coin: &str) -> Self {
        Self::Trades {
            coin: coin.to_uppercase(),
        }
    }

    pub fn l2_book(coin: &str, n_sig_figs: Option<u32>, mantissa: Option<u32>) -> Self {
        Self::L2Book {
            coin: coin.to_uppercase(),
            n_sig_figs,
            mantissa,
        }
    }

    pub fn candle(coin: &str, interval: CandleInterval) -> Self {
        Self::Candle {
            coin: coin.to_uppercase(),
            interval,
        }
    }

    pub fn bbo(coin: &str) -> Self {
        Self::Bbo {
            coin: coin.to_uppercase(),
        }
    }

    pub fn active_asset_ctx(coin: &str) -> Self {
        Self::ActiveAssetCtx {
            coin: coin.to_uppercase(),
        }
    }

    pub fn clearinghouse_state(user: &str) -> Self {
        Self::ClearinghouseState {
            user: user.to_lowercase(),
        }
    }

    pub fn open_orders(user: &str) -> Self {
        Self::OpenOrders {
            user: user.to_lowercase(),
        }
    }

    pub fn order_updates(user: &str) -> Self {
        Self::OrderUpdates {
            user: user.to_lowercase(),
        }
    }

    pub fn user_events(user: &str) -> Self {
        Self::UserEvents {
            user: user.to_lowercase(),
        }
    }

    pub fn user_fills(user: &str, aggregate_by_time: bool) -> Self {
        Self::UserFills {
            user: user.to_lowercase(),
            aggregate_by_time: aggregate_by_time.then_some(true),
        }
    }

    pub fn user_fundings(user: &str) -> Self {
        Self::UserFundings {
            user: user.to_lowercase(),
        }
    }

    pub fn notification(user: &str) -> Self {
        Self::Notification {
            user: user.to_lowercase(),
        }
    }

    /// Wire name of the subscription kind
    pub fn kind(&self) -> &'static str {
        self.channel().as_str()
    }

    /// Channel the server tags pushed data with
    pub fn channel(&self) -> Channel {
        match self {
            Self::AllMids { .. } => Channel::AllMids,
            Self::Trades { .. } => Channel::Trades,
            Self::L2Book { .. } => Channel::L2Book,
            Self::Candle { .. } => Channel::Candle,
            Self::Bbo { .. } => Channel::Bbo,
            Self::ActiveAssetCtx { .. } => Channel::ActiveAssetCtx,
            Self::ClearinghouseState { .. } => Channel::ClearinghouseState,
            Self::OpenOrders { .. } => Channel::OpenOrders,
            Self::OrderUpdates { .. } => Channel::OrderUpdates,
            Self::UserEvents { .. } => Channel::UserEvents,
            Self::UserFills { .. } => Channel::UserFills,
            Self::UserFundings { .. } => Channel::UserFundings,
            Self::Notification { .. } => Channel::Notification,
        }
    }

    /// Parameters without the `type` tag
    fn params(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("type");
        }
        value
    }

    /// Deterministic identity: kind plus params with sorted keys
    pub fn key(&self) -> SubscriptionKey {
        // serde_json::Map is ordered by key, so the rendering is stable
        SubscriptionKey(format!("{}:{}", self.kind(), self.params()))
    }

    pub fn to_subscribe_message(&self) -> Value {
        json!({ "method": "subscribe", "subscription": self })
    }

    pub fn to_unsubscribe_message(&self) -> Value {
        json!({ "method": "unsubscribe", "subscription": self })
    }
}

/// Registry key derived from a subscription's kind and params
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The desired subscription set, independent of connection state
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Arc<RwLock<HashMap<SubscriptionKey, Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscription; returns its key and whether it was new
    pub fn insert(&self, subscription: Subscription) -> (SubscriptionKey, bool) {
        let key = subscription.key();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let added = entries.insert(key.clone(), subscription).is_none();
        (key, added)
    }

    pub fn remove(&self, key: &SubscriptionKey) -> Option<Subscription> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key)
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(key)
    }

    /// Point-in-time copy of every entry
    pub fn snapshot(&self) -> Vec<Subscription> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Vec<Subscription> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.drain().map(|(_, sub)| sub).collect()
    }
}
