//! Inbound feed messages
//!
//! Frames arrive as `{"channel": <name>, "data": <payload>}`. The channel is
//! the discriminator; each known channel decodes into one [`FeedMessage`]
//! variant.

use super::types::normalize_symbol;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Discriminator carried by every inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    AllMids,
    Trades,
    L2Book,
    Candle,
    Bbo,
    ActiveAssetCtx,
    ClearinghouseState,
    OpenOrders,
    OrderUpdates,
    UserEvents,
    UserFills,
    UserFundings,
    Notification,
    Pong,
    SubscriptionResponse,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllMids => "allMids",
            Self::Trades => "trades",
            Self::L2Book => "l2Book",
            Self::Candle => "candle",
            Self::Bbo => "bbo",
            Self::ActiveAssetCtx => "activeAssetCtx",
            Self::ClearinghouseState => "clearinghouseState",
            Self::OpenOrders => "openOrders",
            Self::OrderUpdates => "orderUpdates",
            Self::UserEvents => "userEvents",
            Self::UserFills => "userFills",
            Self::UserFundings => "userFundings",
            Self::Notification => "notification",
            Self::Pong => "pong",
            Self::SubscriptionResponse => "subscriptionResponse",
        }
    }
}

impl FromStr for Channel {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let channel = match value {
            "allMids" => Self::AllMids,
            "trades" => Self::Trades,
            "l2Book" => Self::L2Book,
            "candle" => Self::Candle,
            "bbo" => Self::Bbo,
            "activeAssetCtx" => Self::ActiveAssetCtx,
            "clearinghouseState" => Self::ClearinghouseState,
            "openOrders" => Self::OpenOrders,
            "orderUpdates" => Self::OrderUpdates,
            "userEvents" => Self::UserEvents,
            "userFills" => Self::UserFills,
            "userFundings" => Self::UserFundings,
            "notification" => Self::Notification,
            "pong" => Self::Pong,
            "subscriptionResponse" => Self::SubscriptionResponse,
            other => return Err(ParseError::UnknownChannel(other.to_string())),
        };
        Ok(channel)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame decoding errors
#[derive(Debug, Error)]
pub enum ParseError {
    /// Not JSON, or missing the channel field
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Channel known but payload shape unexpected
    #[error("malformed {channel} payload: {source}")]
    Payload {
        channel: Channel,
        source: serde_json::Error,
    },
    /// Channel not in the closed set
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
}

/// Price snapshot pushed on the `allMids` channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AllMids {
    /// Raw price strings keyed by coin
    pub mids: HashMap<String, String>,
}

impl AllMids {
    /// Parse the price strings under normalized symbols, skipping entries
    /// that are not numbers
    pub fn prices(&self) -> HashMap<String, Decimal> {
        self.mids
            .iter()
            .filter_map(|(coin, px)| {
                Decimal::from_str(px)
                    .ok()
                    .map(|price| (normalize_symbol(coin), price))
            })
            .collect()
    }
}

/// Single public trade
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Trade {
    pub coin: String,
    pub side: String,
    pub px: Decimal,
    pub sz: Decimal,
    pub time: i64,
    #[serde(default)]
    pub tid: Option<u64>,
}

/// One price level of a book
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Level {
    pub px: Decimal,
    pub sz: Decimal,
    #[serde(default)]
    pub n: u32,
}

/// L2 book snapshot: `levels[0]` bids, `levels[1]` asks
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct L2Book {
    pub coin: String,
    pub levels: Vec<Vec<Level>>,
    pub time: i64,
}

impl L2Book {
    pub fn best_bid(&self) -> Option<&Level> {
        self.levels.first().and_then(|side| side.first())
    }

    pub fn best_ask(&self) -> Option<&Level> {
        self.levels.get(1).and_then(|side| side.first())
    }
}

/// Best bid/offer; either side may be absent
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Bbo {
    pub coin: String,
    pub time: i64,
    pub bbo: Vec<Option<Level>>,
}

/// Server notification text
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Notification {
    pub notification: String,
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Price snapshot
    AllMids(AllMids),
    Trades(Vec<Trade>),
    Book(L2Book),
    Bbo(Bbo),
    /// Candle rows, kept raw
    Candle(Value),
    ActiveAssetCtx(Value),
    /// Account state (`clearinghouseState`)
    AccountState(Value),
    OpenOrders(Value),
    OrderUpdates(Value),
    UserEvents(Value),
    UserFills(Value),
    UserFundings(Value),
    Notification(Notification),
    /// Heartbeat acknowledgement
    Pong,
    /// Subscription acknowledgement echoing the request
    SubscriptionAck(Value),
}

#[derive(Deserialize)]
struct Envelope {
    channel: String,
    #[serde(default)]
    data: Value,
}

fn payload<T: serde::de::DeserializeOwned>(channel: Channel, data: Value) -> Result<T, ParseError> {
    serde_json::from_value(data).map_err(|source| ParseError::Payload { channel, source })
}

impl FeedMessage {
    pub fn channel(&self) -> Channel {
        match self {
            Self::AllMids(_) => Channel::AllMids,
            Self::Trades(_) => Channel::Trades,
            Self::Book(_) => Channel::L2Book,
            Self::Bbo(_) => Channel::Bbo,
            Self::Candle(_) => Channel::Candle,
            Self::ActiveAssetCtx(_) => Channel::ActiveAssetCtx,
            Self::AccountState(_) => Channel::ClearinghouseState,
            Self::OpenOrders(_) => Channel::OpenOrders,
            Self::OrderUpdates(_) => Channel::OrderUpdates,
            Self::UserEvents(_) => Channel::UserEvents,
            Self::UserFills(_) => Channel::UserFills,
            Self::UserFundings(_) => Channel::UserFundings,
            Self::Notification(_) => Channel::Notification,
            Self::Pong => Channel::Pong,
            Self::SubscriptionAck(_) => Channel::SubscriptionResponse,
        }
    }

    /// Decode a text frame
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let channel = Channel::from_str(&envelope.channel)?;
        let data = envelope.data;

        let message = match channel {
            Channel::AllMids => Self::AllMids(payload(channel, data)?),
            Channel::Trades => Self::Trades(payload(channel, data)?),
            Channel::L2Book => Self::Book(payload(channel, data)?),
            Channel::Bbo => Self::Bbo(payload(channel, data)?),
            Channel::Notification => Self::Notification(payload(channel, data)?),
            Channel::Candle => Self::Candle(data),
            Channel::ActiveAssetCtx => Self::ActiveAssetCtx(data),
            Channel::ClearinghouseState => Self::AccountState(data),
            Channel::OpenOrders => Self::OpenOrders(data),
            Channel::OrderUpdates => Self::OrderUpdates(data),
            Channel::UserEvents => Self::UserEvents(data),
            Channel::UserFills => Self::UserFills(data),
            Channel::UserFundings => Self::UserFundings(data),
            Channel::Pong => Self::Pong,
            Channel::SubscriptionResponse => Self::SubscriptionAck(data),
        };
        Ok(message)
    }
}
