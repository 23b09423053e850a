//! Price feed module
//!
//! Streaming connection to the exchange WebSocket, the subscription registry
//! it replays on every connect, and the inbound message model.

mod connection;
mod message;
mod subscription;
mod types;

pub use connection::{FeedObserver, FeedStats, StreamConnection};
pub use message::{
    AllMids, Bbo, Channel, FeedMessage, L2Book, Level, Notification, ParseError, Trade,
};
pub use subscription::{
    CandleInterval, Subscription, SubscriptionError, SubscriptionKey, SubscriptionRegistry,
};
pub use types::{normalize_symbol, PricePoint};
