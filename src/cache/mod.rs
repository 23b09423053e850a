//! Price cache module
//!
//! Single source of truth for "current price of instrument X". Reads prefer
//! the push feed, then a short-lived local copy, then a batch pull from a
//! rate-limited fallback source.

mod http;
mod price_cache;

pub use http::HttpMidsSource;
pub use price_cache::{CacheStats, PriceCache};

use crate::feed::{PricePoint, StreamConnection};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

/// Push-updated prices, typically a [`StreamConnection`]
pub trait LivePrices: Send + Sync {
    fn is_connected(&self) -> bool;
    fn live_price(&self, instrument: &str) -> Option<PricePoint>;
    fn live_prices(&self) -> HashMap<String, PricePoint>;
}

impl LivePrices for StreamConnection {
    fn is_connected(&self) -> bool {
        StreamConnection::is_connected(self)
    }

    fn live_price(&self, instrument: &str) -> Option<PricePoint> {
        self.mid(instrument)
    }

    fn live_prices(&self) -> HashMap<String, PricePoint> {
        self.mids()
    }
}

/// Batch pull of every instrument's price
#[async_trait]
pub trait FallbackSource: Send + Sync {
    async fn fetch_all_mids(&self) -> Result<HashMap<String, Decimal>, CacheError>;
}

/// Fallback source errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("fallback source returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}
