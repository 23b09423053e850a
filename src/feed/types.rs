//! Price feed types

use rust_decimal::Decimal;
use tokio::time::Instant;

/// A pushed mid price and when it arrived
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub price: Decimal,
    pub received_at: Instant,
}

impl PricePoint {
    pub fn new(price: Decimal, received_at: Instant) -> Self {
        Self { price, received_at }
    }
}

/// Normalize a trading symbol to the bare coin name (`btc/usdc` -> `BTC`)
pub fn normalize_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    for suffix in ["/USDC", ":USDC", "/USD"] {
        if let Some(base) = upper.strip_suffix(suffix) {
            return base.to_string();
        }
    }
    upper
}
