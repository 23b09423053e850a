//! HTTP fallback source for mid prices
//!
//! Each call costs request weight against the exchange's rate limit, so the
//! cache only reaches for it when the push feed cannot answer.

use super::{CacheError, FallbackSource};
use crate::feed::normalize_symbol;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Pulls `allMids` from the exchange info endpoint
pub struct HttpMidsSource {
    url: String,
    client: Client,
}

impl HttpMidsSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CacheError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Decode `{"BTC": "97000.5", ...}`, dropping entries that are not prices
pub(crate) fn parse_mids(body: Value) -> Result<HashMap<String, Decimal>, CacheError> {
    let Value::Object(map) = body else {
        return Err(CacheError::Decode("expected an object of prices".into()));
    };

    let prices = map
        .into_iter()
        .filter_map(|(coin, px)| {
            let price = match &px {
                Value::String(s) => Decimal::from_str(s).ok(),
                Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
                _ => None,
            }?;
            Some((normalize_symbol(&coin), price))
        })
        .collect();
    Ok(prices)
}

#[async_trait]
impl FallbackSource for HttpMidsSource {
    async fn fetch_all_mids(&self) -> Result<HashMap<String, Decimal>, CacheError> {
        tracing::debug!(url = %self.url, "Fetching allMids over HTTP");

        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "type": "allMids" }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CacheError::Status { status, body });
        }

        let body: Value = response.json().await?;
        parse_mids(body)
    }
}
