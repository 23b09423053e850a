//! Three-tier price cache
//!
//! 1. Push feed, when connected and holding a value for the instrument.
//! 2. Local copy, when younger than the freshness window.
//! 3. Fallback source, pulled in one batch and swapped in whole.

use super::{FallbackSource, LivePrices};
use crate::config::CacheConfig;
use crate::feed::{normalize_symbol, PricePoint};
use crate::telemetry::{increment, set_gauge, CounterMetric, GaugeMetric};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    price: Decimal,
    updated_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    last_write: Option<Instant>,
}

impl CacheState {
    fn is_fresh(&self, instrument: &str, now: Instant, freshness: Duration) -> bool {
        self.entries
            .get(instrument)
            .is_some_and(|e| now.saturating_duration_since(e.updated_at) < freshness)
    }

    fn is_all_fresh(&self, now: Instant, freshness: Duration) -> bool {
        self.last_write
            .is_some_and(|t| now.saturating_duration_since(t) < freshness)
    }

    /// Push writes never move an entry's timestamp backwards
    fn merge_push(&mut self, instrument: &str, point: PricePoint) {
        match self.entries.get_mut(instrument) {
            Some(entry) if entry.updated_at > point.received_at => {}
            Some(entry) => {
                entry.price = point.price;
                entry.updated_at = point.received_at;
            }
            None => {
                self.entries.insert(
                    instrument.to_string(),
                    CacheEntry {
                        price: point.price,
                        updated_at: point.received_at,
                    },
                );
            }
        }
        if self.last_write.map_or(true, |t| t < point.received_at) {
            self.last_write = Some(point.received_at);
        }
    }

    fn prices(&self) -> HashMap<String, Decimal> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.price))
            .collect()
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cached_instruments: usize,
    pub last_write_age_ms: Option<u64>,
    pub fallback_refreshes: u64,
    pub push_enabled: bool,
    pub push_connected: bool,
}

/// Price cache with push, local and fallback tiers
pub struct PriceCache {
    live: Option<Arc<dyn LivePrices>>,
    fallback: Arc<dyn FallbackSource>,
    freshness: Duration,
    warn_every: u64,
    push_enabled: AtomicBool,
    state: RwLock<CacheState>,
    refresh_lock: Mutex<()>,
    fallback_refreshes: AtomicU64,
}

impl PriceCache {
    pub fn new(
        config: &CacheConfig,
        live: Option<Arc<dyn LivePrices>>,
        fallback: Arc<dyn FallbackSource>,
    ) -> Self {
        Self {
            live,
            fallback,
            freshness: config.freshness(),
            warn_every: config.fallback_warn_every,
            push_enabled: AtomicBool::new(config.use_push),
            state: RwLock::new(CacheState::default()),
            refresh_lock: Mutex::new(()),
            fallback_refreshes: AtomicU64::new(0),
        }
    }

    /// Current price of one instrument, or `None` when no tier has it
    pub async fn get(&self, instrument: &str) -> Option<Decimal> {
        let symbol = normalize_symbol(instrument);

        if let Some(point) = self.connected_feed().and_then(|l| l.live_price(&symbol)) {
            self.state.write().await.merge_push(&symbol, point);
            return Some(point.price);
        }

        {
            let state = self.state.read().await;
            if state.is_fresh(&symbol, Instant::now(), self.freshness) {
                return state.entries.get(&symbol).map(|e| e.price);
            }
        }

        let freshness = self.freshness;
        self.refresh_unless(|state, now| state.is_fresh(&symbol, now, freshness))
            .await;

        // A failed refresh leaves the previous value in place
        self.state
            .read()
            .await
            .entries
            .get(&symbol)
            .map(|e| e.price)
    }

    /// Prices for every known instrument
    pub async fn get_all(&self) -> HashMap<String, Decimal> {
        if let Some(live) = self.connected_feed() {
            let points = live.live_prices();
            if !points.is_empty() {
                let mut state = self.state.write().await;
                for (symbol, point) in &points {
                    state.merge_push(symbol, *point);
                }
                return points.into_iter().map(|(k, p)| (k, p.price)).collect();
            }
        }

        {
            let state = self.state.read().await;
            if state.is_all_fresh(Instant::now(), self.freshness) {
                return state.prices();
            }
        }

        let freshness = self.freshness;
        self.refresh_unless(|state, now| state.is_all_fresh(now, freshness))
            .await;

        self.state.read().await.prices()
    }

    /// Toggle the push tier; reads fall through to local and fallback when off
    pub fn set_push_enabled(&self, enabled: bool) {
        self.push_enabled.store(enabled, Ordering::Relaxed);
        tracing::info!(enabled, "Price cache push tier toggled");
    }

    pub fn push_enabled(&self) -> bool {
        self.push_enabled.load(Ordering::Relaxed)
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        CacheStats {
            cached_instruments: state.entries.len(),
            last_write_age_ms: state
                .last_write
                .map(|t| Instant::now().saturating_duration_since(t).as_millis() as u64),
            fallback_refreshes: self.fallback_refreshes.load(Ordering::Relaxed),
            push_enabled: self.push_enabled(),
            push_connected: self.live.as_ref().is_some_and(|l| l.is_connected()),
        }
    }

    fn connected_feed(&self) -> Option<&Arc<dyn LivePrices>> {
        if !self.push_enabled() {
            return None;
        }
        self.live.as_ref().filter(|l| l.is_connected())
    }

    /// Single-flight refresh. Callers queued behind an in-progress refresh
    /// re-check freshness and return without a second pull.
    async fn refresh_unless<F>(&self, fresh: F)
    where
        F: Fn(&CacheState, Instant) -> bool,
    {
        let _guard = self.refresh_lock.lock().await;

        if fresh(&*self.state.read().await, Instant::now()) {
            return;
        }

        self.refresh().await;
    }

    async fn refresh(&self) {
        let count = self.fallback_refreshes.fetch_add(1, Ordering::Relaxed) + 1;
        increment(CounterMetric::CacheFallbackRefresh);

        if self.warn_every > 0 && count % self.warn_every == 0 {
            tracing::warn!(
                count,
                "Price cache keeps falling back to the pull source; check the push feed"
            );
        }

        match self.fallback.fetch_all_mids().await {
            Ok(prices) => {
                let now = Instant::now();
                let entries: HashMap<String, CacheEntry> = prices
                    .into_iter()
                    .map(|(coin, price)| {
                        (
                            normalize_symbol(&coin),
                            CacheEntry {
                                price,
                                updated_at: now,
                            },
                        )
                    })
                    .collect();

                let mut state = self.state.write().await;
                state.entries = entries;
                state.last_write = Some(now);
                set_gauge(GaugeMetric::CachedInstruments, state.entries.len() as f64);

                tracing::debug!(instruments = state.entries.len(), "Price cache refreshed");
            }
            Err(e) => {
                increment(CounterMetric::CacheFallbackError);
                tracing::error!(error = %e, "Fallback price refresh failed");
            }
        }
    }
}
