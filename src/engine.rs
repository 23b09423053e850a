//! Engine wiring
//!
//! Owns the feed connection, price cache and strategy manager, and the
//! bounded queue that carries price updates from the feed's receive loop to
//! the manager without ever blocking the socket.

use crate::cache::{CacheStats, FallbackSource, HttpMidsSource, LivePrices, PriceCache};
use crate::config::Config;
use crate::feed::{normalize_symbol, FeedStats, StreamConnection, Subscription};
use crate::strategy::{
    decision_from_config, DecisionRoutine, JsonFileStore, SamplingPool, StrategyManager,
    StrategyStatus, StrategyStore,
};
use crate::telemetry::{increment, CounterMetric};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct PriceUpdate {
    instrument: String,
    price: Decimal,
    event_time: DateTime<Utc>,
}

type UpdateSender = Arc<Mutex<Option<mpsc::Sender<PriceUpdate>>>>;

struct Dispatch {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Point-in-time view of every component
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub connection: &'static str,
    pub feed: FeedStats,
    pub cache: CacheStats,
    pub strategies: StrategyStatus,
}

/// Feed, cache and strategy manager wired together
pub struct Engine {
    dispatch_buffer: usize,
    connection: Arc<StreamConnection>,
    cache: Arc<PriceCache>,
    manager: Arc<StrategyManager>,
    updates: UpdateSender,
    dispatch: tokio::sync::Mutex<Option<Dispatch>>,
}

impl Engine {
    /// Build the engine with the network-backed collaborators `config` names
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let connection = Arc::new(StreamConnection::new(config.feed.to_ws_config()));
        let fallback = Arc::new(HttpMidsSource::new(
            config.info_url(),
            Duration::from_secs(config.cache.request_timeout_secs),
        )?);
        let store = Arc::new(JsonFileStore::new(&config.strategy.store_path));
        let decision = decision_from_config(&config.decision)?;

        Ok(Self::from_parts(config, connection, fallback, store, decision))
    }

    /// Build the engine around caller-supplied collaborators
    pub fn from_parts(
        config: &Config,
        connection: Arc<StreamConnection>,
        fallback: Arc<dyn FallbackSource>,
        store: Arc<dyn StrategyStore>,
        decision: Arc<dyn DecisionRoutine>,
    ) -> Self {
        let live: Arc<dyn LivePrices> = connection.clone();
        let cache = Arc::new(PriceCache::new(&config.cache, Some(live), fallback));

        let sampler = Arc::new(SamplingPool::new(
            config.strategy.sampling_interval(),
            config.strategy.sample_window,
        ));
        let manager = Arc::new(StrategyManager::new(
            config.strategy.reload_interval(),
            store,
            decision,
            sampler,
        ));

        let updates: UpdateSender = Arc::new(Mutex::new(None));
        register_mids_observer(&connection, &config.feed.symbols, Arc::clone(&updates));

        Self {
            dispatch_buffer: config.strategy.dispatch_buffer.max(1),
            connection,
            cache,
            manager,
            updates,
            dispatch: tokio::sync::Mutex::new(None),
        }
    }

    pub fn connection(&self) -> &Arc<StreamConnection> {
        &self.connection
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    pub fn manager(&self) -> &Arc<StrategyManager> {
        &self.manager
    }

    /// Connect the feed, subscribe to mids and start the strategy manager
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut dispatch = self.dispatch.lock().await;
        if dispatch.is_some() {
            anyhow::bail!("Engine already started");
        }

        let (tx, rx) = mpsc::channel(self.dispatch_buffer);
        *self.updates.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

        self.connection.subscribe(Subscription::all_mids());
        self.connection.connect().await?;
        self.manager.start().await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(dispatch_loop(
            Arc::clone(&self.manager),
            rx,
            cancel.clone(),
        ));
        *dispatch = Some(Dispatch { cancel, handle });

        tracing::info!(url = %self.connection.url(), "Engine started");
        Ok(())
    }

    /// Stop the strategy manager, then the feed
    pub async fn shutdown(&self) {
        let Some(Dispatch { cancel, handle }) = self.dispatch.lock().await.take() else {
            return;
        };

        self.manager.stop().await;

        *self.updates.lock().unwrap_or_else(|e| e.into_inner()) = None;
        cancel.cancel();
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Dispatch loop ended abnormally");
        }

        self.connection.disconnect().await;
        tracing::info!("Engine stopped");
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            connection: self.connection.state().as_str(),
            feed: self.connection.stats(),
            cache: self.cache.stats().await,
            strategies: self.manager.status(),
        }
    }
}

/// Forward watched instruments from every mids snapshot into the queue.
/// An empty watch list forwards every instrument.
fn register_mids_observer(
    connection: &StreamConnection,
    symbols: &[String],
    updates: UpdateSender,
) {
    let watched: HashSet<String> = symbols.iter().map(|s| normalize_symbol(s)).collect();

    connection.on_all_mids(move |mids| {
        let sender = updates.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = sender.as_ref() else {
            return;
        };

        let event_time = Utc::now();
        for (instrument, price) in mids.prices() {
            if !watched.is_empty() && !watched.contains(&instrument) {
                continue;
            }
            let update = PriceUpdate {
                instrument,
                price,
                event_time,
            };
            if let Err(e) = tx.try_send(update) {
                increment(CounterMetric::PriceUpdatesDropped);
                tracing::debug!(error = %e, "Strategy queue full, dropping price update");
            }
        }
    });
}

async fn dispatch_loop(
    manager: Arc<StrategyManager>,
    mut rx: mpsc::Receiver<PriceUpdate>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            update = rx.recv() => {
                let Some(update) = update else { break };
                manager.handle_price_update(&update.instrument, update.price, update.event_time);
            }
        }
    }
    tracing::debug!("Dispatch loop exited");
}
