//! Strategy manager
//!
//! Holds one [`StrategyState`] per account, reloads them from the store on a
//! fixed interval, and turns price updates into decision invocations.

use super::{
    DecisionRoutine, PriceSampler, RunningGuard, StoreError, StrategyState, StrategyStatus,
    StrategyStore,
};
use crate::telemetry::{increment, set_gauge, CounterMetric, GaugeMetric};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_RELOAD_INTERVAL: Duration = Duration::from_millis(1);

struct ReloadTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Per-account trigger evaluation and dispatch
pub struct StrategyManager {
    reload_interval: Duration,
    store: Arc<dyn StrategyStore>,
    decision: Arc<dyn DecisionRoutine>,
    sampler: Arc<dyn PriceSampler>,
    strategies: RwLock<HashMap<i64, Arc<StrategyState>>>,
    running: AtomicBool,
    reload_task: tokio::sync::Mutex<Option<ReloadTask>>,
}

impl StrategyManager {
    pub fn new(
        reload_interval: Duration,
        store: Arc<dyn StrategyStore>,
        decision: Arc<dyn DecisionRoutine>,
        sampler: Arc<dyn PriceSampler>,
    ) -> Self {
        Self {
            reload_interval: reload_interval.max(MIN_RELOAD_INTERVAL),
            store,
            decision,
            sampler,
            strategies: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            reload_task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Load strategies and start the periodic reload
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.reload_task.lock().await;
        if task.is_some() {
            tracing::warn!("Strategy manager already running");
            return;
        }

        if let Err(e) = self.reload().await {
            tracing::error!(error = %e, "Initial strategy load failed");
        }

        let cancel = CancellationToken::new();
        let manager = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            manager.reload_loop(token).await;
        });

        *task = Some(ReloadTask { cancel, handle });
        self.running.store(true, Ordering::Release);
        tracing::info!(
            reload_interval_secs = self.reload_interval.as_secs(),
            "Strategy manager started"
        );
    }

    /// Stop reloading and triggering; in-flight invocations run to completion
    pub async fn stop(&self) {
        self.running.store(false, Ordering::Release);

        let task = self.reload_task.lock().await.take();
        let Some(ReloadTask { cancel, mut handle }) = task else {
            return;
        };

        cancel.cancel();
        if timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
            tracing::warn!("Strategy reload loop did not stop in time, aborting");
            handle.abort();
        }

        tracing::info!("Strategy manager stopped");
    }

    async fn reload_loop(&self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.reload_interval, self.reload_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reload().await {
                        tracing::warn!(error = %e, "Strategy reload failed, keeping previous set");
                    }
                }
            }
        }
    }

    /// Merge the store's configs into the live map
    ///
    /// Known accounts are updated in place so their lock and running flag
    /// survive. Accounts gone from the store are dropped, or kept disabled
    /// while an invocation is still in flight. On a store error the map is
    /// left untouched.
    pub async fn reload(&self) -> Result<usize, StoreError> {
        let configs = match self.store.load().await {
            Ok(configs) => configs,
            Err(e) => {
                increment(CounterMetric::StoreFailures);
                return Err(e);
            }
        };

        let mut strategies = self.strategies.write().unwrap_or_else(|e| e.into_inner());
        let mut seen = HashSet::with_capacity(configs.len());
        let mut added = 0usize;

        for config in &configs {
            seen.insert(config.account_id);
            match strategies.get(&config.account_id) {
                Some(state) => state.apply(config),
                None => {
                    strategies.insert(config.account_id, Arc::new(StrategyState::new(config)));
                    added += 1;
                }
            }
        }

        strategies.retain(|account_id, state| {
            if seen.contains(account_id) {
                return true;
            }
            if state.is_running() {
                state.disable();
                tracing::warn!(account_id, "Strategy removed from store while running, disabling");
                return true;
            }
            tracing::info!(account_id, "Strategy removed");
            false
        });

        let count = strategies.len();
        let running = strategies.values().filter(|s| s.is_running()).count();
        set_gauge(GaugeMetric::LoadedStrategies, count as f64);
        set_gauge(GaugeMetric::RunningStrategies, running as f64);

        for state in strategies.values() {
            let status = state.status();
            tracing::debug!(
                account_id = state.account_id(),
                enabled = status.enabled,
                threshold = %status.price_threshold_percent,
                interval_secs = status.trigger_interval_secs,
                last_trigger_at = ?status.last_trigger_at,
                "Strategy loaded"
            );
        }
        tracing::info!(count, added, "Strategies reloaded");

        Ok(count)
    }

    /// Feed one price update through sampling and every account's trigger
    ///
    /// Returns the accounts that triggered. Each trigger runs on its own task.
    pub fn handle_price_update(
        &self,
        instrument: &str,
        price: Decimal,
        event_time: DateTime<Utc>,
    ) -> Vec<i64> {
        if !self.is_running() {
            return Vec::new();
        }

        if self.sampler.should_sample(instrument, event_time) {
            self.sampler.add_sample(instrument, price, event_time);
        }

        let states: Vec<Arc<StrategyState>> = self
            .strategies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut triggered = Vec::new();
        for state in states {
            let Some(reason) = state.should_trigger(instrument, event_time, self.sampler.as_ref())
            else {
                continue;
            };

            let account_id = state.account_id();
            tracing::info!(
                account_id,
                instrument,
                reason = reason.label(),
                elapsed_secs = reason.elapsed_secs,
                change_percent = ?reason.change_percent,
                "Strategy triggered"
            );
            increment(CounterMetric::StrategyTriggers);

            let guard = RunningGuard::new(state);
            let store = Arc::clone(&self.store);
            let decision = Arc::clone(&self.decision);
            tokio::spawn(execute(store, decision, guard, event_time));
            triggered.push(account_id);
        }

        triggered
    }

    pub fn strategy(&self, account_id: i64) -> Option<Arc<StrategyState>> {
        self.strategies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&account_id)
            .cloned()
    }

    pub fn status(&self) -> StrategyStatus {
        let strategies = self.strategies.read().unwrap_or_else(|e| e.into_inner());
        StrategyStatus {
            running: self.is_running(),
            strategy_count: strategies.len(),
            strategies: strategies
                .iter()
                .map(|(id, state)| (*id, state.status()))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}

/// Persist the trigger time, then run the decision routine. The guard clears
/// the running flag when this future completes or is dropped.
async fn execute(
    store: Arc<dyn StrategyStore>,
    decision: Arc<dyn DecisionRoutine>,
    guard: RunningGuard,
    event_time: DateTime<Utc>,
) {
    let account_id = guard.account_id();

    if let Err(e) = store.record_trigger(account_id, event_time).await {
        increment(CounterMetric::StoreFailures);
        tracing::warn!(account_id, error = %e, "Failed to persist trigger time");
    }

    let started = Instant::now();
    match decision.invoke(account_id).await {
        Ok(()) => {
            tracing::info!(
                account_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Decision routine completed"
            );
        }
        Err(e) => {
            increment(CounterMetric::DecisionFailures);
            tracing::error!(account_id, error = %e, "Decision routine failed");
        }
    }

    drop(guard);
}
