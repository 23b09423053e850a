//! Per-account trigger state

use super::{AccountStatus, PriceSampler, StrategyConfig, TriggerReason};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct Inner {
    price_threshold_percent: Decimal,
    trigger_interval_secs: u64,
    enabled: bool,
    last_trigger_at: Option<DateTime<Utc>>,
}

/// Trigger state for one account
///
/// `running` is read without the lock as a fast path and only ever set to
/// true under it, so two updates racing on the same account cannot both
/// trigger.
#[derive(Debug)]
pub struct StrategyState {
    account_id: i64,
    running: AtomicBool,
    inner: Mutex<Inner>,
}

impl StrategyState {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            account_id: config.account_id,
            running: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                price_threshold_percent: config.price_threshold_percent,
                trigger_interval_secs: config.trigger_interval_secs,
                enabled: config.enabled,
                last_trigger_at: config.last_trigger_at,
            }),
        }
    }

    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn last_trigger_at(&self) -> Option<DateTime<Utc>> {
        self.lock().last_trigger_at
    }

    /// Evaluate a price update for this account
    ///
    /// On `Some`, `last_trigger_at` is already `event_time` and the account is
    /// marked running; the caller owns clearing it through a [`RunningGuard`].
    pub fn should_trigger(
        &self,
        instrument: &str,
        event_time: DateTime<Utc>,
        sampler: &dyn PriceSampler,
    ) -> Option<TriggerReason> {
        if self.is_running() {
            return None;
        }

        let mut inner = self.lock();
        if !inner.enabled || self.is_running() {
            return None;
        }

        // Never triggered counts from the epoch
        let elapsed = inner
            .last_trigger_at
            .map_or_else(|| Duration::seconds(event_time.timestamp()), |last| event_time - last);
        let interval_secs = i64::try_from(inner.trigger_interval_secs).unwrap_or(i64::MAX);
        let time = elapsed.num_seconds() >= interval_secs;

        let change_percent = sampler.price_change_percent(instrument);
        let price = change_percent.is_some_and(|c| c.abs() >= inner.price_threshold_percent);

        if !(time || price) {
            return None;
        }

        inner.last_trigger_at = Some(event_time);
        self.running.store(true, Ordering::Release);

        Some(TriggerReason {
            time,
            price,
            elapsed_secs: elapsed.num_seconds(),
            change_percent,
        })
    }

    /// Apply a reloaded config in place, keeping the lock and running flag.
    /// The later of the in-memory and stored trigger time wins.
    pub fn apply(&self, config: &StrategyConfig) {
        let mut inner = self.lock();
        inner.price_threshold_percent = config.price_threshold_percent;
        inner.trigger_interval_secs = config.trigger_interval_secs;
        inner.enabled = config.enabled;
        inner.last_trigger_at = inner.last_trigger_at.max(config.last_trigger_at);
    }

    pub fn disable(&self) {
        self.lock().enabled = false;
    }

    pub fn status(&self) -> AccountStatus {
        let inner = self.lock();
        AccountStatus {
            enabled: inner.enabled,
            running: self.is_running(),
            price_threshold_percent: inner.price_threshold_percent,
            trigger_interval_secs: inner.trigger_interval_secs,
            last_trigger_at: inner.last_trigger_at,
        }
    }

    fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Clears an account's running flag when dropped, including on panic
#[derive(Debug)]
pub struct RunningGuard {
    state: Arc<StrategyState>,
}

impl RunningGuard {
    /// Take ownership of a state that [`StrategyState::should_trigger`] just
    /// marked running
    pub fn new(state: Arc<StrategyState>) -> Self {
        Self { state }
    }

    pub fn account_id(&self) -> i64 {
        self.state.account_id
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.state.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SamplingPool;
    use rust_decimal_macros::dec;

    struct FixedChange(Option<Decimal>);

    impl PriceSampler for FixedChange {
        fn should_sample(&self, _: &str, _: DateTime<Utc>) -> bool {
            false
        }
        fn add_sample(&self, _: &str, _: Decimal, _: DateTime<Utc>) {}
        fn price_change_percent(&self, _: &str) -> Option<Decimal> {
            self.0
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn state() -> StrategyState {
        StrategyState::new(&StrategyConfig::new(1, dec!(2.0), 300).with_last_trigger(t0()))
    }

    #[test]
    fn test_interval_elapsed_triggers() {
        let state = state();
        let reason = state
            .should_trigger("BTC", t0() + Duration::seconds(301), &FixedChange(Some(dec!(0))))
            .unwrap();
        assert!(reason.time);
        assert!(!reason.price);
        assert_eq!(reason.elapsed_secs, 301);
        assert!(state.is_running());
        assert_eq!(state.last_trigger_at(), Some(t0() + Duration::seconds(301)));
    }

    #[test]
    fn test_huge_interval_only_disables_time_leg() {
        let state = StrategyState::new(
            &StrategyConfig::new(1, dec!(2.0), u64::MAX / 100).with_last_trigger(t0()),
        );
        let later = t0() + Duration::days(365 * 100);
        assert!(state
            .should_trigger("BTC", later, &FixedChange(Some(dec!(0))))
            .is_none());

        let reason = state
            .should_trigger("BTC", later, &FixedChange(Some(dec!(3))))
            .unwrap();
        assert!(!reason.time);
        assert!(reason.price);
    }

    #[test]
    fn test_huge_interval_never_triggered() {
        for secs in [u64::MAX, u64::MAX / 100, i64::MAX as u64 / 999] {
            let state = StrategyState::new(&StrategyConfig::new(1, dec!(2.0), secs));
            assert!(state
                .should_trigger("BTC", t0(), &FixedChange(None))
                .is_none());
        }
    }

    #[test]
    fn test_price_move_triggers() {
        let state = state();
        let reason = state
            .should_trigger("BTC", t0() + Duration::seconds(10), &FixedChange(Some(dec!(2.5))))
            .unwrap();
        assert!(!reason.time);
        assert!(reason.price);
        assert_eq!(reason.label(), "price");
    }

    #[test]
    fn test_negative_move_triggers() {
        let state = state();
        assert!(state
            .should_trigger("BTC", t0() + Duration::seconds(10), &FixedChange(Some(dec!(-2.0))))
            .is_some());
    }

    #[test]
    fn test_small_move_does_not_trigger() {
        let state = state();
        assert!(state
            .should_trigger("BTC", t0() + Duration::seconds(10), &FixedChange(Some(dec!(0.5))))
            .is_none());
        assert!(!state.is_running());
        assert_eq!(state.last_trigger_at(), Some(t0()));
    }

    #[test]
    fn test_no_samples_uses_time_only() {
        let state = state();
        assert!(state
            .should_trigger("BTC", t0() + Duration::seconds(10), &FixedChange(None))
            .is_none());
    }

    #[test]
    fn test_never_triggered_fires_immediately() {
        let state = StrategyState::new(&StrategyConfig::new(1, dec!(2.0), 300));
        let pool = SamplingPool::new(std::time::Duration::from_secs(18), 10);
        assert!(state.should_trigger("BTC", t0(), &pool).is_some());
    }

    #[test]
    fn test_disabled_never_triggers() {
        let state = StrategyState::new(&StrategyConfig::new(1, dec!(2.0), 300).disabled());
        assert!(state
            .should_trigger("BTC", t0(), &FixedChange(Some(dec!(50))))
            .is_none());
    }

    #[test]
    fn test_running_blocks_until_guard_drops() {
        let state = Arc::new(state());
        let sampler = FixedChange(Some(dec!(5)));
        let later = t0() + Duration::seconds(10);

        assert!(state.should_trigger("BTC", later, &sampler).is_some());
        let guard = RunningGuard::new(state.clone());
        assert!(state.should_trigger("BTC", later, &sampler).is_none());

        drop(guard);
        assert!(!state.is_running());
        assert!(state.should_trigger("BTC", later, &sampler).is_some());
    }

    #[test]
    fn test_concurrent_updates_trigger_once() {
        let state = Arc::new(StrategyState::new(&StrategyConfig::new(1, dec!(2.0), 300)));
        let sampler = Arc::new(FixedChange(None));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let state = state.clone();
                let sampler = sampler.clone();
                std::thread::spawn(move || {
                    state
                        .should_trigger("BTC", t0(), sampler.as_ref())
                        .is_some()
                })
            })
            .collect();

        let fired = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|fired| *fired)
            .count();
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_apply_keeps_later_trigger_time() {
        let state = state();
        let newer = t0() + Duration::seconds(60);
        state.apply(&StrategyConfig::new(1, dec!(3.0), 600).with_last_trigger(newer));
        assert_eq!(state.last_trigger_at(), Some(newer));

        state.apply(&StrategyConfig::new(1, dec!(3.0), 600).with_last_trigger(t0()));
        assert_eq!(state.last_trigger_at(), Some(newer));

        let status = state.status();
        assert_eq!(status.price_threshold_percent, dec!(3.0));
        assert_eq!(status.trigger_interval_secs, 600);
    }
}
