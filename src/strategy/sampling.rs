//! Price sampling pool
//!
//! Keeps a short rolling window of spaced-out samples per instrument. The
//! change across the window is what the price leg of a trigger compares
//! against an account's threshold.

use super::PriceSampler;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Samples {
    window: VecDeque<(DateTime<Utc>, Decimal)>,
}

/// Rolling sample window per instrument
pub struct SamplingPool {
    interval: Duration,
    capacity: usize,
    samples: Mutex<HashMap<String, Samples>>,
}

impl SamplingPool {
    pub fn new(interval: std::time::Duration, capacity: usize) -> Self {
        Self {
            interval: Duration::from_std(interval).unwrap_or_else(|_| Duration::weeks(52)),
            capacity: capacity.max(2),
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Number of samples held for an instrument
    pub fn len(&self, instrument: &str) -> usize {
        self.lock()
            .get(instrument)
            .map_or(0, |s| s.window.len())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Samples>> {
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PriceSampler for SamplingPool {
    fn should_sample(&self, instrument: &str, at: DateTime<Utc>) -> bool {
        match self.lock().get(instrument).and_then(|s| s.window.back()) {
            Some((last, _)) => at - *last >= self.interval,
            None => true,
        }
    }

    fn add_sample(&self, instrument: &str, price: Decimal, at: DateTime<Utc>) {
        let mut samples = self.lock();
        let entry = samples.entry(instrument.to_string()).or_default();
        entry.window.push_back((at, price));
        while entry.window.len() > self.capacity {
            entry.window.pop_front();
        }
    }

    /// `(last - first) / first * 100` over the window; `None` until two
    /// samples exist or when the oldest price is zero
    fn price_change_percent(&self, instrument: &str) -> Option<Decimal> {
        let samples = self.lock();
        let window = &samples.get(instrument)?.window;
        if window.len() < 2 {
            return None;
        }
        let (_, first) = window.front()?;
        let (_, last) = window.back()?;
        if first.is_zero() {
            return None;
        }
        Some((last - first) / first * Decimal::ONE_HUNDRED)
    }
}
