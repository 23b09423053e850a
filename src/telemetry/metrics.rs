//! Prometheus metrics

use std::net::SocketAddr;

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Text frames received from the feed
    FeedMessages,
    /// Frames dropped as malformed
    FeedMalformed,
    /// Frames on channels we do not know
    FeedUnknownChannel,
    /// Reconnect attempts scheduled
    FeedReconnects,
    /// Retry cap exceeded or supervisor lost
    FeedFatal,
    /// Feed observers that panicked while handling a message
    FeedObserverPanics,
    /// Tier-3 refreshes against the fallback source
    CacheFallbackRefresh,
    /// Failed fallback refreshes
    CacheFallbackError,
    /// Decision routine invocations started
    StrategyTriggers,
    /// Decision routine invocations that returned an error
    DecisionFailures,
    /// Strategy store reads or writes that failed
    StoreFailures,
    /// Price updates dropped because the strategy queue was full
    PriceUpdatesDropped,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Instruments held by the local price cache
    CachedInstruments,
    /// Strategies loaded from the store
    LoadedStrategies,
    /// Strategies with a decision in flight
    RunningStrategies,
}

impl CounterMetric {
    fn name(self) -> &'static str {
        match self {
            Self::FeedMessages => "midstrigger_feed_messages_total",
            Self::FeedMalformed => "midstrigger_feed_malformed_total",
            Self::FeedUnknownChannel => "midstrigger_feed_unknown_channel_total",
            Self::FeedReconnects => "midstrigger_feed_reconnects_total",
            Self::FeedFatal => "midstrigger_feed_fatal_total",
            Self::FeedObserverPanics => "midstrigger_feed_observer_panics_total",
            Self::CacheFallbackRefresh => "midstrigger_cache_fallback_refresh_total",
            Self::CacheFallbackError => "midstrigger_cache_fallback_error_total",
            Self::StrategyTriggers => "midstrigger_strategy_triggers_total",
            Self::DecisionFailures => "midstrigger_decision_failures_total",
            Self::StoreFailures => "midstrigger_store_failures_total",
            Self::PriceUpdatesDropped => "midstrigger_price_updates_dropped_total",
        }
    }
}

impl GaugeMetric {
    fn name(self) -> &'static str {
        match self {
            Self::CachedInstruments => "midstrigger_cached_instruments",
            Self::LoadedStrategies => "midstrigger_loaded_strategies",
            Self::RunningStrategies => "midstrigger_running_strategies",
        }
    }
}

/// Increment a counter by one
pub fn increment(metric: CounterMetric) {
    metrics::counter!(metric.name()).increment(1);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    metrics::gauge!(metric.name()).set(value);
}

/// Install the Prometheus recorder with an HTTP scrape endpoint
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {}", e))?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        increment(CounterMetric::FeedMessages);
        set_gauge(GaugeMetric::RunningStrategies, 2.0);
    }

    #[test]
    fn test_metric_names_are_prefixed() {
        assert!(CounterMetric::CacheFallbackRefresh
            .name()
            .starts_with("midstrigger_"));
        assert!(GaugeMetric::LoadedStrategies.name().starts_with("midstrigger_"));
    }
}
