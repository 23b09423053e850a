//! Integration tests for the streaming feed against an in-process server

use crate::support::{eventually, MockFeedServer};
use async_trait::async_trait;
use mids_trigger::cache::{CacheError, FallbackSource, LivePrices, PriceCache};
use mids_trigger::config::CacheConfig;
use mids_trigger::feed::{CandleInterval, StreamConnection, Subscription};
use mids_trigger::ws::{ConnectionEvent, ConnectionState, WsConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn ws_config(server: &MockFeedServer) -> WsConfig {
    WsConfig::new(server.url())
        .base_delay(Duration::from_millis(50))
        .heartbeat_interval(Duration::from_secs(30))
        .disconnect_timeout(Duration::from_secs(2))
}

fn as_set(values: Vec<Value>) -> HashSet<String> {
    values.into_iter().map(|v| v.to_string()).collect()
}

fn wire(subscription: &Subscription) -> String {
    serde_json::to_value(subscription).unwrap().to_string()
}

async fn wait_connected(connection: &StreamConnection) {
    let mut state = connection.state_receiver();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .expect("connection did not come up")
    .unwrap();
}

#[tokio::test]
async fn test_subscriptions_replayed_after_reconnect() {
    let server = MockFeedServer::spawn().await.unwrap();
    let connection = StreamConnection::new(ws_config(&server));

    let mids = Subscription::all_mids();
    let trades = Subscription::trades("btc");
    let book = Subscription::l2_book("eth", Some(5), None);
    connection.subscribe(mids.clone());
    let trades_key = connection.subscribe(trades.clone());
    connection.subscribe(book.clone());

    connection.connect().await.unwrap();
    wait_connected(&connection).await;
    eventually(|| server.requests(0, "subscribe").len() == 3).await;

    // Added while connected goes out immediately
    let candle = Subscription::candle("SOL", CandleInterval::OneHour);
    connection.subscribe(candle.clone());
    assert!(connection.unsubscribe(&trades_key));
    eventually(|| server.requests(0, "subscribe").len() == 4).await;
    eventually(|| server.requests(0, "unsubscribe").len() == 1).await;

    let mut events = connection.events();
    server.kick();
    eventually(|| server.accepted() == 2).await;
    eventually(|| server.requests(1, "subscribe").len() == 3).await;

    let expected: HashSet<String> = [&mids, &book, &candle].into_iter().map(wire).collect();
    assert_eq!(as_set(server.requests(1, "subscribe")), expected);
    assert_eq!(connection.registry().len(), 3);

    let mut saw_reconnecting = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ConnectionEvent::Reconnecting { attempt: 1, .. }) {
            saw_reconnecting = true;
        }
    }
    assert!(saw_reconnecting);
    assert!(connection.stats().reconnects >= 1);

    connection.disconnect().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_pushed_mids_reach_the_connection() {
    let server = MockFeedServer::spawn().await.unwrap();
    let connection = StreamConnection::new(ws_config(&server));
    connection.subscribe(Subscription::all_mids());
    connection.connect().await.unwrap();
    wait_connected(&connection).await;
    eventually(|| server.requests(0, "subscribe").len() == 1).await;

    server.push(r#"{"channel":"subscriptionResponse","data":{"method":"subscribe"}}"#);
    server.push("garbage");
    server.push(r#"{"channel":"allMids","data":{"mids":{"BTC":"97000.5","ETH":"3100"}}}"#);

    eventually(|| connection.mid("BTC").is_some()).await;
    assert_eq!(connection.mid("btc/usdc").unwrap().price, dec!(97000.5));
    assert_eq!(connection.mids().len(), 2);
    assert_eq!(connection.stats().malformed, 1);

    connection.disconnect().await;
}

#[derive(Default)]
struct CountingFallback(AtomicUsize);

#[async_trait]
impl FallbackSource for CountingFallback {
    async fn fetch_all_mids(&self) -> Result<HashMap<String, Decimal>, CacheError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(HashMap::from([("BTC".to_string(), dec!(1))]))
    }
}

#[tokio::test]
async fn test_cache_prefers_live_feed_then_falls_back() {
    let server = MockFeedServer::spawn().await.unwrap();
    let connection = Arc::new(StreamConnection::new(ws_config(&server)));
    connection.subscribe(Subscription::all_mids());
    connection.connect().await.unwrap();
    wait_connected(&connection).await;

    let fallback = Arc::new(CountingFallback::default());
    let live: Arc<dyn LivePrices> = connection.clone();
    let cache = PriceCache::new(&CacheConfig::default(), Some(live), fallback.clone());

    server.push(r#"{"channel":"allMids","data":{"mids":{"BTC":"97000"}}}"#);
    eventually(|| connection.mid("BTC").is_some()).await;

    assert_eq!(cache.get("BTC").await, Some(dec!(97000)));
    assert_eq!(fallback.0.load(Ordering::SeqCst), 0);

    // Unknown to the feed: one pull
    assert_eq!(cache.get("DOGE").await, None);
    assert_eq!(fallback.0.load(Ordering::SeqCst), 1);

    connection.disconnect().await;
    assert!(!LivePrices::is_connected(connection.as_ref()));
}

#[tokio::test]
async fn test_cache_serves_pushed_spot_pair_from_feed() {
    let server = MockFeedServer::spawn().await.unwrap();
    let connection = Arc::new(StreamConnection::new(ws_config(&server)));
    connection.subscribe(Subscription::all_mids());
    connection.connect().await.unwrap();
    wait_connected(&connection).await;
    eventually(|| server.requests(0, "subscribe").len() == 1).await;

    let fallback = Arc::new(CountingFallback::default());
    let live: Arc<dyn LivePrices> = connection.clone();
    let cache = PriceCache::new(&CacheConfig::default(), Some(live), fallback.clone());

    server.push(r#"{"channel":"allMids","data":{"mids":{"PURR/USDC":"0.2","BTC":"97000"}}}"#);
    eventually(|| connection.mids().len() == 2).await;

    assert_eq!(cache.get("PURR/USDC").await, Some(dec!(0.2)));
    assert_eq!(cache.get("purr").await, Some(dec!(0.2)));
    assert_eq!(fallback.0.load(Ordering::SeqCst), 0);

    let all = cache.get_all().await;
    assert_eq!(all.get("PURR"), Some(&dec!(0.2)));
    assert!(!all.contains_key("PURR/USDC"));

    connection.disconnect().await;
}

#[tokio::test]
async fn test_zero_heartbeat_keeps_session_alive() {
    let server = MockFeedServer::spawn().await.unwrap();
    let mut config = ws_config(&server);
    config.heartbeat_interval = Duration::ZERO;
    let connection = StreamConnection::new(config);
    connection.subscribe(Subscription::all_mids());
    connection.connect().await.unwrap();
    wait_connected(&connection).await;
    eventually(|| server.requests(0, "subscribe").len() == 1).await;

    server.push(r#"{"channel":"allMids","data":{"mids":{"BTC":"97000"}}}"#);
    eventually(|| connection.mid("BTC").is_some()).await;
    eventually(|| server.pings(0) >= 1).await;
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(server.accepted(), 1);

    connection.disconnect().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_heartbeat_pings_server() {
    let server = MockFeedServer::spawn().await.unwrap();
    let connection = StreamConnection::new(
        ws_config(&server).heartbeat_interval(Duration::from_millis(100)),
    );
    connection.connect().await.unwrap();
    wait_connected(&connection).await;

    eventually(|| server.pings(0) >= 2).await;
    assert_eq!(connection.state(), ConnectionState::Connected);

    connection.disconnect().await;
}
