//! End-to-end: mock feed -> engine -> strategy manager -> decision routine

use crate::support::{eventually, MockFeedServer};
use async_trait::async_trait;
use mids_trigger::cache::{CacheError, FallbackSource};
use mids_trigger::config::Config;
use mids_trigger::engine::Engine;
use mids_trigger::feed::{StreamConnection, Subscription};
use mids_trigger::strategy::{
    DecisionRoutine, JsonFileStore, StrategyConfig, StrategyStore,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct OfflineFallback;

#[async_trait]
impl FallbackSource for OfflineFallback {
    async fn fetch_all_mids(&self) -> Result<HashMap<String, Decimal>, CacheError> {
        Err(CacheError::Decode("offline".into()))
    }
}

#[derive(Default)]
struct RecordingDecision(Mutex<Vec<i64>>);

impl RecordingDecision {
    fn calls(&self) -> Vec<i64> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionRoutine for RecordingDecision {
    async fn invoke(&self, account_id: i64) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(account_id);
        Ok(())
    }
}

#[tokio::test]
async fn test_mids_push_triggers_decision_once_per_account() {
    let server = MockFeedServer::spawn().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path().join("strategies.json")));
    store
        .save(&[
            StrategyConfig::new(1, dec!(2.0), 300),
            StrategyConfig::new(2, dec!(2.0), 300).disabled(),
        ])
        .await
        .unwrap();

    let mut config = Config::default();
    config.feed.ws_url = Some(server.url());
    config.feed.symbols = vec!["BTC".into()];

    let connection = Arc::new(StreamConnection::new(config.feed.to_ws_config()));
    let decision = Arc::new(RecordingDecision::default());
    let engine = Engine::from_parts(
        &config,
        connection,
        Arc::new(OfflineFallback),
        store.clone(),
        decision.clone(),
    );
    engine.start().await.unwrap();

    let all_mids = serde_json::to_value(Subscription::all_mids()).unwrap();
    eventually(|| server.requests(0, "subscribe") == vec![all_mids.clone()]).await;

    server.push(r#"{"channel":"allMids","data":{"mids":{"BTC":"97000","ETH":"3100"}}}"#);
    eventually(|| decision.calls() == vec![1]).await;

    // Interval not elapsed and no sampled move: a second snapshot is quiet
    server.push(r#"{"channel":"allMids","data":{"mids":{"BTC":"97010"}}}"#);
    eventually(|| engine.connection().mid("BTC").map(|p| p.price) == Some(dec!(97010))).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(decision.calls(), vec![1]);

    // Trigger time was persisted before the decision ran
    let stored = store.load().await.unwrap();
    assert!(stored[0].last_trigger_at.is_some());
    assert!(stored[1].last_trigger_at.is_none());

    assert_eq!(engine.cache().get("BTC").await, Some(dec!(97010)));

    let status = engine.status().await;
    assert_eq!(status.connection, "connected");
    assert_eq!(status.strategies.strategy_count, 2);

    engine.shutdown().await;
    assert!(!status.strategies.strategies[&2].enabled);
}
