//! Streaming feed connection with resubscribe-on-connect and linear backoff
//!
//! One [`StreamConnection`] owns one physical socket. A supervisor task drives
//! the lifecycle: connect, replay the [`SubscriptionRegistry`], run the receive
//! and send/heartbeat loops until one of them faults, then back off and try
//! again until the retry cap is hit.

use super::message::{AllMids, Channel, FeedMessage, ParseError};
use super::subscription::{Subscription, SubscriptionKey, SubscriptionRegistry};
use super::types::{normalize_symbol, PricePoint};
use crate::telemetry::{increment, CounterMetric};
use crate::ws::{
    ConnectionEvent, ConnectionState, Connector, TungsteniteConnector, WsConfig, WsError, WsStream,
    MIN_HEARTBEAT_INTERVAL,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Observer invoked for every message on a channel
pub type FeedObserver = Arc<dyn Fn(&FeedMessage) + Send + Sync>;

const PING_FRAME: &str = r#"{"method":"ping"}"#;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Counters for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub messages: u64,
    pub malformed: u64,
    pub unknown_channel: u64,
    pub reconnects: u64,
    pub observer_panics: u64,
}

#[derive(Default)]
struct Counters {
    messages: AtomicU64,
    malformed: AtomicU64,
    unknown_channel: AtomicU64,
    reconnects: AtomicU64,
    observer_panics: AtomicU64,
}

struct Shared {
    config: WsConfig,
    connector: Arc<dyn Connector>,
    registry: SubscriptionRegistry,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    mids: RwLock<HashMap<String, PricePoint>>,
    observers: RwLock<Vec<(Channel, FeedObserver)>>,
    counters: Counters,
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum SessionEnd {
    Cancelled,
    Fault(WsError),
}

/// Leaves the connection down and observable if the supervisor unwinds
struct UnwindGuard<'a> {
    shared: &'a Shared,
    attempts: u32,
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        tracing::error!(attempts = self.attempts, "Feed supervisor panicked");
        increment(CounterMetric::FeedFatal);
        self.shared.set_outbound(None);
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.publish(ConnectionEvent::Fatal {
            attempts: self.attempts,
        });
    }
}

/// A single feed connection
pub struct StreamConnection {
    shared: Arc<Shared>,
    supervisor: tokio::sync::Mutex<Option<Supervisor>>,
}

impl StreamConnection {
    /// Create a connection using the tokio-tungstenite connector
    pub fn new(config: WsConfig) -> Self {
        Self::with_connector(config, Arc::new(TungsteniteConnector))
    }

    /// Create a connection with a custom connector
    pub fn with_connector(config: WsConfig, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                registry: SubscriptionRegistry::new(),
                state_tx,
                events_tx,
                outbound: Mutex::new(None),
                mids: RwLock::new(HashMap::new()),
                observers: RwLock::new(Vec::new()),
                counters: Counters::default(),
            }),
            supervisor: tokio::sync::Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.config.url
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.shared.registry
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Lifecycle events, including the terminal `Fatal`
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Start the supervisor
    ///
    /// Returns immediately; progress is visible through [`Self::state_receiver`]
    /// and [`Self::events`].
    pub async fn connect(&self) -> Result<(), WsError> {
        let mut supervisor = self.supervisor.lock().await;
        if let Some(existing) = supervisor.as_ref() {
            if !existing.handle.is_finished() {
                return Err(WsError::AlreadyRunning);
            }
        }

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            shared.run_supervisor(token).await;
        });

        *supervisor = Some(Supervisor { cancel, handle });
        Ok(())
    }

    /// Stop both loops and close the socket
    ///
    /// Waits at most `disconnect_timeout` for the loops before aborting them.
    pub async fn disconnect(&self) {
        let supervisor = self.supervisor.lock().await.take();
        let Some(Supervisor { cancel, mut handle }) = supervisor else {
            return;
        };

        tracing::info!(url = %self.shared.config.url, "Disconnecting feed");
        cancel.cancel();

        if timeout(self.shared.config.disconnect_timeout, &mut handle)
            .await
            .is_err()
        {
            tracing::warn!("Feed loops did not stop in time, aborting");
            handle.abort();
        }

        self.shared.set_outbound(None);
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.publish(ConnectionEvent::Disconnected);
        tracing::info!("Feed disconnected");
    }

    /// Add a subscription; sent immediately when connected, replayed on every reconnect
    pub fn subscribe(&self, subscription: Subscription) -> SubscriptionKey {
        let message = subscription.to_subscribe_message();
        let kind = subscription.kind();
        let (key, added) = self.shared.registry.insert(subscription);

        if self.shared.send_json(&message).is_ok() {
            tracing::debug!(%key, "Sent subscription");
        }
        if added {
            tracing::info!(kind, %key, "Added subscription");
        }
        key
    }

    /// Remove a subscription; false when the key was unknown
    pub fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        let Some(subscription) = self.shared.registry.remove(key) else {
            tracing::warn!(%key, "Subscription not found");
            return false;
        };

        if self
            .shared
            .send_json(&subscription.to_unsubscribe_message())
            .is_ok()
        {
            tracing::info!(kind = subscription.kind(), "Unsubscribed");
        }
        true
    }

    pub fn unsubscribe_all(&self) {
        for key in self.shared.registry.keys() {
            self.unsubscribe(&key);
        }
    }

    /// Register an observer for one channel
    pub fn observe<F>(&self, channel: Channel, observer: F)
    where
        F: Fn(&FeedMessage) + Send + Sync + 'static,
    {
        let mut observers = self
            .shared
            .observers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        observers.push((channel, Arc::new(observer)));
    }

    /// Register a typed observer for price snapshots
    pub fn on_all_mids<F>(&self, observer: F)
    where
        F: Fn(&AllMids) + Send + Sync + 'static,
    {
        self.observe(Channel::AllMids, move |message| {
            if let FeedMessage::AllMids(mids) = message {
                observer(mids);
            }
        });
    }

    /// Latest pushed price for an instrument
    pub fn mid(&self, instrument: &str) -> Option<PricePoint> {
        let mids = self.shared.mids.read().unwrap_or_else(|e| e.into_inner());
        mids.get(&normalize_symbol(instrument)).copied()
    }

    /// Every pushed price
    pub fn mids(&self) -> HashMap<String, PricePoint> {
        let mids = self.shared.mids.read().unwrap_or_else(|e| e.into_inner());
        mids.clone()
    }

    pub fn stats(&self) -> FeedStats {
        let c = &self.shared.counters;
        FeedStats {
            messages: c.messages.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            unknown_channel: c.unknown_channel.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
            observer_panics: c.observer_panics.load(Ordering::Relaxed),
        }
    }

    /// Process one raw text frame as if it arrived on the socket
    pub fn handle_text(&self, text: &str) {
        self.shared.handle_text(text);
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn publish(&self, event: ConnectionEvent) {
        // no receivers is fine
        let _ = self.events_tx.send(event);
    }

    fn set_outbound(&self, sender: Option<mpsc::UnboundedSender<Message>>) {
        let mut outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        *outbound = sender;
    }

    fn send_json(&self, value: &Value) -> Result<(), WsError> {
        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        let sender = outbound.as_ref().ok_or(WsError::ChannelClosed)?;
        sender
            .send(Message::Text(value.to_string()))
            .map_err(|_| WsError::ChannelClosed)
    }

    async fn run_supervisor(&self, cancel: CancellationToken) {
        let mut guard = UnwindGuard {
            shared: self,
            attempts: 0,
        };
        let mut attempt: u32 = 0;

        loop {
            guard.attempts = attempt;
            self.set_state(ConnectionState::Connecting);
            tracing::info!(url = %self.config.url, attempt, "Connecting to feed");

            let connected = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.connector.connect(&self.config) => result,
            };

            match connected {
                Ok(stream) => {
                    attempt = 0;
                    match self.run_session(stream, &cancel).await {
                        SessionEnd::Cancelled => return,
                        SessionEnd::Fault(e) => {
                            tracing::warn!(error = %e, "Feed connection lost");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "Feed handshake failed");
                }
            }

            if cancel.is_cancelled() {
                return;
            }

            attempt += 1;
            if !self.config.allows_attempt(attempt) {
                let attempts = attempt - 1;
                tracing::error!(
                    attempts,
                    error = %WsError::MaxReconnectsExceeded,
                    "Giving up on feed"
                );
                increment(CounterMetric::FeedFatal);
                self.set_state(ConnectionState::Disconnected);
                self.publish(ConnectionEvent::Fatal { attempts });
                return;
            }

            let delay = self.config.reconnect_delay(attempt);
            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            increment(CounterMetric::FeedReconnects);
            self.set_state(ConnectionState::Reconnecting);
            self.publish(ConnectionEvent::Reconnecting { attempt, delay });
            tracing::info!(
                attempt,
                max = self.config.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(delay) => {}
            }
        }
    }

    async fn run_session(&self, stream: WsStream, cancel: &CancellationToken) -> SessionEnd {
        let (write, read) = stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        // outbound handle goes live before the replay snapshot so a concurrent
        // subscribe is either replayed or sent directly
        self.set_outbound(Some(out_tx.clone()));

        let subscriptions = self.registry.snapshot();
        for subscription in &subscriptions {
            let frame = Message::Text(subscription.to_subscribe_message().to_string());
            if out_tx.send(frame).is_err() {
                tracing::error!(kind = subscription.kind(), "Failed to queue resubscription");
            }
        }

        self.set_state(ConnectionState::Connected);
        self.publish(ConnectionEvent::Connected);
        tracing::info!(
            url = %self.config.url,
            replayed = subscriptions.len(),
            "Feed connected"
        );

        let session = cancel.child_token();
        let (received, sent) = tokio::join!(
            async {
                let result = self.receive_loop(read, out_tx, &session).await;
                session.cancel();
                result
            },
            async {
                let result =
                    send_loop(write, out_rx, self.config.heartbeat_interval, &session).await;
                session.cancel();
                result
            },
        );

        self.set_outbound(None);

        if cancel.is_cancelled() {
            return SessionEnd::Cancelled;
        }
        let fault = received
            .err()
            .or(sent.err())
            .unwrap_or_else(|| WsError::ConnectionFailed("session ended".into()));
        SessionEnd::Fault(fault)
    }

    async fn receive_loop(
        &self,
        mut read: SplitStream<WsStream>,
        out_tx: mpsc::UnboundedSender<Message>,
        session: &CancellationToken,
    ) -> Result<(), WsError> {
        loop {
            tokio::select! {
                _ = session.cancelled() => return Ok(()),
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => self.handle_text(&text),
                        Err(_) => self.record_malformed("binary frame is not utf-8"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = out_tx.send(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Received close frame");
                        return Err(WsError::ConnectionFailed("closed by server".into()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(WsError::ConnectionFailed(e.to_string())),
                    None => {
                        return Err(WsError::ConnectionFailed("Stream ended unexpectedly".into()));
                    }
                },
            }
        }
    }

    fn handle_text(&self, text: &str) {
        self.counters.messages.fetch_add(1, Ordering::Relaxed);
        increment(CounterMetric::FeedMessages);

        match FeedMessage::parse(text) {
            Ok(message) => {
                self.apply(&message);
                self.dispatch(&message);
            }
            Err(ParseError::UnknownChannel(channel)) => {
                self.counters.unknown_channel.fetch_add(1, Ordering::Relaxed);
                increment(CounterMetric::FeedUnknownChannel);
                tracing::debug!(%channel, "Unknown channel, dropping");
            }
            Err(e) => self.record_malformed(&e.to_string()),
        }
    }

    fn record_malformed(&self, reason: &str) {
        self.counters.malformed.fetch_add(1, Ordering::Relaxed);
        increment(CounterMetric::FeedMalformed);
        tracing::warn!(reason, "Dropping malformed frame");
    }

    /// Internal handling before observers see the message
    fn apply(&self, message: &FeedMessage) {
        match message {
            FeedMessage::AllMids(mids) => {
                let now = Instant::now();
                let prices = mids.prices();
                let count = prices.len();
                let mut cache = self.mids.write().unwrap_or_else(|e| e.into_inner());
                for (coin, price) in prices {
                    cache.insert(coin, PricePoint::new(price, now));
                }
                tracing::trace!(count, "Updated mid prices");
            }
            FeedMessage::Trades(trades) => {
                tracing::debug!(count = trades.len(), "Received trades");
            }
            FeedMessage::Book(book) => {
                tracing::debug!(coin = %book.coin, "Received L2 book update");
            }
            FeedMessage::Bbo(bbo) => {
                tracing::debug!(coin = %bbo.coin, "Received BBO");
            }
            FeedMessage::Candle(_) => tracing::debug!("Received candle update"),
            FeedMessage::ActiveAssetCtx(_) => tracing::debug!("Received asset context"),
            FeedMessage::AccountState(_) => tracing::debug!("Received account state update"),
            FeedMessage::OpenOrders(_) => tracing::debug!("Received open orders update"),
            FeedMessage::OrderUpdates(_) => tracing::debug!("Received order updates"),
            FeedMessage::UserEvents(_) => tracing::debug!("Received user event"),
            FeedMessage::UserFills(_) => tracing::debug!("Received user fills"),
            FeedMessage::UserFundings(_) => tracing::debug!("Received user fundings"),
            FeedMessage::Notification(n) => {
                tracing::info!(notification = %n.notification, "Feed notification");
            }
            FeedMessage::Pong => tracing::trace!("Received pong"),
            FeedMessage::SubscriptionAck(ack) => {
                tracing::debug!(%ack, "Subscription confirmed");
            }
        }
    }

    fn dispatch(&self, message: &FeedMessage) {
        let channel = message.channel();
        let matching: Vec<FeedObserver> = {
            let observers = self.observers.read().unwrap_or_else(|e| e.into_inner());
            observers
                .iter()
                .filter(|(c, _)| *c == channel)
                .map(|(_, observer)| Arc::clone(observer))
                .collect()
        };
        for observer in matching {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(message))) {
                self.counters.observer_panics.fetch_add(1, Ordering::Relaxed);
                increment(CounterMetric::FeedObserverPanics);
                tracing::error!(
                    ?channel,
                    panic = panic_message(payload.as_ref()),
                    "Feed observer panicked"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

async fn send_loop(
    mut write: SplitSink<WsStream, Message>,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
    heartbeat: Duration,
    session: &CancellationToken,
) -> Result<(), WsError> {
    let heartbeat = heartbeat.max(MIN_HEARTBEAT_INTERVAL);
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = session.cancelled() => {
                let _ = timeout(CLOSE_TIMEOUT, async {
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                })
                .await;
                return Ok(());
            }
            msg = out_rx.recv() => match msg {
                Some(frame) => {
                    write
                        .send(frame)
                        .await
                        .map_err(|e| WsError::SendFailed(e.to_string()))?;
                }
                None => return Err(WsError::ChannelClosed),
            },
            _ = ticker.tick() => {
                write
                    .send(Message::Text(PING_FRAME.to_string()))
                    .await
                    .map_err(|e| WsError::SendFailed(e.to_string()))?;
                tracing::trace!("Sent heartbeat ping");
            }
        }
    }
}
