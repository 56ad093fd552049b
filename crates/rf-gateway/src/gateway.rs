//! Broadcast loop: broker subscription → windows → viewer fan-out.
//!
//! # Data flow
//!
//! ```text
//! Subscription ──► decode ──► WindowStore.push ──► encode once ──► ViewerRegistry.fan_out
//!                   │                                                   │
//!                   └─ malformed: counted, dropped                      └─ per-session SessionQueue
//! ```
//!
//! The loop is the sole owner and writer of the [`WindowStore`]. Other tasks
//! read windows through a [`GatewayHandle`], whose queries are answered
//! between records.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use rf_core::Update;
use rf_core::broker::{Broker, BrokerRecord, Subscription};
use rf_core::config::GatewayConfig;
use rf_core::error::FeedError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::queue::Frame;
use crate::registry::ViewerRegistry;
use crate::window::WindowStore;

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Running counters, shared with every [`GatewayHandle`].
#[derive(Debug, Default)]
pub struct GatewayStats {
    pub received: AtomicU64,
    pub malformed: AtomicU64,
    /// Frames queued to viewers (one per viewer per Update).
    pub frames_out: AtomicU64,
    pub tokens: AtomicUsize,
}

/// Point-in-time copy of the counters plus registry totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub frames_out: u64,
    pub tokens: usize,
    pub sessions: usize,
    pub dropped: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={} malformed={} frames_out={} tokens={} sessions={} dropped={}",
            self.received, self.malformed, self.frames_out, self.tokens, self.sessions, self.dropped
        )
    }
}

fn snapshot(stats: &GatewayStats, registry: &ViewerRegistry) -> StatsSnapshot {
    StatsSnapshot {
        received: stats.received.load(Ordering::Relaxed),
        malformed: stats.malformed.load(Ordering::Relaxed),
        frames_out: stats.frames_out.load(Ordering::Relaxed),
        tokens: stats.tokens.load(Ordering::Relaxed),
        sessions: registry.session_count(),
        dropped: registry.dropped_total(),
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

enum Query {
    Window { token: String, reply: oneshot::Sender<Option<Vec<Update>>> },
    Tokens { reply: oneshot::Sender<Vec<String>> },
}

/// Cloneable read access to a running gateway.
#[derive(Clone)]
pub struct GatewayHandle {
    query_tx: mpsc::Sender<Query>,
    stats: Arc<GatewayStats>,
    registry: Arc<ViewerRegistry>,
}

impl GatewayHandle {
    /// Current window for `token`, oldest first. `None` if the token has not
    /// been seen or the gateway is gone.
    pub async fn window(&self, token: &str) -> Option<Vec<Update>> {
        let (reply, rx) = oneshot::channel();
        self.query_tx.send(Query::Window { token: token.to_string(), reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Tokens with a window, in no particular order.
    pub async fn tokens(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        if self.query_tx.send(Query::Tokens { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub fn stats(&self) -> StatsSnapshot {
        snapshot(&self.stats, &self.registry)
    }

    pub fn registry(&self) -> &Arc<ViewerRegistry> {
        &self.registry
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

pub struct Gateway {
    broker: Arc<dyn Broker>,
    registry: Arc<ViewerRegistry>,
    windows: WindowStore,
    topics: Vec<String>,
    stats: Arc<GatewayStats>,
    stats_interval: Option<Duration>,
    query_tx: mpsc::Sender<Query>,
    query_rx: mpsc::Receiver<Query>,
}

impl Gateway {
    pub fn new(broker: Arc<dyn Broker>, registry: Arc<ViewerRegistry>, config: &GatewayConfig) -> Self {
        let (query_tx, query_rx) = mpsc::channel(64);
        Self {
            broker,
            registry,
            windows: WindowStore::new(config.window_size()),
            topics: config.topics(),
            stats: Arc::new(GatewayStats::default()),
            stats_interval: config.stats_interval(),
            query_tx,
            query_rx,
        }
    }

    pub fn handle(&self) -> GatewayHandle {
        GatewayHandle { query_tx: self.query_tx.clone(), stats: self.stats.clone(), registry: self.registry.clone() }
    }

    /// Subscribe to every configured topic and merge them into one stream.
    /// Only records published after this call are seen.
    pub async fn subscribe(&self) -> Result<Subscription, FeedError> {
        let mut streams = Vec::with_capacity(self.topics.len());
        for topic in &self.topics {
            let sub = self
                .broker
                .subscribe(topic)
                .await
                .map_err(|e| FeedError::Broker(format!("subscribe '{topic}': {e}")))?;
            info!("[gateway] subscribed to '{topic}'");
            streams.push(sub);
        }
        Ok(futures_util::stream::select_all(streams).boxed())
    }

    /// Process records until the subscription ends. Returns the final windows.
    pub async fn run(mut self, mut subscription: Subscription) -> WindowStore {
        let mut stats_timer = self.stats_interval.map(|period| {
            let mut timer = tokio::time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer
        });

        loop {
            tokio::select! {
                record = subscription.next() => match record {
                    Some(record) => self.on_record(&record),
                    None => {
                        info!("[gateway] subscription ended");
                        break;
                    }
                },

                Some(query) = self.query_rx.recv() => self.answer(query),

                _ = tick(&mut stats_timer) => {
                    info!("[gateway] stats: {}", snapshot(&self.stats, &self.registry));
                }
            }
        }

        info!("[gateway] final stats: {}", snapshot(&self.stats, &self.registry));
        self.windows
    }

    fn on_record(&mut self, record: &BrokerRecord) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let encoded = Update::decode(&record.payload).and_then(|u| u.to_json().map(|json| (u, json)));
        let (update, json) = match encoded {
            Ok(pair) => pair,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("[gateway] dropping record {}/{}: {e}", record.topic, record.key);
                return;
            }
        };

        let token = update.token.clone();
        self.windows.push(update);
        self.stats.tokens.store(self.windows.token_count(), Ordering::Relaxed);

        let frame: Frame = Arc::from(json);
        let delivered = self.registry.fan_out(&token, &frame);
        self.stats.frames_out.fetch_add(delivered as u64, Ordering::Relaxed);
        debug!("[gateway] {token} → {delivered} viewer(s)");
    }

    fn answer(&self, query: Query) {
        match query {
            Query::Window { token, reply } => {
                let _ = reply.send(self.windows.snapshot(&token));
            }
            Query::Tokens { reply } => {
                let _ = reply.send(self.windows.tokens().map(str::to_string).collect());
            }
        }
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rf_core::broker::MemoryBroker;
    use uuid::Uuid;

    use super::*;
    use crate::queue::SessionQueue;

    fn config() -> GatewayConfig {
        GatewayConfig { window_size: Some(3), stats_interval_sec: Some(0), ..Default::default() }
    }

    fn raw(token: &str, price: f64, time: &str) -> Vec<u8> {
        format!(r#"{{"token_address":"{token}","price_in_sol":{price},"block_time":"{time}"}}"#).into_bytes()
    }

    #[tokio::test]
    async fn records_fill_windows_and_reach_matching_viewers() {
        let bus = MemoryBroker::new();
        let registry = Arc::new(ViewerRegistry::new());
        let btc = Arc::new(SessionQueue::new(16));
        registry.register(Uuid::new_v4(), btc.clone(), Some("BTC".into()));

        let gateway = Gateway::new(Arc::new(bus.clone()), registry.clone(), &config());
        let handle = gateway.handle();
        let sub = gateway.subscribe().await.unwrap();
        let task = tokio::spawn(gateway.run(sub));

        let producer = bus.connection();
        producer.publish("trade-data", "BTC", &raw("BTC", 100.0, "t1")).await.unwrap();
        producer.publish("trade-data", "ETH", &raw("ETH", 50.0, "t1")).await.unwrap();
        producer.publish("trade-data", "BTC", b"not json").await.unwrap();
        producer.publish("trade-data", "BTC", &raw("BTC", 101.5, "t2")).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), btc.pop()).await.unwrap().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), btc.pop()).await.unwrap().unwrap();
        assert_eq!(Update::decode(first.as_bytes()).unwrap().price, 100.0);
        assert_eq!(Update::decode(second.as_bytes()).unwrap().price, 101.5);

        let window: Vec<f64> = handle.window("BTC").await.unwrap().iter().map(|u| u.price).collect();
        assert_eq!(window, vec![100.0, 101.5]);
        assert!(handle.window("SOL").await.is_none());

        let stats = handle.stats();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.frames_out, 2);
        assert_eq!(stats.tokens, 2);

        // Closing the gateway's own connection ends the subscription.
        bus.close().await.unwrap();
        let windows = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(windows.token_count(), 2);
    }

    #[tokio::test]
    async fn duplicate_records_are_forwarded_as_is() {
        let bus = MemoryBroker::new();
        let registry = Arc::new(ViewerRegistry::new());
        let viewer = Arc::new(SessionQueue::new(16));
        registry.register(Uuid::new_v4(), viewer.clone(), Some("BTC".into()));

        let gateway = Gateway::new(Arc::new(bus.clone()), registry, &config());
        let sub = gateway.subscribe().await.unwrap();
        let task = tokio::spawn(gateway.run(sub));

        // Same payload twice, as after a broker-side redelivery.
        let producer = bus.connection();
        let payload = raw("BTC", 100.0, "t1");
        producer.publish("trade-data", "BTC", &payload).await.unwrap();
        producer.publish("trade-data", "BTC", &payload).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), viewer.pop()).await.unwrap().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), viewer.pop()).await.unwrap().unwrap();
        assert_eq!(first, second);

        bus.close().await.unwrap();
        let windows = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        let window = windows.snapshot("BTC").unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0], window[1]);
    }

    #[tokio::test]
    async fn window_keeps_only_most_recent() {
        let bus = MemoryBroker::new();
        let registry = Arc::new(ViewerRegistry::new());
        let gateway = Gateway::new(Arc::new(bus.clone()), registry, &config());
        let sub = gateway.subscribe().await.unwrap();
        let task = tokio::spawn(gateway.run(sub));

        let producer = bus.connection();
        for i in 0..5 {
            producer.publish("trade-data", "BTC", &raw("BTC", i as f64, &format!("t{i}"))).await.unwrap();
        }
        bus.close().await.unwrap();

        let windows = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        let prices: Vec<f64> = windows.snapshot("BTC").unwrap().iter().map(|u| u.price).collect();
        assert_eq!(prices, vec![2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn subscribe_fails_on_closed_connection() {
        let bus = MemoryBroker::new();
        bus.close().await.unwrap();
        let gateway = Gateway::new(Arc::new(bus), Arc::new(ViewerRegistry::new()), &config());
        assert!(matches!(gateway.subscribe().await, Err(FeedError::Broker(_))));
    }
}
