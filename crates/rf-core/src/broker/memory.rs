//! In-process broker.
//!
//! A shared bus keeps, per topic, an append-only log plus the live
//! subscribers. A publish appends to the log and forwards the record to each
//! subscriber over an unbounded channel, so per-key order equals publish order.
//!
//! Each [`MemoryBroker`] handle is one client connection to the bus. Closing a
//! connection ends only the subscriptions it opened and rejects its later
//! publishes; other connections on the same bus keep working. Transient publish
//! failures can be injected bus-wide to exercise retry paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Broker, BrokerError, BrokerRecord, Subscription};

struct Subscriber {
    conn_id: u64,
    tx: mpsc::UnboundedSender<BrokerRecord>,
}

#[derive(Default)]
struct TopicState {
    log: Vec<BrokerRecord>,
    subscribers: Vec<Subscriber>,
}

#[derive(Default)]
struct Bus {
    topics: RwLock<AHashMap<String, TopicState>>,
    pending_failures: AtomicU32,
    unreachable: AtomicBool,
    next_conn_id: AtomicU64,
}

struct ConnState {
    id: u64,
    closed: AtomicBool,
}

/// In-process [`Broker`] connection. Clones share the same connection; use
/// [`MemoryBroker::connection`] to open another one on the same bus.
#[derive(Clone)]
pub struct MemoryBroker {
    bus: Arc<Bus>,
    conn: Arc<ConnState>,
}

impl MemoryBroker {
    /// Create a new bus and a first connection to it.
    pub fn new() -> Self {
        let bus = Arc::new(Bus::default());
        let conn = Self::open_conn(&bus);
        Self { bus, conn }
    }

    /// Open another connection on the same bus.
    pub fn connection(&self) -> Self {
        Self { bus: self.bus.clone(), conn: Self::open_conn(&self.bus) }
    }

    fn open_conn(bus: &Bus) -> Arc<ConnState> {
        let id = bus.next_conn_id.fetch_add(1, Ordering::Relaxed);
        Arc::new(ConnState { id, closed: AtomicBool::new(false) })
    }

    /// Make the next `n` publishes on the bus fail with [`BrokerError::Rejected`].
    pub fn inject_failures(&self, n: u32) {
        self.bus.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Make [`Broker::connect`] fail for every connection on the bus.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.bus.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// All records acknowledged on `topic`, in publish order.
    pub fn log(&self, topic: &str) -> Vec<BrokerRecord> {
        self.bus.topics.read().get(topic).map(|t| t.log.clone()).unwrap_or_default()
    }

    /// Number of live subscriptions on `topic`, across connections.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.bus
            .topics
            .read()
            .get(topic)
            .map(|t| t.subscribers.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.conn.closed.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.bus.pending_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        if self.bus.unreachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unreachable("in-process bus marked unreachable".into()));
        }
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        info!("[broker] conn-{} ready", self.conn.id);
        Ok(())
    }

    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if self.take_injected_failure() {
            return Err(BrokerError::Rejected(format!("injected failure on {topic}/{key}")));
        }

        let record = BrokerRecord { topic: topic.to_string(), key: key.to_string(), payload: payload.to_vec() };
        let mut topics = self.bus.topics.write();
        let state = topics.entry(topic.to_string()).or_default();
        state.subscribers.retain(|s| s.tx.send(record.clone()).is_ok());
        state.log.push(record);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.bus
            .topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .subscribers
            .push(Subscriber { conn_id: self.conn.id, tx });
        debug!("[broker] conn-{} subscribed to '{topic}'", self.conn.id);

        Ok(Box::pin(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx))))
    }

    async fn flush(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.conn.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let conn_id = self.conn.id;
        for state in self.bus.topics.write().values_mut() {
            state.subscribers.retain(|s| s.conn_id != conn_id);
        }
        info!("[broker] conn-{conn_id} closed");
        Ok(())
    }
}
