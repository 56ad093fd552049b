//! Publish/subscribe contract between the producer, the message bus, and the
//! fan-out gateway.
//!
//! The bus is an external collaborator: any topic service with at-least-once
//! delivery and per-key ordering can implement [`Broker`]. Nothing in the
//! pipeline assumes exactly-once delivery or a global order across keys, so
//! consumers must tolerate duplicate records with identical content.
//!
//! [`MemoryBroker`] is the in-process implementation used by the runner and
//! the test suites.

pub mod memory;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

pub use memory::MemoryBroker;

/// A record as seen on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    /// Partition / ordering key. The producer uses the token address.
    pub key: String,
    pub payload: Vec<u8>,
}

/// Stream of records for one subscription, ordered per key. Ends when the
/// broker connection closes.
pub type Subscription = BoxStream<'static, BrokerRecord>;

/// Broker-side failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    /// A publish was rejected or timed out. Retryable.
    #[error("publish rejected: {0}")]
    Rejected(String),

    /// The connection has been closed.
    #[error("broker connection closed")]
    Closed,
}

/// Message bus contract.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Verify the broker is reachable. Failure at startup is fatal.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Publish one payload and wait for the acknowledgment.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Subscribe to a topic. Only records published after the call are seen.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BrokerError>;

    /// Wait until every acknowledged publish is durable.
    async fn flush(&self) -> Result<(), BrokerError>;

    /// Close the connection. Open subscriptions end.
    async fn close(&self) -> Result<(), BrokerError>;
}
