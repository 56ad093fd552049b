//! Sequential ingestion producer.
//!
//! Publishes one raw trade payload per valid source row, keyed by token, and
//! waits for each acknowledgment before reading the next row. There is no
//! internal parallelism, so for any token the publish order equals the row
//! order even when individual publishes are retried.

use std::sync::Arc;

use rf_core::broker::Broker;
use rf_core::error::FeedError;
use rf_core::retry::{RetryPolicy, retry};
use tracing::{debug, info, warn};

use crate::IngestError;
use crate::source::SourceItem;

/// Outcome counts for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Records acknowledged by the broker.
    pub sent: u64,
    /// Rows rejected by the source (missing fields, non-numeric price, ...).
    pub skipped_malformed: u64,
    /// Records still unacknowledged after the retry budget.
    pub failed: u64,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sent={} skipped_malformed={} failed={}", self.sent, self.skipped_malformed, self.failed)
    }
}

/// Publishes source rows onto a broker topic.
pub struct IngestProducer {
    broker: Arc<dyn Broker>,
    topic: String,
    retry: RetryPolicy,
}

impl IngestProducer {
    pub fn new(broker: Arc<dyn Broker>, topic: impl Into<String>, retry: RetryPolicy) -> Self {
        Self { broker, topic: topic.into(), retry }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish every valid row of `source`, then flush and close the broker
    /// connection.
    ///
    /// Malformed rows and publishes that exhaust the retry budget are counted
    /// in the returned [`Summary`]. A source read failure stops the run; the
    /// broker connection is still closed before the error is returned.
    pub async fn run<I>(&self, source: I) -> Result<Summary, IngestError>
    where
        I: IntoIterator<Item = Result<SourceItem, IngestError>>,
    {
        let mut summary = Summary::default();
        info!("[producer] publishing to '{}'", self.topic);

        let outcome = self.publish_all(source, &mut summary).await;
        let closed = self.shutdown().await;
        outcome?;
        closed?;

        info!("[producer] all rows processed — {summary}");
        Ok(summary)
    }

    async fn publish_all<I>(&self, source: I, summary: &mut Summary) -> Result<(), IngestError>
    where
        I: IntoIterator<Item = Result<SourceItem, IngestError>>,
    {
        for item in source {
            match item? {
                SourceItem::Malformed { line, reason } => {
                    summary.skipped_malformed += 1;
                    warn!("[producer] skipping line {line}: {reason}");
                }
                SourceItem::Record(record) => {
                    let payload = match record.to_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            summary.skipped_malformed += 1;
                            warn!("[producer] skipping {record}: {e}");
                            continue;
                        }
                    };

                    let key = record.token_address.as_str();
                    let published =
                        retry(&self.retry, "producer", |_| self.broker.publish(&self.topic, key, &payload)).await;

                    match published {
                        Ok(()) => {
                            summary.sent += 1;
                            debug!("[producer] sent {record}");
                        }
                        Err(e) => {
                            summary.failed += 1;
                            let err = FeedError::Publish(format!("{record}: {e}"));
                            warn!("[producer] giving up after {} attempts: {err}", self.retry.max_attempts);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), IngestError> {
        self.broker.flush().await?;
        self.broker.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use rf_core::Update;
    use rf_core::broker::MemoryBroker;

    use super::*;
    use crate::source::RecordSource;

    const HEADER: &str = "token_address,price_in_sol,block_time\n";

    fn fast_retry() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, initial_backoff: Duration::from_millis(1), max_backoff: Duration::from_millis(2) }
    }

    fn source(rows: &str) -> RecordSource<Cursor<String>> {
        RecordSource::from_reader(Cursor::new(format!("{HEADER}{rows}"))).unwrap()
    }

    #[tokio::test]
    async fn publishes_valid_rows_keyed_by_token() {
        let bus = MemoryBroker::new();
        let producer = IngestProducer::new(Arc::new(bus.connection()), "trade-data", fast_retry());

        let summary = producer.run(source("BTC,100.0,t1\nBTC,101.5,t2\nETH,50.0,t1\n")).await.unwrap();
        assert_eq!(summary, Summary { sent: 3, skipped_malformed: 0, failed: 0 });

        let log = bus.log("trade-data");
        let keys: Vec<_> = log.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["BTC", "BTC", "ETH"]);
        let prices: Vec<f64> = log.iter().map(|r| Update::decode(&r.payload).unwrap().price).collect();
        assert_eq!(prices, vec![100.0, 101.5, 50.0]);
    }

    #[tokio::test]
    async fn non_numeric_price_is_skipped_and_not_published() {
        let bus = MemoryBroker::new();
        let producer = IngestProducer::new(Arc::new(bus.connection()), "trade-data", fast_retry());

        let summary = producer.run(source("BTC,abc,t1\nBTC,2.0,t2\n")).await.unwrap();
        assert_eq!(summary, Summary { sent: 1, skipped_malformed: 1, failed: 0 });
        assert_eq!(bus.log("trade-data").len(), 1);
    }

    #[tokio::test]
    async fn blank_and_empty_rows_are_counted() {
        let bus = MemoryBroker::new();
        let producer = IngestProducer::new(Arc::new(bus.connection()), "trade-data", fast_retry());

        let summary = producer.run(source("BTC,1.0,t1\n\n   \n,,\nETH,2.0,t2\n")).await.unwrap();
        assert_eq!(summary, Summary { sent: 2, skipped_malformed: 3, failed: 0 });
    }

    #[tokio::test]
    async fn transient_failures_are_retried_in_order() {
        let bus = MemoryBroker::new();
        bus.inject_failures(2);
        let producer = IngestProducer::new(Arc::new(bus.connection()), "trade-data", fast_retry());

        let summary = producer.run(source("BTC,1.0,t1\nBTC,2.0,t2\n")).await.unwrap();
        assert_eq!(summary, Summary { sent: 2, skipped_malformed: 0, failed: 0 });

        let times: Vec<String> = bus.log("trade-data").iter().map(|r| Update::decode(&r.payload).unwrap().time).collect();
        assert_eq!(times, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn exhausted_budget_counts_failure_and_continues() {
        let bus = MemoryBroker::new();
        // Three attempts for the first record all fail; the second goes through.
        bus.inject_failures(3);
        let producer = IngestProducer::new(Arc::new(bus.connection()), "trade-data", fast_retry());

        let summary = producer.run(source("BTC,1.0,t1\nETH,2.0,t2\n")).await.unwrap();
        assert_eq!(summary, Summary { sent: 1, skipped_malformed: 0, failed: 1 });
        assert_eq!(bus.log("trade-data")[0].key, "ETH");
    }

    #[tokio::test]
    async fn closes_its_connection_when_done() {
        let bus = MemoryBroker::new();
        let conn = bus.connection();
        let producer = IngestProducer::new(Arc::new(conn.clone()), "trade-data", fast_retry());

        producer.run(source("")).await.unwrap();
        assert!(conn.is_closed());
        assert!(!bus.is_closed());
    }
}
