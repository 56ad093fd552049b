//! # rf-ingest
//!
//! Ingestion side of the pipeline: reads a CSV trade dataset and publishes
//! one raw trade payload per valid row onto the broker.
//!
//! ## Architecture
//!
//! ```text
//! RecordSource (csv rows) ──► IngestProducer.run() ──► Broker.publish(topic, token, payload)
//!                                    │
//!                                    └──► Summary { sent, skipped_malformed, failed }
//! ```
//!
//! - [`source`] — header-checked CSV reader yielding records or malformed rows
//! - [`producer`] — sequential publish loop with per-record retry

pub mod producer;
pub mod source;

use rf_core::broker::BrokerError;
use thiserror::Error;

pub use producer::{IngestProducer, Summary};
pub use source::{RecordSource, SourceItem};

/// Fatal ingestion errors. Per-row problems are counted, not raised.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The source could not be opened or read.
    #[error("source error: {0}")]
    Source(#[from] csv::Error),

    /// The header row lacks a required column.
    #[error("source header is missing required column '{0}'")]
    MissingColumn(&'static str),

    /// Flushing or closing the broker connection failed.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}
