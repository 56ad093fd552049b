//! Typed error definitions for the rsi-feed pipeline.
//!
//! [`FeedError`] mirrors the pipeline's error taxonomy. Only configuration
//! problems are fatal; every other variant is handled locally by the component
//! that raises it (skip the row, retry the publish, close one session, ignore
//! one frame).

use thiserror::Error;

/// Domain-specific errors for the rsi-feed pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed source row or undecodable topic payload.
    #[error("parse error: {0}")]
    Parse(String),

    /// Broker rejected or timed out a publish after the retry budget.
    #[error("publish error: {0}")]
    Publish(String),

    /// Viewer transport failure (handshake, read, or write).
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed inbound viewer control frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Broker unavailable (connect or subscribe failure).
    #[error("broker error: {0}")]
    Broker(String),
}
