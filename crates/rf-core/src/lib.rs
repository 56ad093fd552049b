//! # rf-core
//!
//! Shared building blocks for the rsi-feed pipeline:
//!
//! - **Types** (`types`) — `TradeRecord` (ingestion input) and `Update` (fan-out wire message)
//! - **Broker** (`broker`) — publish/subscribe contract plus the in-process `MemoryBroker`
//! - **Configuration** (`config`) — JSON config deserialization and validation
//! - **Error types** (`error`) — domain-specific `FeedError` via thiserror
//! - **Retry** (`retry`) — bounded exponential-backoff primitive
//! - **WebSocket** (`ws`) — viewer client with auto-reconnect
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod broker;
pub mod config;
pub mod error;
pub mod logging;
pub mod retry;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use types::*;
