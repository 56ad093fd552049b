//! # rf-gateway
//!
//! Fan-out gateway: subscribes to the trade topics, keeps a sliding window of
//! recent Updates per token, and pushes each Update to every WebSocket viewer
//! that currently watches its token.
//!
//! ## Architecture
//!
//! ```text
//! Broker ──► [broadcast task] ──► WindowStore (owned)
//!                   │
//!                   └──► ViewerRegistry.fan_out ──► SessionQueue ──► [session task] ──► viewer
//!                                                        ▲
//!                  [accept task] ──► ViewerSession ──────┘  (one task per viewer)
//! ```
//!
//! - [`gateway`] — broadcast loop, window queries and counters
//! - [`window`] — per-token sliding windows
//! - [`registry`] — token → viewer sinks
//! - [`queue`] — bounded drop-oldest per-viewer send queue
//! - [`session`] — viewer connection state machine and control frames
//! - [`server`] — listener and accept loop
//! - [`service`] — start/stop lifecycle

pub mod gateway;
pub mod queue;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;
pub mod window;

pub use gateway::{Gateway, GatewayHandle, StatsSnapshot};
pub use registry::ViewerRegistry;
pub use service::GatewayService;
pub use window::{SlidingWindow, WindowStore};
