//! Viewer-side WebSocket client.

pub mod client;

pub use client::{OnUpdateCallback, ViewerClient, ViewerClientConfig, select_frame};
