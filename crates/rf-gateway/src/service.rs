//! Gateway service lifecycle.
//!
//! [`GatewayService::start`] performs every step that can fail fatally (bind
//! the viewer listener, subscribe to the topics) before spawning anything, so
//! a misconfigured gateway exits at startup instead of running half-wired.
//!
//! ```text
//! start() ──► bind listener + subscribe ──► [broadcast task] + [accept task]
//! stop()  ──► shutdown signal (sessions close) ──► abort tasks ──► close broker
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use rf_core::broker::Broker;
use rf_core::config::GatewayConfig;
use rf_core::error::FeedError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::gateway::{Gateway, GatewayHandle};
use crate::registry::ViewerRegistry;
use crate::server::ViewerServer;

/// A running gateway: broadcast loop plus viewer listener.
pub struct GatewayService {
    broker: Arc<dyn Broker>,
    handle: GatewayHandle,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl GatewayService {
    pub async fn start(broker: Arc<dyn Broker>, config: &GatewayConfig) -> Result<Self, FeedError> {
        broker.connect().await.map_err(|e| FeedError::Broker(e.to_string()))?;

        let registry = Arc::new(ViewerRegistry::new());
        let server = ViewerServer::bind(&config.listen_addr(), registry.clone(), config.send_queue_capacity()).await?;
        let local_addr = server.local_addr()?;

        let gateway = Gateway::new(broker.clone(), registry, config);
        let handle = gateway.handle();
        let subscription = gateway.subscribe().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(async move {
                let windows = gateway.run(subscription).await;
                info!("[gateway] broadcast loop exited with {} token window(s)", windows.token_count());
            }),
            tokio::spawn(server.serve(shutdown_rx)),
        ];

        info!(
            "[gateway] started on ws://{local_addr} (window={}, queue={})",
            config.window_size(),
            config.send_queue_capacity()
        );
        Ok(Self { broker, handle, local_addr, shutdown_tx, tasks })
    }

    pub fn handle(&self) -> GatewayHandle {
        self.handle.clone()
    }

    /// Address viewers connect to (resolved when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<ViewerRegistry> {
        self.handle.registry().clone()
    }

    /// Signal sessions to close, stop the tasks, and close the broker connection.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Err(e) = self.broker.close().await {
            warn!("[gateway] broker close failed: {e}");
        }
        info!("[gateway] stopped");
    }
}
