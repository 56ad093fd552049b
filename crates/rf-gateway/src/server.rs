//! Viewer listener: accepts TCP connections and hands each one to its own
//! [`ViewerSession`] task.

use std::net::SocketAddr;
use std::sync::Arc;

use rf_core::error::FeedError;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::registry::ViewerRegistry;
use crate::session::ViewerSession;

pub struct ViewerServer {
    listener: TcpListener,
    registry: Arc<ViewerRegistry>,
    queue_capacity: usize,
}

impl ViewerServer {
    /// Bind the listen address. A failure here is fatal for the gateway.
    pub async fn bind(addr: &str, registry: Arc<ViewerRegistry>, queue_capacity: usize) -> Result<Self, FeedError> {
        let listener =
            TcpListener::bind(addr).await.map_err(|e| FeedError::Connection(format!("bind {addr}: {e}")))?;
        Ok(Self { listener, registry, queue_capacity })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, FeedError> {
        self.listener.local_addr().map_err(|e| FeedError::Connection(e.to_string()))
    }

    /// Accept viewers until `shutdown` flips. Sessions receive the same
    /// shutdown signal and close their sockets.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.local_addr() {
            info!("[server] listening on ws://{addr}");
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let session = ViewerSession::new(peer, self.registry.clone(), self.queue_capacity);
                        tokio::spawn(session.run(stream, shutdown.clone()));
                    }
                    Err(e) => warn!("[server] accept failed: {e}"),
                },
            }
        }
        info!("[server] stopped accepting viewers");
    }
}
