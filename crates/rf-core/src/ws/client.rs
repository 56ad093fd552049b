//! Viewer-side WebSocket client with auto-reconnect.
//!
//! A `ViewerClient` runs as a tokio task that:
//! 1. Connects to the gateway's viewer endpoint.
//! 2. Sends the current token selection as `{"selectedToken": "..."}`.
//! 3. Decodes each text frame as an [`Update`] and forwards it to a callback.
//! 4. Forwards later `select()` calls to the gateway.
//! 5. Reconnects on disconnection with exponential backoff, re-sending the
//!    current selection. Updates published while disconnected are not replayed.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::FeedError;
use crate::types::Update;

/// Callback invoked for each received Update.
pub type OnUpdateCallback = Arc<dyn Fn(Update) + Send + Sync>;

/// Configuration for a viewer connection.
#[derive(Debug, Clone)]
pub struct ViewerClientConfig {
    /// Gateway URL (e.g. `ws://127.0.0.1:8080`).
    pub url: String,
    /// Token selected right after connecting.
    pub token: Option<String>,
    /// Reconnect backoff cap.
    pub max_backoff: Duration,
}

impl ViewerClientConfig {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self { url: url.into(), token, max_backoff: Duration::from_secs(30) }
    }
}

/// Encode a token selection control frame.
pub fn select_frame(token: &str) -> String {
    serde_json::json!({ "selectedToken": token }).to_string()
}

/// A viewer connection managed by a background tokio task.
pub struct ViewerClient {
    pub config: ViewerClientConfig,
    select_tx: Option<watch::Sender<Option<String>>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ViewerClient {
    /// Create a new (not yet started) client. Fails if the URL does not parse.
    pub fn new(config: ViewerClientConfig) -> Result<Self, FeedError> {
        let url = url::Url::parse(&config.url).map_err(|e| FeedError::Config(format!("viewer url: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(FeedError::Config(format!("viewer url must be ws:// or wss://, got {}", url.scheme())));
        }
        Ok(Self { config, select_tx: None, shutdown_tx: None, task: None })
    }

    /// Start the connection task. Every decoded Update goes to `on_update`.
    pub fn start(&mut self, on_update: OnUpdateCallback) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (select_tx, select_rx) = watch::channel(self.config.token.clone());
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            connection_loop(config, on_update, select_rx, shutdown_rx).await;
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.select_tx = Some(select_tx);
        self.task = Some(task);
    }

    /// Change the selected token. Takes effect on the live connection and on
    /// every reconnect.
    pub fn select(&self, token: &str) {
        if let Some(tx) = &self.select_tx {
            let _ = tx.send(Some(token.to_string()));
        }
    }

    /// Stop the connection and wait for the task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Main connection loop — connects, selects, reads, reconnects.
async fn connection_loop(
    config: ViewerClientConfig,
    on_update: OnUpdateCallback,
    mut select_rx: watch::Receiver<Option<String>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = Duration::from_millis(100);

    loop {
        if *shutdown_rx.borrow() {
            info!("[viewer-client] shutdown requested");
            return;
        }

        info!("[viewer-client] connecting to {}", config.url);

        let ws_stream = match tokio_tungstenite::connect_async(config.url.as_str()).await {
            Ok((s, _response)) => {
                backoff = Duration::from_millis(100);
                info!("[viewer-client] connected");
                s
            }
            Err(e) => {
                error!("[viewer-client] connection failed: {e}, retrying in {backoff:?}");
                if !wait_backoff(backoff, &mut shutdown_rx).await {
                    return;
                }
                backoff = next_backoff(backoff, config.max_backoff);
                continue;
            }
        };

        let (mut ws_write, mut ws_read) = ws_stream.split();

        let current = select_rx.borrow_and_update().clone();
        if let Some(token) = current {
            debug!("[viewer-client] selecting {token}");
            if let Err(e) = ws_write.send(Message::Text(select_frame(&token).into())).await {
                error!("[viewer-client] select send failed: {e}, retrying in {backoff:?}");
                if !wait_backoff(backoff, &mut shutdown_rx).await {
                    return;
                }
                backoff = next_backoff(backoff, config.max_backoff);
                continue;
            }
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("[viewer-client] shutdown signal received");
                    let _ = ws_write.close().await;
                    return;
                }

                msg = ws_read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match Update::decode(text.as_bytes()) {
                            Ok(update) => on_update(update),
                            Err(e) => debug!("[viewer-client] ignoring frame: {e}"),
                        },
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws_write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            warn!("[viewer-client] received close frame");
                            break;
                        }
                        Some(Err(e)) => {
                            error!("[viewer-client] read error: {e}");
                            break;
                        }
                        None => {
                            warn!("[viewer-client] stream ended");
                            break;
                        }
                        _ => {}
                    }
                }

                changed = select_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let next = select_rx.borrow_and_update().clone();
                    if let Some(token) = next {
                        if let Err(e) = ws_write.send(Message::Text(select_frame(&token).into())).await {
                            error!("[viewer-client] select send failed: {e}");
                            break;
                        }
                    }
                }
            }
        }

        warn!("[viewer-client] disconnected, reconnecting in {backoff:?}");
        if !wait_backoff(backoff, &mut shutdown_rx).await {
            return;
        }
        backoff = next_backoff(backoff, config.max_backoff);
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Sleep for `backoff`. Returns `false` if shutdown was requested meanwhile.
async fn wait_backoff(backoff: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(backoff) => true,
        _ = shutdown_rx.changed() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_ws_urls() {
        assert!(ViewerClient::new(ViewerClientConfig::new("http://127.0.0.1:8080", None)).is_err());
        assert!(ViewerClient::new(ViewerClientConfig::new("not a url", None)).is_err());
        assert!(ViewerClient::new(ViewerClientConfig::new("ws://127.0.0.1:8080", Some("BTC".into()))).is_ok());
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let max = Duration::from_secs(1);
        assert_eq!(next_backoff(Duration::from_millis(100), max), Duration::from_millis(200));
        assert_eq!(next_backoff(Duration::from_millis(800), max), max);
        assert_eq!(next_backoff(max, max), max);
    }

    #[tokio::test]
    async fn backoff_wait_sleeps_then_yields_to_shutdown() {
        let (tx, mut rx) = watch::channel(false);

        let started = tokio::time::Instant::now();
        assert!(wait_backoff(Duration::from_millis(30), &mut rx).await);
        assert!(started.elapsed() >= Duration::from_millis(30));

        let waiter = tokio::spawn(async move { wait_backoff(Duration::from_secs(30), &mut rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        let resumed = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(!resumed);
    }

    #[test]
    fn select_frame_shape() {
        let v: serde_json::Value = serde_json::from_str(&select_frame("BTC")).unwrap();
        assert_eq!(v["selectedToken"], "BTC");
    }
}
