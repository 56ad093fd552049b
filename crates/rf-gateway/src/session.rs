//! Server side of one viewer connection.
//!
//! Lifecycle: `Connecting → Open → Closed`. A session is registered when the
//! WebSocket handshake completes and deregistered when either direction of
//! the connection fails or the viewer closes it. `Closed` is terminal.
//!
//! While open, a single task multiplexes:
//! - the session's [`SessionQueue`] → text frames to the viewer,
//! - inbound control frames `{"selectedToken": "..."}` → registry updates.
//!
//! A token switch takes effect for the next fan-out; the window is not
//! replayed. Malformed control frames are ignored.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use rf_core::error::FeedError;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::queue::SessionQueue;
use crate::registry::{SessionId, ViewerRegistry};

/// Viewer session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

impl SessionState {
    /// Apply a transition, returning the resulting state. Invalid transitions
    /// leave the state unchanged; nothing leaves `Closed`.
    pub fn advance(self, to: SessionState) -> SessionState {
        match (self, to) {
            (SessionState::Connecting, SessionState::Open) => SessionState::Open,
            (SessionState::Connecting | SessionState::Open, SessionState::Closed) => SessionState::Closed,
            (current, _) => current,
        }
    }
}

/// Inbound control frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlFrame {
    #[serde(rename = "selectedToken")]
    pub selected_token: String,
}

/// Parse a control frame. Anything else is a protocol error.
pub fn parse_control(text: &str) -> Result<ControlFrame, FeedError> {
    let frame: ControlFrame =
        serde_json::from_str(text).map_err(|e| FeedError::Protocol(format!("bad control frame: {e}")))?;
    let token = frame.selected_token.trim();
    if token.is_empty() {
        return Err(FeedError::Protocol("empty selectedToken".into()));
    }
    Ok(ControlFrame { selected_token: token.to_string() })
}

/// Extract `token=...` from a handshake request query string.
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// One viewer connection.
pub struct ViewerSession {
    pub id: SessionId,
    pub peer: SocketAddr,
    state: SessionState,
    registry: Arc<ViewerRegistry>,
    queue: Arc<SessionQueue>,
}

impl ViewerSession {
    pub fn new(peer: SocketAddr, registry: Arc<ViewerRegistry>, queue_capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            state: SessionState::Connecting,
            registry,
            queue: Arc::new(SessionQueue::new(queue_capacity)),
        }
    }

    /// Move to `to`, logging the transition. Returns whether the state changed.
    fn transition(&mut self, to: SessionState) -> bool {
        let from = self.state;
        self.state = from.advance(to);
        if self.state != from {
            debug!("[viewer-{}] {from:?} → {:?}", self.id, self.state);
        }
        self.state != from
    }

    /// Drive the connection until it closes or `shutdown` fires.
    pub async fn run(mut self, stream: TcpStream, mut shutdown: watch::Receiver<bool>) {
        let id = self.id;
        let mut initial_token = None;
        let callback = |req: &Request, resp: Response| {
            initial_token = token_from_query(req.uri().query());
            Ok::<_, ErrorResponse>(resp)
        };

        let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(s) => s,
            Err(e) => {
                let err = FeedError::Connection(format!("handshake with {}: {e}", self.peer));
                warn!("[viewer-{id}] {err}");
                self.transition(SessionState::Closed);
                return;
            }
        };

        if !self.transition(SessionState::Open) {
            return;
        }
        self.registry.register(id, self.queue.clone(), initial_token.clone());
        info!("[viewer-{id}] open from {} (token={initial_token:?})", self.peer);

        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = ws_write.close().await;
                    break;
                }

                frame = self.queue.pop() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = ws_write.send(Message::Text(frame.as_ref().into())).await {
                        let err = FeedError::Connection(e.to_string());
                        warn!("[viewer-{id}] write failed: {err}");
                        break;
                    }
                }

                msg = ws_read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match parse_control(&text) {
                            Ok(ctrl) => {
                                self.registry.select(id, &ctrl.selected_token);
                                debug!("[viewer-{id}] selected {}", ctrl.selected_token);
                            }
                            Err(e) => debug!("[viewer-{id}] ignoring frame: {e}"),
                        },
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws_write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            let err = FeedError::Connection(e.to_string());
                            warn!("[viewer-{id}] read failed: {err}");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }

        let dropped = self.registry.deregister(id).unwrap_or(0);
        self.transition(SessionState::Closed);
        info!("[viewer-{id}] closed (dropped={dropped})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        use SessionState::*;
        assert_eq!(Connecting.advance(Open), Open);
        assert_eq!(Open.advance(Closed), Closed);
        assert_eq!(Connecting.advance(Closed), Closed);
        assert_eq!(Closed.advance(Open), Closed);
        assert_eq!(Closed.advance(Connecting), Closed);
        assert_eq!(Open.advance(Connecting), Open);
    }

    #[test]
    fn session_transitions_are_one_way() {
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let mut session = ViewerSession::new(peer, Arc::new(ViewerRegistry::new()), 8);
        assert_eq!(session.state, SessionState::Connecting);

        assert!(session.transition(SessionState::Open));
        assert!(!session.transition(SessionState::Open));
        assert!(session.transition(SessionState::Closed));
        assert!(!session.transition(SessionState::Open));
        assert_eq!(session.state, SessionState::Closed);
    }

    #[test]
    fn control_frames() {
        assert_eq!(parse_control(r#"{"selectedToken":"BTC"}"#).unwrap().selected_token, "BTC");
        assert_eq!(parse_control(r#"{"selectedToken":" ETH ","extra":1}"#).unwrap().selected_token, "ETH");
        assert!(matches!(parse_control("BTC"), Err(FeedError::Protocol(_))));
        assert!(matches!(parse_control(r#"{"token":"BTC"}"#), Err(FeedError::Protocol(_))));
        assert!(matches!(parse_control(r#"{"selectedToken":""}"#), Err(FeedError::Protocol(_))));
    }

    #[test]
    fn query_token() {
        assert_eq!(token_from_query(Some("token=BTC")).as_deref(), Some("BTC"));
        assert_eq!(token_from_query(Some("a=1&token=SOL%20")).as_deref(), Some("SOL"));
        assert_eq!(token_from_query(Some("token=")), None);
        assert_eq!(token_from_query(None), None);
    }
}
