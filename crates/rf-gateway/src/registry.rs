//! Viewer registry — which session watches which token.
//!
//! Shared between the broadcast loop and every session task under a
//! reader-writer lock: fan-out takes the read lock once per Update, while
//! connect, disconnect and token selection take the write lock. Fan-out only
//! pushes into per-session [`SessionQueue`]s, so the read lock is never held
//! across socket I/O.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::queue::{Frame, SessionQueue};

/// Unique identifier of a viewer session.
pub type SessionId = Uuid;

struct SessionEntry {
    token: Option<String>,
    queue: Arc<SessionQueue>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: AHashMap<SessionId, SessionEntry>,
    by_token: AHashMap<String, Vec<SessionId>>,
}

impl RegistryInner {
    fn unlink(&mut self, id: &SessionId, token: &str) {
        if let Some(ids) = self.by_token.get_mut(token) {
            ids.retain(|s| s != id);
            if ids.is_empty() {
                self.by_token.remove(token);
            }
        }
    }
}

/// Token → viewer sinks.
#[derive(Default)]
pub struct ViewerRegistry {
    inner: RwLock<RegistryInner>,
    /// Dropped-frame totals of sessions that have already disconnected.
    retired_dropped: AtomicU64,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session, optionally already watching `token`.
    pub fn register(&self, id: SessionId, queue: Arc<SessionQueue>, token: Option<String>) {
        let mut inner = self.inner.write();
        if let Some(t) = &token {
            inner.by_token.entry(t.clone()).or_default().push(id);
        }
        inner.sessions.insert(id, SessionEntry { token, queue });
    }

    /// Point a session at `token`. Idempotent; the last call wins.
    ///
    /// Returns `false` if the session is not registered.
    pub fn select(&self, id: SessionId, token: &str) -> bool {
        let mut inner = self.inner.write();
        let previous = match inner.sessions.get_mut(&id) {
            Some(entry) if entry.token.as_deref() == Some(token) => return true,
            Some(entry) => entry.token.replace(token.to_string()),
            None => return false,
        };
        if let Some(prev) = previous {
            inner.unlink(&id, &prev);
        }
        inner.by_token.entry(token.to_string()).or_default().push(id);
        debug!("[registry] session {id} now watching {token}");
        true
    }

    /// Remove a session and close its queue so its delivery path ends.
    ///
    /// Returns the number of frames the session dropped.
    pub fn deregister(&self, id: SessionId) -> Option<u64> {
        let mut inner = self.inner.write();
        let entry = inner.sessions.remove(&id)?;
        if let Some(token) = &entry.token {
            inner.unlink(&id, token);
        }
        drop(inner);

        entry.queue.close();
        let dropped = entry.queue.dropped();
        self.retired_dropped.fetch_add(dropped, Ordering::Relaxed);
        Some(dropped)
    }

    /// Push `frame` to every session watching `token`. Never blocks on a
    /// viewer. Returns the number of sessions it was queued for.
    pub fn fan_out(&self, token: &str, frame: &Frame) -> usize {
        let inner = self.inner.read();
        let Some(ids) = inner.by_token.get(token) else {
            return 0;
        };
        ids.iter()
            .filter_map(|id| inner.sessions.get(id))
            .filter(|entry| entry.queue.push(frame.clone()))
            .count()
    }

    pub fn selected_token(&self, id: SessionId) -> Option<String> {
        self.inner.read().sessions.get(&id).and_then(|e| e.token.clone())
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Number of sessions currently watching `token`.
    pub fn viewers_of(&self, token: &str) -> usize {
        self.inner.read().by_token.get(token).map_or(0, Vec::len)
    }

    /// Frames dropped across live and disconnected sessions.
    pub fn dropped_total(&self) -> u64 {
        let live: u64 = self.inner.read().sessions.values().map(|e| e.queue.dropped()).sum();
        live + self.retired_dropped.load(Ordering::Relaxed)
    }
}
