//! Bounded per-viewer send queue.
//!
//! The broadcast loop pushes encoded frames; the viewer's own session task
//! pops them and writes to the socket. Pushing never waits: when the queue is
//! full the oldest undelivered frame is discarded and the session's dropped
//! counter increases, so a slow viewer sees gaps instead of stalling everyone
//! else.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// One encoded Update, shared by every viewer it is delivered to.
pub type Frame = Arc<str>;

struct QueueState {
    frames: VecDeque<Frame>,
    closed: bool,
}

/// Single-consumer, drop-oldest frame queue.
pub struct SessionQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl SessionQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState { frames: VecDeque::with_capacity(capacity), closed: false }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame, evicting the oldest one if the queue is full.
    ///
    /// Returns `false` if the queue has been closed.
    pub fn push(&self, frame: Frame) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            if state.frames.len() >= self.capacity {
                state.frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            state.frames.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Wait for the next frame. Returns `None` once the queue is closed.
    ///
    /// Cancel-safe: a frame is only removed when the returned future completes.
    pub async fn pop(&self) -> Option<Frame> {
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue, discard pending frames, and wake the consumer.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.frames.clear();
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Frames currently waiting for delivery.
    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames evicted because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
