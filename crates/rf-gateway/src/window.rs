//! Per-token sliding windows.
//!
//! Each token observed on the subscription gets a [`SlidingWindow`] holding
//! its most recent N Updates. Windows are created lazily on a token's first
//! Update and are never evicted while the gateway runs.
//!
//! A window is a FIFO buffer in arrival order, not a time-sorted structure:
//! late, out-of-order and duplicate Updates (e.g. from broker retries) are
//! appended as they arrive.
//!
//! # Ownership
//!
//! The [`WindowStore`] is owned by the gateway broadcast loop, its only
//! writer. Other tasks read windows through snapshot queries served by that
//! loop, so no lock is needed here.

use std::collections::VecDeque;

use ahash::AHashMap;
use rf_core::Update;

/// The most recent `capacity` Updates for one token.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    entries: VecDeque<Update>,
    capacity: usize,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append an Update. Returns the evicted entry when the window was full.
    pub fn push(&mut self, update: Update) -> Option<Update> {
        let evicted = if self.entries.len() >= self.capacity { self.entries.pop_front() } else { None };
        self.entries.push_back(update);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest entry.
    pub fn last(&self) -> Option<&Update> {
        self.entries.back()
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Update> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<Update> {
        self.entries.iter().cloned().collect()
    }
}

/// All windows, keyed by token.
#[derive(Debug)]
pub struct WindowStore {
    windows: AHashMap<String, SlidingWindow>,
    capacity: usize,
}

impl WindowStore {
    /// `capacity` is the per-token window size.
    pub fn new(capacity: usize) -> Self {
        Self { windows: AHashMap::new(), capacity }
    }

    /// Append to the Update's token window, creating it if needed. Returns the
    /// evicted entry, if any.
    pub fn push(&mut self, update: Update) -> Option<Update> {
        let capacity = self.capacity;
        match self.windows.get_mut(&update.token) {
            Some(window) => window.push(update),
            None => {
                let mut window = SlidingWindow::new(capacity);
                let token = update.token.clone();
                window.push(update);
                self.windows.insert(token, window);
                None
            }
        }
    }

    pub fn get(&self, token: &str) -> Option<&SlidingWindow> {
        self.windows.get(token)
    }

    /// Copy of a token's window, oldest first.
    pub fn snapshot(&self, token: &str) -> Option<Vec<Update>> {
        self.windows.get(token).map(SlidingWindow::to_vec)
    }

    /// Number of tokens observed so far.
    pub fn token_count(&self) -> usize {
        self.windows.len()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.windows.keys().map(String::as_str)
    }
}
