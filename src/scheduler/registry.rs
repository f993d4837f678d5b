//! Registry of per-target probe timers.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Owns the repeating timer task of every scheduled target, keyed by target id.
///
/// Cancelling a timer aborts only the timer loop. Probe cycles it already
/// dispatched run to completion.
#[derive(Default)]
pub struct TimerRegistry {
    timers: RwLock<HashMap<String, JoinHandle<()>>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer, cancelling the previous one for the same id.
    ///
    /// Returns `true` if an existing timer was replaced.
    pub async fn replace(&self, id: String, handle: JoinHandle<()>) -> bool {
        let mut timers = self.timers.write().await;
        match timers.insert(id, handle) {
            Some(old) => {
                old.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel and forget the timer for `id`. Returns `false` if none was registered.
    pub async fn cancel(&self, id: &str) -> bool {
        let mut timers = self.timers.write().await;
        match timers.remove(id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer. Returns how many were running.
    pub async fn cancel_all(&self) -> usize {
        let mut timers = self.timers.write().await;
        let count = timers.len();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        count
    }

    #[cfg(test)]
    pub async fn contains(&self, id: &str) -> bool {
        self.timers.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.timers.read().await.len()
    }
}
