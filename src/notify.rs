//! Change notifications fanned out to subscribers.

use crate::db::Target;

use serde::Serialize;
use tokio::sync::broadcast;

/// A change pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    /// Full target list, sent once to a new subscriber.
    Initial(Vec<Target>),
    HealthUpdate(Target),
    TargetAdded(Target),
    TargetUpdated(Target),
    TargetDeleted(String),
}

/// Fire-and-forget broadcaster for [`Event`]s.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Event>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}
