//! Fire-and-forget event bus.
//!
//! A thin wrapper over a tokio broadcast channel. Publishing never blocks
//! the state machine: with no subscriber attached the message is simply
//! dropped.

use mend_proto::HealingEvent;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HealingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Lossy by design: a send with no receivers (or with
    /// lagged receivers) never surfaces as an error to the state machine.
    pub fn publish(&self, event: HealingEvent) {
        trace!(?event, "event published");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealingEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
