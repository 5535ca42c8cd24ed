//! Bridge lifecycle events.
//!
//! Every state transition is published on a broadcast channel. Diagnostics
//! attach with [`EventBus::listen`] and only see transitions that happen after
//! they attached.

use tokio::sync::broadcast;
use tracing::trace;

use crate::bridge::BridgeState;

/// Backlog a slow listener may fall behind before it starts missing events.
const EVENT_BACKLOG: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The bridge moved between lifecycle states.
    StateChanged { from: BridgeState, to: BridgeState },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn with_backlog(backlog: usize) -> Self {
        let (tx, _) = broadcast::channel(backlog.max(1));
        Self { tx }
    }

    /// Publish `event` and return how many listeners received it.
    pub fn publish(&self, event: Event) -> usize {
        match self.tx.send(event) {
            Ok(listeners) => listeners,
            Err(broadcast::error::SendError(event)) => {
                trace!(?event, "no event listeners");
                0
            }
        }
    }

    pub fn listen(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_backlog(EVENT_BACKLOG)
    }
}
