//! Per-instance event queue
//!
//! Every component of an instance publishes into one broadcast channel;
//! each stream subscriber gets its own receiver. A slow subscriber lags and
//! skips events, publishers never wait.

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::proto::{Envelope, EventKind, EventPayload};

/// Default channel capacity for an instance queue
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventQueue {
    sender: broadcast::Sender<Envelope>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers that got it.
    pub fn publish(&self, kind: EventKind, payload: EventPayload) -> usize {
        let event_type = payload.type_name();
        match self.sender.send(Envelope::new(kind, payload)) {
            Ok(count) => {
                trace!(event_type, receivers = count, "Event published");
                count
            }
            Err(_) => {
                trace!(event_type, "No receivers for event");
                0
            }
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<Envelope>,
}

impl EventReceiver {
    /// Next event, or `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
