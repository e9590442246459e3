//! The assembled relay: configuration plus the broadcast channel new events flow through
//! before connection tasks re-match them against their own subscriptions (§4.5, §5).
//! Grounded on `InnerLocalRelay`'s `new_event: broadcast::Sender<Event>`.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::admin::AdminService;
use crate::builder::RelayConfig;
use crate::model::Event;

const BROADCAST_CAPACITY: usize = 1024;

/// Shared relay state, cheaply `Arc`-wrapped and handed to every connection task.
pub struct Relay {
    pub config: RelayConfig,
    pub admin: Arc<AdminService>,
    new_event: broadcast::Sender<Event>,
}

impl Relay {
    pub fn new(config: RelayConfig, admin: Arc<AdminService>) -> Self {
        let (new_event, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            config,
            admin,
            new_event,
        }
    }

    /// Publish a freshly stored (or ephemeral) event to every connection's dispatcher.
    /// Returns the number of active receivers, mirroring `broadcast::Sender::send`.
    pub fn broadcast(&self, event: Event) -> Result<usize, broadcast::error::SendError<Event>> {
        self.new_event.send(event)
    }

    /// A fresh receiver for a newly accepted connection's dispatch loop.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.new_event.subscribe()
    }
}
