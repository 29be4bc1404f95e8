//! The event publisher.
//!
//! One-way, fire-and-forget sink for real-time consumers (notifications,
//! UI websockets, audit writers). Backed by `tokio::sync::broadcast`:
//! publishing never blocks, and a consumer that falls behind the channel
//! capacity loses the oldest messages — at-most-once delivery by design of
//! the channel, slow consumers drop.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::enums::{OrderStatus, Side};
use crate::types::event::ReplicationSummary;
use crate::types::order::OrderId;

/// Event topics consumers filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Per-order lifecycle updates.
    Orders,
    /// Fan-out progress and sealed replication events.
    Replication,
    /// Durable audit records.
    Audit,
}

/// Everything the core publishes.
#[derive(Debug, Clone, Serialize)]
pub enum CoreEvent {
    /// A master order cleared the front door and replication is starting.
    MasterOrderAccepted {
        order_id: OrderId,
        account: String,
        symbol: String,
        side: Side,
    },
    /// A follower order changed status.
    FollowerOrderUpdate {
        order_id: OrderId,
        parent_id: Option<OrderId>,
        account: String,
        status: OrderStatus,
        message: Option<String>,
    },
    /// A fan-out sealed; aggregate outcome attached.
    ReplicationSealed {
        master_order_id: OrderId,
        summary: ReplicationSummary,
    },
}

impl CoreEvent {
    /// The topic this event belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            Self::MasterOrderAccepted { .. } => Topic::Replication,
            Self::FollowerOrderUpdate { .. } => Topic::Orders,
            Self::ReplicationSealed { .. } => Topic::Replication,
        }
    }
}

/// Broadcast-backed publisher handle. Cheap to clone.
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventPublisher {
    /// Build a publisher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all topics. Filter on [`CoreEvent::topic`].
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Publish, dropping the event when nobody is listening.
    pub fn publish(&self, event: CoreEvent) {
        let topic = event.topic();
        if self.tx.send(event).is_err() {
            tracing::trace!(?topic, "event dropped: no subscribers");
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}
