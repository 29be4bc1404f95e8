//! The ingress hook.
//!
//! The front door validates a master order, risk-checks the master itself,
//! persists it in `SUBMITTED` state, and then calls this hook with the
//! order id. The hook schedules the fan-out and returns immediately — the
//! master's acknowledgment never waits on follower replication.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::engine::dispatcher::Dispatcher;
use crate::publish::{CoreEvent, EventPublisher};
use crate::store::OrderStore;
use crate::types::order::OrderId;

/// Entry point the front door drives.
#[derive(Clone)]
pub struct IngressHook {
    dispatcher: Dispatcher,
    store: Arc<OrderStore>,
    publisher: EventPublisher,
}

impl IngressHook {
    /// Assemble the hook.
    pub fn new(dispatcher: Dispatcher, store: Arc<OrderStore>, publisher: EventPublisher) -> Self {
        Self {
            dispatcher,
            store,
            publisher,
        }
    }

    /// Kick off replication for an accepted master order. Returns
    /// immediately; the handle is only useful to tests and shutdown code
    /// that wants to await the fan-out.
    pub fn on_master_order_accepted(&self, master_order_id: OrderId) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            match this.store.get(&master_order_id).await {
                Ok(master) => {
                    this.publisher.publish(CoreEvent::MasterOrderAccepted {
                        order_id: master.id.clone(),
                        account: master.account.clone(),
                        symbol: master.symbol.clone(),
                        side: master.side,
                    });
                }
                Err(e) => {
                    tracing::warn!(master_order = %master_order_id, error = %e, "ingress: master order unreadable");
                    return;
                }
            }
            if let Err(e) = this.dispatcher.dispatch(&master_order_id).await {
                tracing::warn!(master_order = %master_order_id, error = %e, "fan-out failed");
            }
        })
    }

    /// Replicate a master-order cancellation onto its follower orders.
    pub fn on_master_order_cancelled(&self, master_order_id: OrderId) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.dispatcher.dispatch_cancel(&master_order_id).await {
                tracing::warn!(master_order = %master_order_id, error = %e, "cancel replication failed");
            }
        })
    }
}
