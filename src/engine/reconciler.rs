//! Background resolution of `UNKNOWN` orders.
//!
//! A placement that timed out may still have been accepted upstream. The
//! reconciler periodically sweeps the store for `UNKNOWN` orders and asks
//! the broker what actually happened — by broker order id when one was
//! learned, otherwise by the idempotency token. An order the broker has no
//! record of never landed and is closed out as cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::adapter::{BrokerAdapter, StatusAck};
use crate::engine::cancelled;
use crate::error::{CoreError, Result};
use crate::publish::{CoreEvent, EventPublisher};
use crate::session::CredentialVault;
use crate::store::OrderStore;
use crate::types::enums::OrderStatus;
use crate::types::order::{Order, StatusUpdate};

/// The unknown-order reconciler. Runs outside the fan-out path.
pub struct Reconciler {
    store: Arc<OrderStore>,
    vault: Arc<CredentialVault>,
    broker: Arc<dyn BrokerAdapter>,
    publisher: EventPublisher,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Reconciler {
    /// Assemble a reconciler polling at `interval`.
    pub fn new(
        store: Arc<OrderStore>,
        vault: Arc<CredentialVault>,
        broker: Arc<dyn BrokerAdapter>,
        publisher: EventPublisher,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            vault,
            broker,
            publisher,
            interval,
            shutdown,
        }
    }

    /// Run the polling loop on its own task until shutdown.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let shutdown = self.shutdown.clone();
                tokio::select! {
                    _ = cancelled(shutdown) => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
                if let Err(e) = self.sweep().await {
                    tracing::warn!(error = %e, "reconcile sweep failed");
                }
            }
            tracing::debug!("reconciler stopped");
        })
    }

    /// One sweep over every `UNKNOWN` order. Returns how many were
    /// resolved to a definitive status.
    pub async fn sweep(&self) -> Result<u32> {
        let unknowns = self.store.list_unknown().await?;
        if unknowns.is_empty() {
            return Ok(0);
        }
        tracing::debug!(count = unknowns.len(), "reconciling unknown orders");

        let mut resolved = 0;
        for order in &unknowns {
            match self.resolve_one(order).await {
                Ok(true) => resolved += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(order_id = %order.id, error = %e, "reconcile failed, will retry");
                }
            }
        }
        if resolved > 0 {
            tracing::info!(resolved, remaining = unknowns.len() as u32 - resolved, "reconcile sweep done");
        }
        Ok(resolved)
    }

    async fn resolve_one(&self, order: &Order) -> Result<bool> {
        let session = self.vault.session(&order.account).await?;

        let ack: Option<StatusAck> = match &order.broker_order_id {
            Some(broker_id) => Some(self.broker.status(&session, broker_id).await?),
            None => {
                self.broker
                    .status_by_token(&session, order.id.as_str())
                    .await?
            }
        };

        let (status, update) = match ack {
            Some(ack) if ack.status != OrderStatus::UNKNOWN => {
                let update = StatusUpdate {
                    broker_order_id: Some(ack.broker_order_id),
                    exchange_order_id: ack.exchange_order_id,
                    message: Some(ack.message),
                    traded_qty: Some(ack.traded_qty),
                    avg_trade_price: ack.avg_trade_price,
                };
                (ack.status, update)
            }
            Some(_) => return Ok(false), // broker still undecided
            None => (
                // No record under the idempotency token: the placement
                // never reached the broker.
                OrderStatus::CANCELLED,
                StatusUpdate::message("placement never reached the broker"),
            ),
        };

        match self.store.append_status(&order.id, status, update).await {
            Ok(resolved) => {
                tracing::info!(
                    order_id = %order.id,
                    status = status.as_str(),
                    "unknown order resolved"
                );
                self.publisher.publish(CoreEvent::FollowerOrderUpdate {
                    order_id: resolved.id.clone(),
                    parent_id: resolved.parent_id.clone(),
                    account: resolved.account.clone(),
                    status: resolved.status,
                    message: resolved.last_message.clone(),
                });
                Ok(true)
            }
            // Someone else resolved it first; that's fine.
            Err(CoreError::StaleTransition { .. }) => Ok(true),
            Err(e) => Err(e),
        }
    }
}
