//! The fan-out dispatcher.
//!
//! One call to [`Dispatcher::dispatch`] replicates a master order onto
//! every active follower: each follower runs a pipeline (transform →
//! instrument → risk gate → persist → session → place → persist) as its
//! own task. Two semaphores bound the work — a worker-pool admission
//! semaphore sized CPUs × multiplier, and the global broker-call semaphore
//! shared across all in-flight fan-outs. Per-follower FIFO across master
//! orders is enforced by a striped lock held over the
//! persist→place→persist sequence and released across backoff sleeps.
//!
//! Follower failures are local: they become recorded outcomes, never
//! errors of the fan-out itself. The fan-out seals a
//! [`ReplicationEvent`] once every pipeline has terminated.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{Semaphore, watch};

use crate::broker::adapter::{BrokerAdapter, PlaceOrder};
use crate::config::CoreConfig;
use crate::engine::retry::BackoffPolicy;
use crate::engine::{cancelled, metrics};
use crate::error::{BrokerError, CoreError, Result};
use crate::marks::MarkCache;
use crate::policy::{self, Transformed};
use crate::publish::{CoreEvent, EventPublisher};
use crate::risk::{PortfolioView, RiskGate};
use crate::session::CredentialVault;
use crate::store::{EventLog, FollowerRegistry, InstrumentMapper, OrderStore};
use crate::types::enums::OrderStatus;
use crate::types::event::{FollowerOutcome, FollowerRecord, ReplicationEvent, SkipReason};
use crate::types::link::{CopyPolicy, FollowerLink};
use crate::types::order::{Order, OrderId, StatusUpdate};
use crate::types::risk::RiskDecision;

/// Component graph the dispatcher runs against. Assembled once at process
/// start and passed in explicitly.
pub struct DispatcherParts {
    pub store: Arc<OrderStore>,
    pub registry: Arc<FollowerRegistry>,
    pub mapper: Arc<InstrumentMapper>,
    pub vault: Arc<CredentialVault>,
    pub broker: Arc<dyn BrokerAdapter>,
    pub gate: Arc<RiskGate>,
    pub portfolio: Arc<dyn PortfolioView>,
    pub marks: Arc<MarkCache>,
    pub events: Arc<EventLog>,
    pub publisher: EventPublisher,
}

struct Inner {
    cfg: CoreConfig,
    parts: DispatcherParts,
    /// Global bound on in-flight broker calls, shared across fan-outs.
    broker_sem: Semaphore,
    /// Worker-pool admission: CPUs × multiplier concurrent pipelines.
    worker_sem: Arc<Semaphore>,
    /// Per-follower FIFO locks, striped by account hash.
    stripes: Vec<tokio::sync::Mutex<()>>,
    backoff: BackoffPolicy,
    shutdown: watch::Receiver<bool>,
}

/// The fan-out engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Assemble a dispatcher. `shutdown` flipping to `true` drains every
    /// in-flight pipeline cooperatively.
    pub fn new(cfg: CoreConfig, parts: DispatcherParts, shutdown: watch::Receiver<bool>) -> Self {
        let backoff = BackoffPolicy::from_config(&cfg);
        let stripes = (0..crate::constants::engine_defaults::FOLLOWER_LOCK_STRIPES)
            .map(|_| tokio::sync::Mutex::new(()))
            .collect();
        let broker_sem = Semaphore::new(cfg.max_in_flight_broker_calls);
        let worker_sem = Arc::new(Semaphore::new(cfg.worker_pool_size()));
        Self {
            inner: Arc::new(Inner {
                cfg,
                parts,
                broker_sem,
                worker_sem,
                stripes,
                backoff,
                shutdown,
            }),
        }
    }

    /// Replicate `master_order_id` onto its active followers and seal the
    /// resulting replication event.
    ///
    /// The master order must be in a dispatchable status (`SUBMITTED`,
    /// `PARTIALLY_FILLED`, or `FILLED`). Re-dispatching the same id places
    /// nothing twice: each follower pipeline short-circuits on the order
    /// row a prior dispatch created.
    pub async fn dispatch(&self, master_order_id: &OrderId) -> Result<ReplicationEvent> {
        let started_at = Utc::now();
        let started = Instant::now();
        let inner = &self.inner;

        let master = inner.parts.store.get(master_order_id).await?;
        if !master.status.is_dispatchable() {
            return Err(CoreError::NotDispatchable {
                order_id: master_order_id.to_string(),
                status: master.status,
            });
        }
        if let Some(price) = master.price {
            inner.parts.marks.record(&master.symbol, master.exchange, price);
        }

        let links = inner.parts.registry.active_followers(&master.account).await?;
        tracing::info!(
            master_order = %master.id,
            account = %master.account,
            followers = links.len(),
            "fan-out started"
        );

        let deadline = tokio::time::Instant::now() + inner.cfg.dispatch_timeout;
        let handles: Vec<_> = links
            .iter()
            .cloned()
            .map(|link| {
                let this = self.clone();
                let master = master.clone();
                tokio::spawn(async move { this.run_pipeline(master, link, started, deadline).await })
            })
            .collect();

        let records: Vec<FollowerRecord> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.expect("follower pipeline panicked"))
            .collect();

        let event = metrics::seal(master.id.clone(), started_at, records);
        inner.parts.events.append(&event).await?;
        inner.parts.publisher.publish(CoreEvent::ReplicationSealed {
            master_order_id: master.id.clone(),
            summary: event.summary.clone(),
        });
        tracing::info!(
            master_order = %master.id,
            total = event.summary.total,
            dispatched = event.summary.dispatched,
            p95_ms = event.summary.p95_ms,
            "replication sealed"
        );
        Ok(event)
    }

    /// Replicate a master-order cancellation: cancel every non-terminal
    /// follower order of `master_order_id`. Returns how many cancels the
    /// broker accepted.
    pub async fn dispatch_cancel(&self, master_order_id: &OrderId) -> Result<u32> {
        let children = self.inner.parts.store.list_by_parent(master_order_id).await?;
        let handles: Vec<_> = children
            .into_iter()
            .filter(|child| !child.status.is_terminal() && child.broker_order_id.is_some())
            .map(|child| {
                let this = self.clone();
                tokio::spawn(async move { this.cancel_follower(child).await })
            })
            .collect();

        let cancelled = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.expect("cancel pipeline panicked"))
            .filter(|ok| *ok)
            .count() as u32;
        tracing::info!(master_order = %master_order_id, cancelled, "cancel replication finished");
        Ok(cancelled)
    }

    // -----------------------------------------------------------------------
    // Follower pipeline
    // -----------------------------------------------------------------------

    /// One follower's pipeline under the dispatch deadline and the shutdown
    /// signal. Never returns an error: every failure becomes a recorded
    /// outcome.
    async fn run_pipeline(
        self,
        master: Order,
        link: FollowerLink,
        started: Instant,
        deadline: tokio::time::Instant,
    ) -> FollowerRecord {
        let follower = link.follower_account.clone();
        let created: Arc<parking_lot::Mutex<Option<OrderId>>> =
            Arc::new(parking_lot::Mutex::new(None));

        let shutdown = self.inner.shutdown.clone();
        let work = self
            .clone()
            .follower_stages(master, link, started, created.clone());

        let finished = tokio::select! {
            record = tokio::time::timeout_at(deadline, work) => record.ok(),
            _ = cancelled(shutdown) => None,
        };

        match finished {
            Some(record) => record,
            None => {
                // Deadline elapsed or shutdown: whatever we persisted may
                // have reached the broker. Leave it UNKNOWN for the
                // reconciler; never roll back an in-flight broker effect.
                let order_id = created.lock().clone();
                if let Some(order_id) = &order_id {
                    self.append_quiet(
                        order_id,
                        OrderStatus::UNKNOWN,
                        StatusUpdate::message("dispatch deadline elapsed"),
                    )
                    .await;
                }
                tracing::warn!(
                    %follower,
                    order_id = ?order_id.as_ref().map(|id| id.to_string()),
                    "follower pipeline timed out"
                );
                FollowerRecord {
                    follower_account: follower,
                    outcome: FollowerOutcome::TimedOut,
                    latency: started.elapsed(),
                    message: None,
                }
            }
        }
    }

    /// Stages (a)–(i). Runs inside the deadline; may be dropped mid-await.
    async fn follower_stages(
        self,
        master: Order,
        link: FollowerLink,
        started: Instant,
        created: Arc<parking_lot::Mutex<Option<OrderId>>>,
    ) -> FollowerRecord {
        let inner = &self.inner;
        let follower = link.follower_account.clone();
        let record = |outcome: FollowerOutcome, message: Option<String>| FollowerRecord {
            follower_account: follower.clone(),
            outcome,
            latency: started.elapsed(),
            message,
        };

        let _admission = inner
            .worker_sem
            .clone()
            .acquire_owned()
            .await
            .expect("worker semaphore closed");

        // (a) copy-policy quantity. Percentage policies price against the
        // follower's available balance.
        let balance = if matches!(link.policy, CopyPolicy::Percentage { .. }) {
            match inner.parts.portfolio.balance(&follower).await {
                Ok(snapshot) => Some(snapshot.available),
                Err(e) => {
                    tracing::warn!(%follower, error = %e, "balance fetch failed");
                    return record(FollowerOutcome::BrokerErrored, Some(e.to_string()));
                }
            }
        } else {
            None
        };
        let reference_price = master
            .price
            .or_else(|| inner.parts.marks.get(&master.symbol, master.exchange));

        if policy::raw_quantity(&master, &link, balance, reference_price) == 0 {
            return record(
                FollowerOutcome::PolicySkipped(SkipReason::TooSmall),
                None,
            );
        }

        // (b) instrument resolution.
        let instrument = match inner.parts.mapper.resolve(&master.symbol, master.exchange).await {
            Ok(code) => code,
            Err(CoreError::UnknownInstrument { .. }) => {
                return record(FollowerOutcome::Unmapped, None);
            }
            Err(e) => {
                tracing::warn!(%follower, error = %e, "instrument resolve failed");
                return record(FollowerOutcome::BrokerErrored, Some(e.to_string()));
            }
        };

        let draft = match policy::transform(&master, &link, &instrument, balance, reference_price) {
            Transformed::Order(draft) => draft,
            Transformed::Skip(reason) => {
                return record(FollowerOutcome::PolicySkipped(reason), None);
            }
        };

        // (c) risk gate.
        let envelope = inner.parts.gate.envelope_for(&follower, &link);
        match inner
            .parts
            .gate
            .check(&follower, &draft, &envelope, reference_price)
            .await
        {
            Ok(RiskDecision::Allow) => {}
            Ok(RiskDecision::Deny(reason)) => {
                tracing::debug!(%follower, reason = %reason, "risk gate denied");
                return record(
                    FollowerOutcome::RiskDenied(reason),
                    Some(reason.to_string()),
                );
            }
            Err(e) => {
                tracing::warn!(%follower, error = %e, "risk gate errored");
                return record(FollowerOutcome::BrokerErrored, Some(e.to_string()));
            }
        }

        // Idempotent re-dispatch: a prior fan-out already created this
        // follower's order.
        match inner.parts.store.find_follower_order(&master.id, &follower).await {
            Ok(None) => {}
            Ok(Some(existing)) => {
                tracing::debug!(%follower, order_id = %existing.id, "duplicate dispatch short-circuited");
                return record(
                    FollowerOutcome::PolicySkipped(SkipReason::Duplicate),
                    None,
                );
            }
            Err(e) => {
                return record(FollowerOutcome::BrokerErrored, Some(e.to_string()));
            }
        }

        // (d) persist the pending follower order under the FIFO lock. The
        // lock is held through placement and the final persist, but not
        // across backoff sleeps.
        let stripe = self.stripe(&follower);
        let mut guard = stripe.lock().await;

        let order = match inner.parts.store.create(draft).await {
            Ok(order) => order,
            Err(e) => {
                tracing::warn!(%follower, error = %e, "follower order create failed");
                return record(FollowerOutcome::BrokerErrored, Some(e.to_string()));
            }
        };
        *created.lock() = Some(order.id.clone());

        // (e) session. One retry for a transient auth failure.
        let mut auth_retried = false;
        let session = loop {
            match inner.parts.vault.session(&follower).await {
                Ok(session) => break session,
                Err(BrokerError::AuthTransient(msg)) if !auth_retried => {
                    auth_retried = true;
                    tracing::debug!(%follower, %msg, "auth transient, retrying once");
                    drop(guard);
                    tokio::time::sleep(inner.backoff.delay_for(0)).await;
                    guard = stripe.lock().await;
                }
                Err(e) => {
                    self.append_quiet(
                        &order.id,
                        OrderStatus::REJECTED,
                        StatusUpdate::message(format!("credential: {e}")),
                    )
                    .await;
                    self.publish_order_update(&order.id).await;
                    return record(FollowerOutcome::BrokerErrored, Some(e.to_string()));
                }
            }
        };

        // (f)–(h) place, retrying transient errors with backoff. Every
        // attempt carries the same idempotency token — the order id.
        let place = PlaceOrder {
            exchange: order.exchange,
            segment: instrument.segment,
            scrip_code: instrument.scrip_code,
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            price: order.price,
            trigger_price: order.trigger_price,
            product: order.product,
            validity: order.validity,
            idempotency_token: order.id.to_string(),
        };

        let mut attempt: u32 = 0;
        loop {
            let result = {
                let _permit = inner
                    .broker_sem
                    .acquire()
                    .await
                    .expect("broker semaphore closed");
                inner.parts.broker.place(&session, &place).await
            };

            match result {
                Ok(ack) => {
                    let update = StatusUpdate {
                        broker_order_id: Some(ack.broker_order_id.clone()),
                        exchange_order_id: ack.exchange_order_id.clone(),
                        message: Some(ack.message.clone()),
                        ..StatusUpdate::default()
                    };
                    let (status, outcome) = match ack.status {
                        OrderStatus::REJECTED => (
                            OrderStatus::REJECTED,
                            FollowerOutcome::BrokerErrored,
                        ),
                        OrderStatus::UNKNOWN => {
                            (OrderStatus::UNKNOWN, FollowerOutcome::BrokerErrored)
                        }
                        _ => (OrderStatus::SUBMITTED, FollowerOutcome::Dispatched),
                    };
                    self.append_quiet(&order.id, status, update).await;
                    self.publish_order_update(&order.id).await;
                    let message =
                        (outcome != FollowerOutcome::Dispatched).then(|| ack.message.clone());
                    return record(outcome, message);
                }
                Err(e) if e.is_transient() && attempt < inner.backoff.max_retries => {
                    let delay = inner.backoff.delay_for(attempt);
                    attempt += 1;
                    tracing::debug!(
                        %follower,
                        order_id = %order.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient broker error, backing off"
                    );
                    drop(guard);
                    tokio::time::sleep(delay).await;
                    guard = stripe.lock().await;
                }
                Err(BrokerError::Timeout(_)) => {
                    self.append_quiet(
                        &order.id,
                        OrderStatus::UNKNOWN,
                        StatusUpdate::message("broker call timed out"),
                    )
                    .await;
                    self.publish_order_update(&order.id).await;
                    return record(FollowerOutcome::TimedOut, None);
                }
                Err(e) => {
                    self.append_quiet(
                        &order.id,
                        OrderStatus::REJECTED,
                        StatusUpdate::message(e.to_string()),
                    )
                    .await;
                    self.publish_order_update(&order.id).await;
                    tracing::warn!(%follower, order_id = %order.id, error = %e, "placement failed");
                    return record(FollowerOutcome::BrokerErrored, Some(e.to_string()));
                }
            }
        }
    }

    async fn cancel_follower(self, child: Order) -> bool {
        let inner = &self.inner;
        let follower = child.account.clone();
        let Some(broker_order_id) = child.broker_order_id.clone() else {
            return false;
        };

        let stripe = self.stripe(&follower);
        let _guard = stripe.lock().await;

        let session = match inner.parts.vault.session(&follower).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(%follower, error = %e, "cancel: session unavailable");
                return false;
            }
        };

        let result = {
            let _permit = inner
                .broker_sem
                .acquire()
                .await
                .expect("broker semaphore closed");
            inner.parts.broker.cancel(&session, &broker_order_id).await
        };

        match result {
            Ok(ack) if ack.status == OrderStatus::CANCELLED => {
                self.append_quiet(
                    &child.id,
                    OrderStatus::CANCELLED,
                    StatusUpdate::message(ack.message),
                )
                .await;
                self.publish_order_update(&child.id).await;
                true
            }
            Ok(ack) => {
                tracing::warn!(%follower, order_id = %child.id, status = ?ack.status, "cancel not confirmed");
                false
            }
            Err(e) => {
                tracing::warn!(%follower, order_id = %child.id, error = %e, "cancel failed");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn stripe(&self, account: &str) -> &tokio::sync::Mutex<()> {
        use std::hash::Hasher;
        let mut hasher = fnv::FnvHasher::default();
        hasher.write(account.as_bytes());
        let idx = hasher.finish() as usize % self.inner.stripes.len();
        &self.inner.stripes[idx]
    }

    /// Append a status, swallowing a lost race or refused transition — the
    /// stored row already moved on.
    async fn append_quiet(&self, id: &OrderId, status: OrderStatus, update: StatusUpdate) {
        match self.inner.parts.store.append_status(id, status, update).await {
            Ok(_) => {}
            Err(CoreError::StaleTransition { .. }) => {}
            Err(e) => {
                tracing::warn!(order_id = %id, error = %e, "status append failed");
            }
        }
    }

    async fn publish_order_update(&self, id: &OrderId) {
        if let Ok(order) = self.inner.parts.store.get(id).await {
            self.inner.parts.publisher.publish(CoreEvent::FollowerOrderUpdate {
                order_id: order.id.clone(),
                parent_id: order.parent_id.clone(),
                account: order.account.clone(),
                status: order.status,
                message: order.last_message.clone(),
            });
        }
    }
}
