//! Shared test fixture: an in-memory broker, authenticator, and portfolio
//! wired through the same component graph as production.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use copytrade_core::broker::adapter::*;
use copytrade_core::config::CoreConfig;
use copytrade_core::engine::{Dispatcher, DispatcherParts};
use copytrade_core::error::{BrokerError, Result};
use copytrade_core::marks::MarkCache;
use copytrade_core::publish::EventPublisher;
use copytrade_core::risk::{PortfolioView, RiskGate};
use copytrade_core::session::{
    BrokerCredentials, BrokerSession, CredentialVault, SessionAuthenticator,
};
use copytrade_core::store::{Database, EventLog, FollowerRegistry, InstrumentMapper, OrderStore};
use copytrade_core::types::*;

pub const MASTER_KEY: &str = "unit-test-master-key";

// ---------------------------------------------------------------------------
// Mock broker
// ---------------------------------------------------------------------------

/// Per-account behavior directives for the mock broker.
#[derive(Debug, Clone, Default)]
pub struct AccountBehavior {
    /// Sleep this long inside `place` before responding.
    pub place_delay: Duration,
    /// Fail this many initial `place` attempts with HTTP 429.
    pub transient_failures: u32,
    /// Respond with a definitive rejection.
    pub reject: bool,
}

/// One accepted placement, in arrival order.
#[derive(Debug, Clone)]
pub struct PlacedCall {
    pub account: String,
    pub token: String,
    pub seq: u64,
}

/// Decrements the in-flight counter even when the call future is dropped
/// mid-delay.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory [`BrokerAdapter`] with programmable per-account behavior and
/// call accounting.
#[derive(Default)]
pub struct MockBroker {
    behaviors: StdMutex<HashMap<String, AccountBehavior>>,
    remaining_failures: StdMutex<HashMap<String, u32>>,
    attempts: StdMutex<HashMap<String, u32>>,
    placed: StdMutex<Vec<PlacedCall>>,
    book: StdMutex<HashMap<String, StatusAck>>,
    broker_to_token: StdMutex<HashMap<String, String>>,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    seq: AtomicU64,
}

impl MockBroker {
    pub fn set_behavior(&self, account: &str, behavior: AccountBehavior) {
        self.remaining_failures
            .lock()
            .unwrap()
            .insert(account.to_owned(), behavior.transient_failures);
        self.behaviors
            .lock()
            .unwrap()
            .insert(account.to_owned(), behavior);
    }

    /// Total `place` attempts seen for the account, retries included.
    pub fn attempts_for(&self, account: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(account)
            .copied()
            .unwrap_or(0)
    }

    /// Accepted placements, in arrival order.
    pub fn placed(&self) -> Vec<PlacedCall> {
        self.placed.lock().unwrap().clone()
    }

    /// Highest number of concurrently in-flight `place` calls observed.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Install or replace the order-book row for a token.
    pub fn set_book_entry(&self, token: &str, ack: StatusAck) {
        self.book.lock().unwrap().insert(token.to_owned(), ack);
    }

    fn behavior_for(&self, account: &str) -> AccountBehavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(account)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrokerAdapter for MockBroker {
    async fn place(&self, session: &BrokerSession, order: &PlaceOrder) -> BrokerResult<PlaceAck> {
        let account = session.account.clone();
        *self.attempts.lock().unwrap().entry(account.clone()).or_insert(0) += 1;

        let in_flight = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(in_flight, Ordering::SeqCst);
        let _in_flight = InFlight(&self.concurrent);

        {
            let mut remaining = self.remaining_failures.lock().unwrap();
            if let Some(left) = remaining.get_mut(&account) {
                if *left > 0 {
                    *left -= 1;
                    return Err(BrokerError::Transient {
                        status: 429,
                        message: "rate limited".into(),
                    });
                }
            }
        }

        let behavior = self.behavior_for(&account);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let broker_order_id = format!("B{seq:06}");

        // The broker takes the order before the (possibly slow) response:
        // a dropped call can still have landed upstream.
        self.book.lock().unwrap().insert(
            order.idempotency_token.clone(),
            StatusAck {
                broker_order_id: broker_order_id.clone(),
                exchange_order_id: Some(format!("X{seq:06}")),
                status: OrderStatus::SUBMITTED,
                traded_qty: 0,
                avg_trade_price: None,
                message: "Placed".into(),
            },
        );
        self.broker_to_token
            .lock()
            .unwrap()
            .insert(broker_order_id.clone(), order.idempotency_token.clone());

        if !behavior.place_delay.is_zero() {
            tokio::time::sleep(behavior.place_delay).await;
        }

        if behavior.reject {
            self.book.lock().unwrap().remove(&order.idempotency_token);
            return Ok(PlaceAck {
                broker_order_id,
                exchange_order_id: None,
                status: OrderStatus::REJECTED,
                message: "Rejected by RMS".into(),
            });
        }

        self.placed.lock().unwrap().push(PlacedCall {
            account,
            token: order.idempotency_token.clone(),
            seq,
        });
        Ok(PlaceAck {
            broker_order_id,
            exchange_order_id: Some(format!("X{seq:06}")),
            status: OrderStatus::SUBMITTED,
            message: "Placed".into(),
        })
    }

    async fn status(
        &self,
        _session: &BrokerSession,
        broker_order_id: &str,
    ) -> BrokerResult<StatusAck> {
        let token = self
            .broker_to_token
            .lock()
            .unwrap()
            .get(broker_order_id)
            .cloned();
        token
            .and_then(|t| self.book.lock().unwrap().get(&t).cloned())
            .ok_or_else(|| BrokerError::Permanent {
                status: 400,
                message: format!("unknown broker order {broker_order_id}"),
            })
    }

    async fn status_by_token(
        &self,
        _session: &BrokerSession,
        token: &str,
    ) -> BrokerResult<Option<StatusAck>> {
        Ok(self.book.lock().unwrap().get(token).cloned())
    }

    async fn modify(
        &self,
        _session: &BrokerSession,
        broker_order_id: &str,
        _diff: &OrderDiff,
    ) -> BrokerResult<StatusAck> {
        self.status(_session, broker_order_id).await
    }

    async fn cancel(
        &self,
        session: &BrokerSession,
        broker_order_id: &str,
    ) -> BrokerResult<StatusAck> {
        let mut ack = self.status(session, broker_order_id).await?;
        ack.status = OrderStatus::CANCELLED;
        ack.message = "Cancelled".into();
        if let Some(token) = self
            .broker_to_token
            .lock()
            .unwrap()
            .get(broker_order_id)
            .cloned()
        {
            self.book.lock().unwrap().insert(token, ack.clone());
        }
        Ok(ack)
    }

    async fn positions(&self, _session: &BrokerSession) -> BrokerResult<Vec<PositionSnapshot>> {
        Ok(Vec::new())
    }

    async fn balance(&self, _session: &BrokerSession) -> BrokerResult<BalanceSnapshot> {
        Ok(BalanceSnapshot {
            available: 1_000_000.0,
            utilized: 0.0,
        })
    }

    async fn ping(&self) -> BrokerResult<Duration> {
        Ok(Duration::from_millis(1))
    }
}

// ---------------------------------------------------------------------------
// Fake authenticator & portfolio
// ---------------------------------------------------------------------------

/// Counting [`SessionAuthenticator`] with failure injection.
#[derive(Default)]
pub struct FakeAuth {
    pub auths: AtomicU32,
    pub transient_failures: AtomicU32,
    pub invalid_accounts: StdMutex<HashSet<String>>,
    /// Artificial login latency, to exercise single-flight.
    pub auth_delay: StdMutex<Duration>,
}

impl FakeAuth {
    pub fn mark_invalid(&self, account: &str) {
        self.invalid_accounts
            .lock()
            .unwrap()
            .insert(account.to_owned());
    }
}

#[async_trait]
impl SessionAuthenticator for FakeAuth {
    async fn authenticate(
        &self,
        account: &str,
        creds: &BrokerCredentials,
    ) -> std::result::Result<BrokerSession, BrokerError> {
        let delay = *self.auth_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.invalid_accounts.lock().unwrap().contains(account) {
            return Err(BrokerError::InvalidCredentials("bad password".into()));
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BrokerError::AuthTransient("gateway busy".into()));
        }
        self.auths.fetch_add(1, Ordering::SeqCst);
        Ok(BrokerSession {
            account: account.to_owned(),
            client_code: creds.client_code.clone(),
            user_id: creds.user_id.clone(),
            password: creds.password.clone(),
            api_key: creds.api_key.clone(),
            token: format!("tok-{account}"),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}

/// In-memory [`PortfolioView`].
#[derive(Default)]
pub struct FakePortfolio {
    balances: StdMutex<HashMap<String, f64>>,
    positions: StdMutex<HashMap<String, Vec<PositionSnapshot>>>,
}

impl FakePortfolio {
    pub fn set_balance(&self, account: &str, available: f64) {
        self.balances
            .lock()
            .unwrap()
            .insert(account.to_owned(), available);
    }

    pub fn set_positions(&self, account: &str, positions: Vec<PositionSnapshot>) {
        self.positions
            .lock()
            .unwrap()
            .insert(account.to_owned(), positions);
    }
}

#[async_trait]
impl PortfolioView for FakePortfolio {
    async fn balance(&self, account: &str) -> Result<BalanceSnapshot> {
        let available = self
            .balances
            .lock()
            .unwrap()
            .get(account)
            .copied()
            .unwrap_or(1_000_000.0);
        Ok(BalanceSnapshot {
            available,
            utilized: 0.0,
        })
    }

    async fn positions(&self, account: &str) -> Result<Vec<PositionSnapshot>> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .get(account)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Assembled core
// ---------------------------------------------------------------------------

pub struct TestCore {
    pub db: Database,
    pub store: Arc<OrderStore>,
    pub registry: Arc<FollowerRegistry>,
    pub mapper: Arc<InstrumentMapper>,
    pub vault: Arc<CredentialVault>,
    pub auth: Arc<FakeAuth>,
    pub broker: Arc<MockBroker>,
    pub portfolio: Arc<FakePortfolio>,
    pub gate: Arc<RiskGate>,
    pub marks: Arc<MarkCache>,
    pub events: Arc<EventLog>,
    pub publisher: EventPublisher,
    pub dispatcher: Dispatcher,
    pub stop: watch::Sender<bool>,
}

/// Assemble the full component graph over an in-memory database, with the
/// RELIANCE/NSE scrip seeded.
pub async fn build_core(cfg: CoreConfig) -> TestCore {
    let db = Database::open_in_memory().expect("in-memory database");
    let store = Arc::new(OrderStore::new(db.clone()));
    let registry = Arc::new(FollowerRegistry::new(db.clone(), cfg.follower_snapshot_ttl));
    let mapper = Arc::new(InstrumentMapper::new(db.clone()));
    let events = Arc::new(EventLog::new(db.clone()));

    let auth = Arc::new(FakeAuth::default());
    let vault = Arc::new(CredentialVault::new(
        db.clone(),
        MASTER_KEY,
        auth.clone(),
        cfg.session_refresh_guard,
    ));
    let broker = Arc::new(MockBroker::default());
    let portfolio = Arc::new(FakePortfolio::default());
    let marks = Arc::new(MarkCache::new());
    let gate = Arc::new(RiskGate::new(
        store.clone(),
        portfolio.clone(),
        marks.clone(),
        RiskEnvelope::default(),
    ));
    let publisher = EventPublisher::new(256);
    let (stop, shutdown) = watch::channel(false);

    let dispatcher = Dispatcher::new(
        cfg,
        DispatcherParts {
            store: store.clone(),
            registry: registry.clone(),
            mapper: mapper.clone(),
            vault: vault.clone(),
            broker: broker.clone(),
            gate: gate.clone(),
            portfolio: portfolio.clone(),
            marks: marks.clone(),
            events: events.clone(),
            publisher: publisher.clone(),
        },
        shutdown,
    );

    mapper
        .load_scrip_master(&[InstrumentCode {
            symbol: "RELIANCE".into(),
            exchange: Exchange::NSE,
            segment: ExchangeSegment::CASH,
            scrip_code: 2885,
            lot_size: 1,
            active: true,
        }])
        .await
        .expect("seed scrip master");

    TestCore {
        db,
        store,
        registry,
        mapper,
        vault,
        auth,
        broker,
        portfolio,
        gate,
        marks,
        events,
        publisher,
        dispatcher,
        stop,
    }
}

/// Default credentials for an account.
pub fn creds(account: &str) -> BrokerCredentials {
    BrokerCredentials {
        client_code: format!("CC-{account}"),
        user_id: format!("U-{account}"),
        password: "s3cret".into(),
        api_key: "vendor-key".into(),
    }
}

/// Register a follower: credentials in the vault plus an active link.
pub async fn seed_follower(core: &TestCore, master: &str, follower: &str, policy: CopyPolicy) {
    core.vault
        .store_credentials(follower, &creds(follower))
        .await
        .expect("store credentials");
    let link = FollowerLink::new(master, follower, policy).expect("valid link");
    core.registry.upsert_link(&link).await.expect("upsert link");
}

/// Create a master order and move it to `SUBMITTED`, ready to dispatch.
pub async fn master_order(
    core: &TestCore,
    account: &str,
    quantity: u32,
    price: Option<f64>,
) -> Order {
    let order_type = if price.is_some() {
        OrderType::LIMIT
    } else {
        OrderType::MARKET
    };
    let draft = OrderDraft {
        account: account.to_owned(),
        strategy_id: None,
        parent_id: None,
        side: Side::BUY,
        order_type,
        symbol: "RELIANCE".into(),
        exchange: Exchange::NSE,
        quantity,
        price,
        trigger_price: None,
        product: ProductType::INTRADAY,
        validity: Validity::DAY,
    };
    let order = core.store.create(draft).await.expect("create master order");
    core.store
        .append_status(&order.id, OrderStatus::SUBMITTED, StatusUpdate::default())
        .await
        .expect("submit master order")
}
