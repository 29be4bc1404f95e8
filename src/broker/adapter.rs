//! The broker adapter contract.
//!
//! [`BrokerAdapter`] is the capability set the dispatcher and reconciler
//! program against. The production implementation is
//! [`IiflBroker`](crate::broker::client::IiflBroker); tests inject an
//! in-memory implementation through the same component graph.
//!
//! Adapters are one-shot: `place` is never retried internally (the
//! dispatcher owns the retry policy and the idempotency token), with the
//! single exception of the 401 re-authentication replay the contract
//! requires.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::session::BrokerSession;
use crate::types::enums::*;

/// Result alias for adapter calls.
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

// ---------------------------------------------------------------------------
// Call inputs
// ---------------------------------------------------------------------------

/// Everything an adapter needs to place one order.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub exchange: Exchange,
    pub segment: ExchangeSegment,
    /// Broker numeric instrument code, resolved by the instrument mapper.
    pub scrip_code: i64,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: u32,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub product: ProductType,
    pub validity: Validity,
    /// Client idempotency token — the follower order id. Forwarded so the
    /// broker (or the dispatcher on re-dispatch) can deduplicate.
    pub idempotency_token: String,
}

/// A modification diff. `None` keeps the resting value.
#[derive(Debug, Clone, Default)]
pub struct OrderDiff {
    pub quantity: Option<u32>,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
}

// ---------------------------------------------------------------------------
// Call outputs
// ---------------------------------------------------------------------------

/// Definitive response to a placement.
#[derive(Debug, Clone)]
pub struct PlaceAck {
    pub broker_order_id: String,
    pub exchange_order_id: Option<String>,
    pub status: OrderStatus,
    pub message: String,
}

/// Response to a status, modify, or cancel call.
#[derive(Debug, Clone)]
pub struct StatusAck {
    pub broker_order_id: String,
    pub exchange_order_id: Option<String>,
    pub status: OrderStatus,
    pub traded_qty: u32,
    pub avg_trade_price: Option<f64>,
    pub message: String,
}

/// One open position, as the broker reports it.
#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub exchange: Exchange,
    /// Signed net quantity; zero rows are closed positions.
    pub net_qty: i64,
    /// Last traded price — the mark used for exposure computation.
    pub last_price: f64,
}

/// Account balance, as the broker reports it.
#[derive(Debug, Clone)]
pub struct BalanceSnapshot {
    pub available: f64,
    pub utilized: f64,
}

// ---------------------------------------------------------------------------
// Status mapping
// ---------------------------------------------------------------------------

/// Map the broker's status text onto the canonical status set.
/// Unrecognized strings map to [`OrderStatus::UNKNOWN`].
pub fn map_broker_status(raw: &str) -> OrderStatus {
    match raw.trim() {
        "Placed" | "Pending" | "Modified" | "Ordered" => OrderStatus::SUBMITTED,
        "Partially Executed" => OrderStatus::PARTIALLY_FILLED,
        "Fully Executed" | "Traded" => OrderStatus::FILLED,
        "Rejected" | "Rejected By Exch" => OrderStatus::REJECTED,
        "Cancelled" | "Xpired" => OrderStatus::CANCELLED,
        _ => OrderStatus::UNKNOWN,
    }
}

// ---------------------------------------------------------------------------
// The adapter trait
// ---------------------------------------------------------------------------

/// Capability set over an authenticated broker session.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Place an order. One shot; the dispatcher owns retries.
    async fn place(&self, session: &BrokerSession, order: &PlaceOrder) -> BrokerResult<PlaceAck>;

    /// Current status of an order by broker order id.
    async fn status(
        &self,
        session: &BrokerSession,
        broker_order_id: &str,
    ) -> BrokerResult<StatusAck>;

    /// Look an order up by its client idempotency token. `None` means the
    /// broker has no record of it — the placement never landed.
    async fn status_by_token(
        &self,
        session: &BrokerSession,
        token: &str,
    ) -> BrokerResult<Option<StatusAck>>;

    /// Modify a resting order.
    async fn modify(
        &self,
        session: &BrokerSession,
        broker_order_id: &str,
        diff: &OrderDiff,
    ) -> BrokerResult<StatusAck>;

    /// Cancel a resting order.
    async fn cancel(
        &self,
        session: &BrokerSession,
        broker_order_id: &str,
    ) -> BrokerResult<StatusAck>;

    /// Open positions for the session's account.
    async fn positions(&self, session: &BrokerSession) -> BrokerResult<Vec<PositionSnapshot>>;

    /// Balance for the session's account.
    async fn balance(&self, session: &BrokerSession) -> BrokerResult<BalanceSnapshot>;

    /// Round-trip latency to the broker gateway.
    async fn ping(&self) -> BrokerResult<Duration>;
}
