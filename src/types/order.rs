//! Orders, drafts, and order identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::enums::*;

// ---------------------------------------------------------------------------
// Order Id
// ---------------------------------------------------------------------------

/// Opaque stable order identifier.
///
/// Doubles as the client idempotency token forwarded to the broker
/// (`RemoteOrderID`), so duplicate submissions of the same follower order
/// are recognizable upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// View as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// A persisted order, master or follower.
///
/// A follower order carries `parent_id = Some(master order id)` and must
/// match its parent's side and symbol. `status_revision` increases by one on
/// every accepted status append and backs the store's optimistic writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Owning account.
    pub account: String,
    /// Optional strategy tag propagated from the master.
    pub strategy_id: Option<String>,
    /// Set iff this order was derived from a master order.
    pub parent_id: Option<OrderId>,
    pub side: Side,
    pub order_type: OrderType,
    pub symbol: String,
    pub exchange: Exchange,
    /// Requested quantity, always positive.
    pub quantity: u32,
    /// Limit price for LIMIT / STOP_LOSS orders.
    pub price: Option<f64>,
    /// Trigger price for the stop variants.
    pub trigger_price: Option<f64>,
    pub product: ProductType,
    pub validity: Validity,
    pub created_at: DateTime<Utc>,
    /// When the broker accepted the order.
    pub submitted_at: Option<DateTime<Utc>>,
    /// When the order reached a terminal status.
    pub terminal_at: Option<DateTime<Utc>>,
    pub status: OrderStatus,
    /// Broker-assigned order id, set once submitted.
    pub broker_order_id: Option<String>,
    /// Exchange-reported order id.
    pub exchange_order_id: Option<String>,
    /// Last broker- or gate-supplied message.
    pub last_message: Option<String>,
    /// Executed quantity reported so far.
    pub traded_qty: u32,
    /// Average execution price over `traded_qty`.
    pub avg_trade_price: Option<f64>,
    /// Monotonically increasing revision, bumped on every status append.
    pub status_revision: i64,
}

impl Order {
    /// Notional value at the reference price (limit price, else `fallback`).
    pub fn notional(&self, fallback: Option<f64>) -> Option<f64> {
        self.price
            .or(fallback)
            .map(|p| p * f64::from(self.quantity))
    }
}

// ---------------------------------------------------------------------------
// Order Draft
// ---------------------------------------------------------------------------

/// Everything needed to create an order row. The store assigns identity,
/// timestamps, and the initial `PENDING` status.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub account: String,
    pub strategy_id: Option<String>,
    pub parent_id: Option<OrderId>,
    pub side: Side,
    pub order_type: OrderType,
    pub symbol: String,
    pub exchange: Exchange,
    pub quantity: u32,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub product: ProductType,
    pub validity: Validity,
}

impl OrderDraft {
    /// Derive a follower draft from a master order, with the follower's
    /// account and quantity substituted. Side, type, symbol, exchange,
    /// prices, product, and validity are preserved.
    pub fn follower_of(master: &Order, follower_account: &str, quantity: u32) -> Self {
        Self {
            account: follower_account.to_owned(),
            strategy_id: master.strategy_id.clone(),
            parent_id: Some(master.id.clone()),
            side: master.side,
            order_type: master.order_type,
            symbol: master.symbol.clone(),
            exchange: master.exchange,
            quantity,
            price: master.price,
            trigger_price: master.trigger_price,
            product: master.product,
            validity: master.validity,
        }
    }

    /// Notional value at the reference price (limit price, else `fallback`).
    pub fn notional(&self, fallback: Option<f64>) -> Option<f64> {
        self.price
            .or(fallback)
            .map(|p| p * f64::from(self.quantity))
    }
}

// ---------------------------------------------------------------------------
// Status Update
// ---------------------------------------------------------------------------

/// Payload for a status append. Fields left `None` keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub broker_order_id: Option<String>,
    pub exchange_order_id: Option<String>,
    pub message: Option<String>,
    pub traded_qty: Option<u32>,
    pub avg_trade_price: Option<f64>,
}

impl StatusUpdate {
    /// An update carrying only a message.
    pub fn message(msg: impl Into<String>) -> Self {
        Self {
            message: Some(msg.into()),
            ..Self::default()
        }
    }
}
