//! Shared enum types used across the replication core.
//!
//! Variant names use `SCREAMING_SNAKE_CASE` to match the string values
//! persisted to storage and published to consumers, so we suppress the Rust
//! naming convention lint.
#![allow(non_camel_case_types)]

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// Exchange an order is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// National Stock Exchange.
    NSE,
    /// Bombay Stock Exchange.
    BSE,
    /// Multi Commodity Exchange.
    MCX,
}

impl Exchange {
    /// Single-letter code carried in the broker wire body.
    pub fn wire_code(self) -> &'static str {
        match self {
            Self::NSE => "N",
            Self::BSE => "B",
            Self::MCX => "M",
        }
    }

    /// Storage string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NSE => "NSE",
            Self::BSE => "BSE",
            Self::MCX => "MCX",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NSE" => Some(Self::NSE),
            "BSE" => Some(Self::BSE),
            "MCX" => Some(Self::MCX),
            _ => None,
        }
    }

    /// Parse the single-letter wire code.
    pub fn from_wire_code(code: &str) -> Option<Self> {
        match code {
            "N" => Some(Self::NSE),
            "B" => Some(Self::BSE),
            "M" => Some(Self::MCX),
            _ => None,
        }
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Exchange Segment
// ---------------------------------------------------------------------------

/// Segment within an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeSegment {
    /// Cash / equity segment.
    CASH,
    /// Futures & Options segment.
    DERIVATIVE,
    /// Currency segment.
    CURRENCY,
}

impl ExchangeSegment {
    /// Single-letter code carried in the broker wire body.
    pub fn wire_code(self) -> &'static str {
        match self {
            Self::CASH => "C",
            Self::DERIVATIVE => "D",
            Self::CURRENCY => "U",
        }
    }

    /// Storage string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CASH => "CASH",
            Self::DERIVATIVE => "DERIVATIVE",
            Self::CURRENCY => "CURRENCY",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CASH" => Some(Self::CASH),
            "DERIVATIVE" => Some(Self::DERIVATIVE),
            "CURRENCY" => Some(Self::CURRENCY),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// Buy or sell side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    BUY,
    SELL,
}

impl Side {
    /// Storage and wire string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BUY => "BUY",
            Self::SELL => "SELL",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Self::BUY),
            "SELL" => Some(Self::SELL),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Order Type
// ---------------------------------------------------------------------------

/// Type of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    MARKET,
    LIMIT,
    STOP_LOSS,
    STOP_LOSS_MARKET,
}

impl OrderType {
    /// Storage string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MARKET => "MARKET",
            Self::LIMIT => "LIMIT",
            Self::STOP_LOSS => "STOP_LOSS",
            Self::STOP_LOSS_MARKET => "STOP_LOSS_MARKET",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MARKET" => Some(Self::MARKET),
            "LIMIT" => Some(Self::LIMIT),
            "STOP_LOSS" => Some(Self::STOP_LOSS),
            "STOP_LOSS_MARKET" => Some(Self::STOP_LOSS_MARKET),
            _ => None,
        }
    }

    /// True for the two stop variants (a trigger price is required).
    pub fn is_stop(self) -> bool {
        matches!(self, Self::STOP_LOSS | Self::STOP_LOSS_MARKET)
    }

    /// True when the order executes at market (no limit price).
    pub fn is_market(self) -> bool {
        matches!(self, Self::MARKET | Self::STOP_LOSS_MARKET)
    }
}

// ---------------------------------------------------------------------------
// Product Type
// ---------------------------------------------------------------------------

/// Product type for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductType {
    /// Delivery (carry position past the session).
    DELIVERY,
    /// Intraday (squared off within the session).
    INTRADAY,
}

impl ProductType {
    /// Storage string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DELIVERY => "DELIVERY",
            Self::INTRADAY => "INTRADAY",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DELIVERY" => Some(Self::DELIVERY),
            "INTRADAY" => Some(Self::INTRADAY),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Validity
// ---------------------------------------------------------------------------

/// Order validity / time-in-force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Validity {
    /// Valid for the trading day.
    DAY,
    /// Immediate or Cancel.
    IOC,
    /// Good till date.
    GTD,
}

impl Validity {
    /// Integer code carried in the broker wire body (`iOrderValidity`).
    pub fn wire_code(self) -> u8 {
        match self {
            Self::DAY => 0,
            Self::GTD => 1,
            Self::IOC => 3,
        }
    }

    /// Storage string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DAY => "DAY",
            Self::IOC => "IOC",
            Self::GTD => "GTD",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DAY" => Some(Self::DAY),
            "IOC" => Some(Self::IOC),
            "GTD" => Some(Self::GTD),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Order Status
// ---------------------------------------------------------------------------

/// Status of an order in the store.
///
/// Transitions are monotonic along
/// `PENDING → SUBMITTED → (PARTIALLY_FILLED → FILLED) | FILLED | REJECTED |
/// CANCELLED`; `UNKNOWN` is entered when a placement deadline elapsed before
/// a definitive broker response, and may resolve to any non-pending status.
/// Once terminal, no further transition is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created locally, not yet handed to the broker.
    PENDING,
    /// Accepted by the broker, awaiting execution.
    SUBMITTED,
    /// Partial quantity traded.
    PARTIALLY_FILLED,
    /// Fully executed.
    FILLED,
    /// Rejected by broker or exchange.
    REJECTED,
    /// Cancelled.
    CANCELLED,
    /// Placement outcome unresolved (deadline elapsed mid-call).
    UNKNOWN,
}

impl OrderStatus {
    /// Storage string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PENDING => "PENDING",
            Self::SUBMITTED => "SUBMITTED",
            Self::PARTIALLY_FILLED => "PARTIALLY_FILLED",
            Self::FILLED => "FILLED",
            Self::REJECTED => "REJECTED",
            Self::CANCELLED => "CANCELLED",
            Self::UNKNOWN => "UNKNOWN",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::PENDING),
            "SUBMITTED" => Some(Self::SUBMITTED),
            "PARTIALLY_FILLED" => Some(Self::PARTIALLY_FILLED),
            "FILLED" => Some(Self::FILLED),
            "REJECTED" => Some(Self::REJECTED),
            "CANCELLED" => Some(Self::CANCELLED),
            "UNKNOWN" => Some(Self::UNKNOWN),
            _ => None,
        }
    }

    /// True once no further transition is accepted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::FILLED | Self::REJECTED | Self::CANCELLED)
    }

    /// True for master orders the dispatcher will fan out.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, Self::SUBMITTED | Self::PARTIALLY_FILLED | Self::FILLED)
    }

    /// Whether a transition from `self` to `to` respects the partial order.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        if self.is_terminal() || to == Self::PENDING {
            return false;
        }
        match self {
            Self::PENDING => matches!(
                to,
                Self::SUBMITTED | Self::REJECTED | Self::CANCELLED | Self::UNKNOWN
            ),
            Self::SUBMITTED => matches!(
                to,
                Self::PARTIALLY_FILLED
                    | Self::FILLED
                    | Self::REJECTED
                    | Self::CANCELLED
                    | Self::UNKNOWN
            ),
            Self::PARTIALLY_FILLED => matches!(to, Self::FILLED | Self::CANCELLED),
            // An unknown order resolves to whatever the broker reports.
            Self::UNKNOWN => to != Self::UNKNOWN,
            Self::FILLED | Self::REJECTED | Self::CANCELLED => false,
        }
    }
}
