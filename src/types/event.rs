//! Per-follower outcomes and replication events.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::order::OrderId;
use crate::types::risk::DenyReason;

// ---------------------------------------------------------------------------
// Skip reasons
// ---------------------------------------------------------------------------

/// Why the copy-policy transform produced no order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    /// Quantity floored to zero.
    TooSmall,
    /// Notional exceeds the link's per-order ceiling.
    LinkNotionalCap,
    /// A follower order for this (master, follower) pair already exists
    /// from a prior dispatch of the same master order.
    Duplicate,
}

impl SkipReason {
    /// Storage string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TooSmall => "TooSmall",
            Self::LinkNotionalCap => "LinkNotionalCap",
            Self::Duplicate => "Duplicate",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TooSmall" => Some(Self::TooSmall),
            "LinkNotionalCap" => Some(Self::LinkNotionalCap),
            "Duplicate" => Some(Self::Duplicate),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Follower outcome
// ---------------------------------------------------------------------------

/// Terminal result of one follower pipeline within a fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FollowerOutcome {
    /// Order placed with the broker.
    Dispatched,
    /// Transform produced no order.
    PolicySkipped(SkipReason),
    /// No active instrument mapping for the symbol.
    Unmapped,
    /// The risk gate refused the order.
    RiskDenied(DenyReason),
    /// Credential failure or a broker error that exhausted retries.
    BrokerErrored,
    /// The pipeline deadline elapsed before a definitive response.
    TimedOut,
}

impl FollowerOutcome {
    /// Storage string for the outcome class.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Dispatched => "DISPATCHED",
            Self::PolicySkipped(_) => "POLICY_SKIPPED",
            Self::Unmapped => "UNMAPPED",
            Self::RiskDenied(_) => "RISK_DENIED",
            Self::BrokerErrored => "BROKER_ERRORED",
            Self::TimedOut => "TIMED_OUT",
        }
    }

    /// Storage string for the variant detail, when one exists.
    pub fn detail_str(&self) -> Option<&'static str> {
        match self {
            Self::PolicySkipped(reason) => Some(reason.as_str()),
            Self::RiskDenied(reason) => Some(reason.as_str()),
            _ => None,
        }
    }

    /// Reassemble from the storage pair.
    pub fn from_storage(kind: &str, detail: Option<&str>) -> Option<Self> {
        match kind {
            "DISPATCHED" => Some(Self::Dispatched),
            "POLICY_SKIPPED" => detail.and_then(SkipReason::parse).map(Self::PolicySkipped),
            "UNMAPPED" => Some(Self::Unmapped),
            "RISK_DENIED" => detail.and_then(DenyReason::parse).map(Self::RiskDenied),
            "BROKER_ERRORED" => Some(Self::BrokerErrored),
            "TIMED_OUT" => Some(Self::TimedOut),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-follower record
// ---------------------------------------------------------------------------

/// One follower's result within a replication event, with its wall-clock
/// latency measured from the start of the dispatch call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerRecord {
    pub follower_account: String,
    pub outcome: FollowerOutcome,
    pub latency: Duration,
    /// Last broker or gate message, for dashboards.
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Replication event
// ---------------------------------------------------------------------------

/// Aggregate counters and latency percentiles for one sealed fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationSummary {
    pub total: u32,
    pub dispatched: u32,
    pub policy_skipped: u32,
    pub unmapped: u32,
    pub risk_denied: u32,
    pub broker_errored: u32,
    pub timed_out: u32,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl ReplicationSummary {
    /// `total` must equal the sum of the outcome classes.
    pub fn is_consistent(&self) -> bool {
        self.total
            == self.dispatched
                + self.policy_skipped
                + self.unmapped
                + self.risk_denied
                + self.broker_errored
                + self.timed_out
    }
}

/// The sealed, append-only record of one master-order fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationEvent {
    /// Event id (UUID).
    pub id: String,
    pub master_order_id: OrderId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub summary: ReplicationSummary,
    pub records: Vec<FollowerRecord>,
}
