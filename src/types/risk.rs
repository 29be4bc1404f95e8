//! Risk envelopes and gate decisions.

use serde::{Deserialize, Serialize};

use crate::types::link::FollowerLink;

// ---------------------------------------------------------------------------
// Risk Envelope
// ---------------------------------------------------------------------------

/// Per-account pre-trade limits.
///
/// Defaults are system-wide; accounts may override, and a follower link may
/// narrow further. Narrowest wins — see [`RiskEnvelope::narrowed_by`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEnvelope {
    /// Maximum realized loss per day, in account currency.
    pub max_daily_loss: f64,
    /// Maximum peak-to-trough drawdown as a fraction of peak balance.
    pub max_drawdown_fraction: f64,
    /// Maximum notional for any single position.
    pub max_position_notional: f64,
    /// Maximum count of simultaneously open positions.
    pub max_open_positions: u32,
    /// Maximum aggregate exposure across all open positions.
    pub max_exposure: f64,
    /// Require a stop-loss on every order.
    pub require_stop_loss: bool,
}

impl Default for RiskEnvelope {
    fn default() -> Self {
        Self {
            max_daily_loss: 50_000.0,
            max_drawdown_fraction: 0.20,
            max_position_notional: 500_000.0,
            max_open_positions: 20,
            max_exposure: 2_000_000.0,
            require_stop_loss: false,
        }
    }
}

impl RiskEnvelope {
    /// Apply a link's overrides on top of this envelope, keeping whichever
    /// bound is narrower.
    pub fn narrowed_by(&self, link: &FollowerLink) -> Self {
        let mut out = self.clone();
        if let Some(loss) = link.max_daily_loss {
            out.max_daily_loss = out.max_daily_loss.min(loss);
        }
        if let Some(notional) = link.max_order_notional {
            out.max_position_notional = out.max_position_notional.min(notional);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Gate decision
// ---------------------------------------------------------------------------

/// Why the risk gate refused an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenyReason {
    DailyLossBreached,
    DrawdownBreached,
    PositionCountBreached,
    PositionSizeBreached,
    ExposureBreached,
    /// Buys only: available balance below the order notional.
    InsufficientBalance,
}

impl DenyReason {
    /// Storage string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DailyLossBreached => "DailyLossBreached",
            Self::DrawdownBreached => "DrawdownBreached",
            Self::PositionCountBreached => "PositionCountBreached",
            Self::PositionSizeBreached => "PositionSizeBreached",
            Self::ExposureBreached => "ExposureBreached",
            Self::InsufficientBalance => "InsufficientBalance",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DailyLossBreached" => Some(Self::DailyLossBreached),
            "DrawdownBreached" => Some(Self::DrawdownBreached),
            "PositionCountBreached" => Some(Self::PositionCountBreached),
            "PositionSizeBreached" => Some(Self::PositionSizeBreached),
            "ExposureBreached" => Some(Self::ExposureBreached),
            "InsufficientBalance" => Some(Self::InsufficientBalance),
            _ => None,
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a pre-trade check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskDecision {
    Allow,
    Deny(DenyReason),
}

impl RiskDecision {
    /// True when the order may proceed.
    pub fn is_allow(self) -> bool {
        matches!(self, Self::Allow)
    }
}
