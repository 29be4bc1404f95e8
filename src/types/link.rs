//! Follower links and copy policies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

// ---------------------------------------------------------------------------
// Copy Policy
// ---------------------------------------------------------------------------

/// Rule mapping a master order quantity to a follower quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CopyPolicy {
    /// `q_f = round(q_m × ratio)`.
    FixedRatio {
        /// Multiplier, strictly positive.
        ratio: f64,
    },
    /// `q_f = floor(available_balance × percent/100 ÷ reference_price)`.
    Percentage {
        /// Share of the follower's available balance, in `(0, 100]`.
        percent: f64,
    },
    /// `q_f = quantity` regardless of master quantity.
    FixedQuantity {
        /// Fixed per-order quantity, strictly positive.
        quantity: u32,
    },
}

impl CopyPolicy {
    /// Validate the parameters for the chosen variant.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::FixedRatio { ratio } => {
                if !ratio.is_finite() || ratio <= 0.0 {
                    return Err(CoreError::InvalidPolicy(format!(
                        "fixed-ratio requires ratio > 0, got {ratio}"
                    )));
                }
            }
            Self::Percentage { percent } => {
                if !percent.is_finite() || percent <= 0.0 || percent > 100.0 {
                    return Err(CoreError::InvalidPolicy(format!(
                        "percentage requires 0 < percent <= 100, got {percent}"
                    )));
                }
            }
            Self::FixedQuantity { quantity } => {
                if quantity == 0 {
                    return Err(CoreError::InvalidPolicy(
                        "fixed-quantity requires quantity > 0".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Short storage tag for the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FixedRatio { .. } => "fixed_ratio",
            Self::Percentage { .. } => "percentage",
            Self::FixedQuantity { .. } => "fixed_quantity",
        }
    }
}

// ---------------------------------------------------------------------------
// Follower Link
// ---------------------------------------------------------------------------

/// An active master→follower relation with its copy policy and per-link
/// risk overrides. At most one active link exists per (master, follower)
/// pair; unfollowing soft-deletes by clearing `active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerLink {
    pub master_account: String,
    pub follower_account: String,
    pub active: bool,
    pub policy: CopyPolicy,
    /// Per-order notional ceiling for this link.
    pub max_order_notional: Option<f64>,
    /// Narrows the follower's daily-loss limit for orders on this link.
    pub max_daily_loss: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl FollowerLink {
    /// Build a validated link.
    pub fn new(
        master_account: impl Into<String>,
        follower_account: impl Into<String>,
        policy: CopyPolicy,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            master_account: master_account.into(),
            follower_account: follower_account.into(),
            active: true,
            policy,
            max_order_notional: None,
            max_daily_loss: None,
            created_at: Utc::now(),
        })
    }

    /// Set the per-order notional ceiling.
    pub fn with_max_order_notional(mut self, notional: f64) -> Self {
        self.max_order_notional = Some(notional);
        self
    }

    /// Set the per-link daily-loss override.
    pub fn with_max_daily_loss(mut self, loss: f64) -> Self {
        self.max_daily_loss = Some(loss);
        self
    }
}
