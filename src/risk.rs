//! The pre-trade risk gate.
//!
//! Consulted once per follower order, before any broker call. Inputs are
//! computed at call time: realized daily PnL from the order store, balance
//! and positions through a [`PortfolioView`], and a per-account
//! peak-balance series the gate maintains for the session's drawdown
//! estimate. Denials are recorded outcomes, not alarms.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::adapter::{BalanceSnapshot, BrokerAdapter, PositionSnapshot};
use crate::error::Result;
use crate::marks::MarkCache;
use crate::session::CredentialVault;
use crate::store::OrderStore;
use crate::types::enums::Side;
use crate::types::link::FollowerLink;
use crate::types::order::OrderDraft;
use crate::types::risk::{DenyReason, RiskDecision, RiskEnvelope};

// ---------------------------------------------------------------------------
// Portfolio view
// ---------------------------------------------------------------------------

/// Balance and positions source for the gate and the percentage policy.
///
/// Production wires [`BrokerPortfolio`]; tests wire an in-memory fake.
#[async_trait]
pub trait PortfolioView: Send + Sync {
    /// Current balance for the account.
    async fn balance(&self, account: &str) -> Result<BalanceSnapshot>;

    /// Open positions for the account.
    async fn positions(&self, account: &str) -> Result<Vec<PositionSnapshot>>;
}

/// [`PortfolioView`] over the broker adapter: one session acquisition, one
/// adapter call.
pub struct BrokerPortfolio {
    vault: Arc<CredentialVault>,
    broker: Arc<dyn BrokerAdapter>,
}

impl BrokerPortfolio {
    /// Build a view over the vault and adapter.
    pub fn new(vault: Arc<CredentialVault>, broker: Arc<dyn BrokerAdapter>) -> Self {
        Self { vault, broker }
    }
}

#[async_trait]
impl PortfolioView for BrokerPortfolio {
    async fn balance(&self, account: &str) -> Result<BalanceSnapshot> {
        let session = self.vault.session(account).await?;
        Ok(self.broker.balance(&session).await?)
    }

    async fn positions(&self, account: &str) -> Result<Vec<PositionSnapshot>> {
        let session = self.vault.session(account).await?;
        Ok(self.broker.positions(&session).await?)
    }
}

// ---------------------------------------------------------------------------
// The gate
// ---------------------------------------------------------------------------

/// Per-account pre-trade checks against a risk envelope.
pub struct RiskGate {
    store: Arc<OrderStore>,
    portfolio: Arc<dyn PortfolioView>,
    /// Warmed with the LTPs of every positions snapshot the gate pulls.
    marks: Arc<MarkCache>,
    default_envelope: RiskEnvelope,
    /// Account-level envelope overrides.
    account_envelopes: parking_lot::RwLock<HashMap<String, RiskEnvelope>>,
    /// Session-lifetime peak balance per account, for the drawdown estimate.
    balance_peaks: parking_lot::Mutex<HashMap<String, f64>>,
}

impl RiskGate {
    /// Build a gate with the system-wide default envelope.
    pub fn new(
        store: Arc<OrderStore>,
        portfolio: Arc<dyn PortfolioView>,
        marks: Arc<MarkCache>,
        default_envelope: RiskEnvelope,
    ) -> Self {
        Self {
            store,
            portfolio,
            marks,
            default_envelope,
            account_envelopes: parking_lot::RwLock::new(HashMap::new()),
            balance_peaks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Install an account-level envelope override.
    pub fn set_account_envelope(&self, account: &str, envelope: RiskEnvelope) {
        self.account_envelopes
            .write()
            .insert(account.to_owned(), envelope);
    }

    /// Effective envelope for an account under a link: account override (or
    /// system default) narrowed by the link's per-link limits.
    pub fn envelope_for(&self, account: &str, link: &FollowerLink) -> RiskEnvelope {
        let base = self
            .account_envelopes
            .read()
            .get(account)
            .cloned()
            .unwrap_or_else(|| self.default_envelope.clone());
        base.narrowed_by(link)
    }

    /// Run every check for a proposed order. The first breached limit wins.
    ///
    /// `mark` is the reference price used for notional and exposure math
    /// when the draft has no limit price.
    pub async fn check(
        &self,
        account: &str,
        draft: &OrderDraft,
        envelope: &RiskEnvelope,
        mark: Option<f64>,
    ) -> Result<RiskDecision> {
        // Daily loss: realized PnL from today's executed follower trades.
        let pnl = self.store.realized_pnl_today(account).await?;
        if pnl < 0.0 && -pnl >= envelope.max_daily_loss {
            return Ok(RiskDecision::Deny(DenyReason::DailyLossBreached));
        }

        let balance = self.portfolio.balance(account).await?;
        if self.drawdown_fraction(account, balance.available + balance.utilized)
            > envelope.max_drawdown_fraction
        {
            return Ok(RiskDecision::Deny(DenyReason::DrawdownBreached));
        }

        let positions = self.portfolio.positions(account).await?;
        self.marks.record_positions(&positions);
        let open: Vec<&PositionSnapshot> =
            positions.iter().filter(|p| p.net_qty != 0).collect();

        // Opening a new symbol grows the open-position count by one.
        let already_open = open
            .iter()
            .any(|p| p.symbol == draft.symbol && p.exchange == draft.exchange);
        let projected_count = open.len() as u32 + u32::from(!already_open);
        if projected_count > envelope.max_open_positions {
            return Ok(RiskDecision::Deny(DenyReason::PositionCountBreached));
        }

        let notional = draft.notional(mark);
        if let Some(notional) = notional {
            if notional > envelope.max_position_notional {
                return Ok(RiskDecision::Deny(DenyReason::PositionSizeBreached));
            }

            let exposure: f64 = open
                .iter()
                .map(|p| p.net_qty.unsigned_abs() as f64 * p.last_price)
                .sum();
            if exposure + notional > envelope.max_exposure {
                return Ok(RiskDecision::Deny(DenyReason::ExposureBreached));
            }

            if draft.side == Side::BUY && balance.available < notional {
                return Ok(RiskDecision::Deny(DenyReason::InsufficientBalance));
            }
        }

        Ok(RiskDecision::Allow)
    }

    /// Update the peak series and return the current peak-to-trough
    /// fraction for the session.
    fn drawdown_fraction(&self, account: &str, balance: f64) -> f64 {
        let mut peaks = self.balance_peaks.lock();
        let peak = peaks.entry(account.to_owned()).or_insert(balance);
        if balance > *peak {
            *peak = balance;
        }
        if *peak <= 0.0 {
            return 0.0;
        }
        (*peak - balance) / *peak
    }
}
