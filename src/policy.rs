//! The copy policy transform.
//!
//! Derives a follower order draft from a master order under the link's
//! policy. Deterministic given (master order, link, reference price, lot
//! size): no clock, no randomness.

use crate::types::event::SkipReason;
use crate::types::instrument::InstrumentCode;
use crate::types::link::{CopyPolicy, FollowerLink};
use crate::types::order::{Order, OrderDraft};

/// Result of the transform: an order draft, or a recorded skip.
#[derive(Debug, Clone)]
pub enum Transformed {
    /// Place this draft.
    Order(OrderDraft),
    /// Nothing to place; record the reason.
    Skip(SkipReason),
}

/// Raw follower quantity before lot flooring.
///
/// - fixed-ratio: `round(q_m × ratio)`
/// - percentage: `floor(available_balance × percent/100 ÷ reference_price)`
/// - fixed-quantity: the link's quantity, regardless of master quantity
///
/// A percentage policy with no balance or reference price yields zero —
/// the caller records `TooSmall`.
pub fn raw_quantity(
    master: &Order,
    link: &FollowerLink,
    available_balance: Option<f64>,
    reference_price: Option<f64>,
) -> u32 {
    match link.policy {
        CopyPolicy::FixedRatio { ratio } => {
            let q = (f64::from(master.quantity) * ratio).round();
            if q.is_finite() && q > 0.0 { q as u32 } else { 0 }
        }
        CopyPolicy::Percentage { percent } => {
            let (Some(balance), Some(price)) = (available_balance, reference_price) else {
                return 0;
            };
            if price <= 0.0 {
                return 0;
            }
            let q = (balance * percent / 100.0 / price).floor();
            if q.is_finite() && q > 0.0 { q as u32 } else { 0 }
        }
        CopyPolicy::FixedQuantity { quantity } => quantity,
    }
}

/// Full transform: quantity derivation, lot flooring, and the link's
/// per-order notional cap. Side, type, symbol, exchange, prices, product,
/// and validity carry over from the master verbatim.
pub fn transform(
    master: &Order,
    link: &FollowerLink,
    instrument: &InstrumentCode,
    available_balance: Option<f64>,
    reference_price: Option<f64>,
) -> Transformed {
    let raw = raw_quantity(master, link, available_balance, reference_price);
    let quantity = instrument.floor_to_lot(raw);
    if quantity == 0 {
        return Transformed::Skip(SkipReason::TooSmall);
    }

    if let Some(cap) = link.max_order_notional {
        let price = master.price.or(reference_price);
        if let Some(price) = price {
            if price * f64::from(quantity) > cap {
                return Transformed::Skip(SkipReason::LinkNotionalCap);
            }
        }
    }

    Transformed::Order(OrderDraft::follower_of(
        master,
        &link.follower_account,
        quantity,
    ))
}
