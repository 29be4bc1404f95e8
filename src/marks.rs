//! Last-known mark prices.
//!
//! The core has no market-data feed; marks arrive opportunistically — from
//! master limit prices at ingress and from position snapshots the risk gate
//! pulls. Percentage copy policies and exposure math read them here.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::broker::adapter::PositionSnapshot;
use crate::types::enums::Exchange;

/// Shared cache of last-known marks keyed by `(symbol, exchange)`.
#[derive(Default)]
pub struct MarkCache {
    inner: RwLock<HashMap<(String, Exchange), f64>>,
}

impl MarkCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mark. Non-positive prices are ignored.
    pub fn record(&self, symbol: &str, exchange: Exchange, price: f64) {
        if price > 0.0 && price.is_finite() {
            self.inner
                .write()
                .insert((symbol.to_owned(), exchange), price);
        }
    }

    /// Record the LTPs carried in a positions snapshot.
    pub fn record_positions(&self, positions: &[PositionSnapshot]) {
        let mut inner = self.inner.write();
        for p in positions {
            if p.last_price > 0.0 && p.last_price.is_finite() {
                inner.insert((p.symbol.clone(), p.exchange), p.last_price);
            }
        }
    }

    /// Last-known mark for the symbol, if any.
    pub fn get(&self, symbol: &str, exchange: Exchange) -> Option<f64> {
        self.inner
            .read()
            .get(&(symbol.to_owned(), exchange))
            .copied()
    }
}
