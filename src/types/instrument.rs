//! Broker instrument codes.

use serde::{Deserialize, Serialize};

use crate::types::enums::{Exchange, ExchangeSegment};

/// Mapping from a trading symbol to the broker's numeric scrip code.
///
/// `(symbol, exchange)` is unique while active. Populated offline from the
/// broker's scrip master dump and refreshed out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentCode {
    pub symbol: String,
    pub exchange: Exchange,
    pub segment: ExchangeSegment,
    /// Broker-assigned numeric instrument code.
    pub scrip_code: i64,
    /// Minimum tradable lot; follower quantities floor to a multiple of it.
    pub lot_size: u32,
    pub active: bool,
}

impl InstrumentCode {
    /// Floor `quantity` to a multiple of the lot size. A lot size of zero or
    /// one leaves the quantity unchanged.
    pub fn floor_to_lot(&self, quantity: u32) -> u32 {
        if self.lot_size <= 1 {
            return quantity;
        }
        quantity - quantity % self.lot_size
    }
}
