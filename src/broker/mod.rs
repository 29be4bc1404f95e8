//! Broker integration: wire types, adapter contract, and the HTTP client.
//!
//! - [`wire`] — the envelope and body types serialized byte-exact to the
//!   broker's published field names
//! - [`adapter`] — the [`BrokerAdapter`] capability trait and its typed
//!   call/ack structs
//! - [`client`] — [`IiflBroker`], the production HTTP implementation, and
//!   [`IiflAuthClient`], the login path the credential vault drives

pub mod adapter;
pub mod client;
pub mod wire;

pub use adapter::{
    BalanceSnapshot, BrokerAdapter, BrokerResult, OrderDiff, PlaceAck, PlaceOrder,
    PositionSnapshot, StatusAck,
};
pub use client::{IiflAuthClient, IiflBroker};
