//! Error types for the `copytrade-core` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, CoreError>`.
//!
//! Two layers:
//! - [`BrokerError`] — what the broker adapter surfaces for a single call:
//!   transient (retryable), permanent, timeout, and the two credential
//!   failure modes. The dispatcher owns the retry decision; the adapter
//!   never retries a placement itself.
//! - [`CoreError`] — everything else: storage, serialization, transport,
//!   unknown instruments, stale status transitions, invalid policies.

use std::time::Duration;

use crate::types::enums::OrderStatus;

/// Errors surfaced by a broker adapter for a single call.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// HTTP 429 or a transient 5xx. Retryable with backoff.
    #[error("transient broker error (HTTP {status}): {message}")]
    Transient {
        /// The HTTP status code that triggered the classification.
        status: u16,
        /// Broker-supplied or synthesized description.
        message: String,
    },

    /// A 4xx other than 401/429, or a definitive broker-level rejection.
    /// Not retryable.
    #[error("permanent broker error (HTTP {status}): {message}")]
    Permanent {
        /// The HTTP status code.
        status: u16,
        /// Broker-supplied or synthesized description.
        message: String,
    },

    /// The call did not complete within its deadline. The order may still
    /// have been accepted upstream; the reconciler resolves it later.
    #[error("broker call timed out after {0:?}")]
    Timeout(Duration),

    /// The broker rejected the stored credentials. Permanent until the
    /// vault is updated.
    #[error("invalid broker credentials: {0}")]
    InvalidCredentials(String),

    /// Authentication failed for a transient reason (network, broker 5xx
    /// during login). Retryable.
    #[error("transient authentication failure: {0}")]
    AuthTransient(String),
}

impl BrokerError {
    /// Returns `true` for errors the dispatcher may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::AuthTransient(_))
    }
}

/// All possible errors produced by the replication core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// An error surfaced by the broker adapter.
    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    /// No active instrument mapping for the symbol/exchange pair.
    #[error("unknown instrument: {symbol} on {exchange}")]
    UnknownInstrument {
        /// Trading symbol as received.
        symbol: String,
        /// Exchange name.
        exchange: String,
    },

    /// An order id that does not exist in the store.
    #[error("order not found: {0}")]
    OrderNotFound(String),

    /// A status append lost the optimistic-concurrency race or targeted a
    /// non-monotonic transition. Callers discard this and reread.
    #[error("stale status transition on order {order_id}: {from:?} -> {to:?}")]
    StaleTransition {
        /// The order whose update was refused.
        order_id: String,
        /// Status the caller observed.
        from: OrderStatus,
        /// Status the caller attempted to write.
        to: OrderStatus,
    },

    /// The master order is not in a state the dispatcher accepts.
    #[error("master order {order_id} not dispatchable in status {status:?}")]
    NotDispatchable {
        /// The master order id.
        order_id: String,
        /// Its current status.
        status: OrderStatus,
    },

    /// A copy-policy parameter failed validation.
    #[error("invalid copy policy: {0}")]
    InvalidPolicy(String),

    /// Sealed credentials could not be decrypted or failed integrity checks.
    #[error("credential unsealing failed: {0}")]
    Unseal(String),

    /// An underlying SQLite error.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A network or transport-level error from `reqwest`.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to serialize or deserialize a JSON body.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error building or parsing a URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The caller provided an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;
