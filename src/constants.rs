//! Constants for the broker API and the replication engine.
//!
//! Contains base URLs, request codes, and the engine defaults that back
//! [`CoreConfig`](crate::config::CoreConfig). These are used internally by
//! [`IiflBroker`](crate::broker::IiflBroker) and the dispatcher, but are also
//! exported for advanced usage.

// ---------------------------------------------------------------------------
// Base URLs
// ---------------------------------------------------------------------------

/// Base URL for the production broker REST API.
pub const API_BASE_URL: &str = "https://dataservice.iifl.in/openapi/prod";

/// Base URL for the broker sandbox environment.
pub const SANDBOX_BASE_URL: &str = "https://dataservice.iifl.in/openapi/uat";

// ---------------------------------------------------------------------------
// Request codes
// ---------------------------------------------------------------------------

/// Request codes carried in the envelope head. The broker routes on these,
/// so they must match its published values exactly.
pub mod request_codes {
    /// Vendor login (session establishment).
    pub const LOGIN: &str = "IIFLMarRQLoginForVendor";
    /// Place a new order.
    pub const ORDER_REQUEST: &str = "IIFLMarRQOrdReq";
    /// Order status by broker order id.
    pub const ORDER_STATUS: &str = "IIFLMarRQOrdStatus";
    /// Order book (used for remote-order-id lookups).
    pub const ORDER_BOOK: &str = "IIFLMarRQOrdBkV2";
    /// Net positions for the account.
    pub const NET_POSITION: &str = "IIFLMarRQNPNWV2";
    /// Margin / available balance.
    pub const MARGIN: &str = "IIFLMarRQMarginV3";
}

/// Default head values sent with every request.
pub mod head_defaults {
    /// Application name reported to the broker.
    pub const APP_NAME: &str = "CopyTrade";
    /// Application version reported to the broker.
    pub const APP_VER: &str = "1.0";
    /// Channel / OS name reported to the broker.
    pub const OS_NAME: &str = "WEB";
}

// ---------------------------------------------------------------------------
// Engine defaults
// ---------------------------------------------------------------------------

/// Default values for the replication engine configuration keys.
pub mod engine_defaults {
    /// Global cap on concurrently in-flight broker calls.
    pub const MAX_IN_FLIGHT_BROKER_CALLS: usize = 50;
    /// Per-follower pipeline deadline in milliseconds.
    pub const DISPATCH_TIMEOUT_MS: u64 = 5_000;
    /// Transient broker-error retries per follower order.
    pub const MAX_RETRIES: u32 = 3;
    /// Backoff curve: base delay in milliseconds.
    pub const RETRY_BASE_MS: u64 = 100;
    /// Backoff curve: delay ceiling in milliseconds.
    pub const RETRY_CAP_MS: u64 = 2_000;
    /// Backoff curve: jitter as a percentage of the computed delay.
    pub const RETRY_JITTER_PCT: u32 = 25;
    /// Follower snapshot cache TTL in milliseconds.
    pub const FOLLOWER_SNAPSHOT_TTL_MS: u64 = 1_000;
    /// Worker pool size multiplier (CPUs × N pipelines admitted at once).
    pub const WORKER_POOL_MULTIPLIER: usize = 4;
    /// Pre-expiry session refresh window in milliseconds.
    pub const SESSION_REFRESH_GUARD_MS: u64 = 300_000;
    /// Polling interval for the unknown-order reconciler in milliseconds.
    pub const RECONCILE_INTERVAL_MS: u64 = 30_000;
    /// Stripe count for the per-follower FIFO locks.
    pub const FOLLOWER_LOCK_STRIPES: usize = 256;
}
