//! Persistent state: orders, follower links, instrument codes, replication
//! events, and sealed credentials — one SQLite database shared by the
//! stores.
//!
//! - [`orders`] — [`OrderStore`](orders::OrderStore)
//! - [`links`] — [`FollowerRegistry`](links::FollowerRegistry)
//! - [`instruments`] — [`InstrumentMapper`](instruments::InstrumentMapper)
//! - [`events`] — [`EventLog`](events::EventLog)

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::error::Result;

pub mod events;
pub mod instruments;
pub mod links;
pub mod orders;

pub use events::EventLog;
pub use instruments::InstrumentMapper;
pub use links::FollowerRegistry;
pub use orders::OrderStore;

/// Handle to the shared SQLite connection.
///
/// A single connection behind an async mutex is deliberate: SQLite in WAL
/// mode serializes writers anyway, and every store operation is one short
/// statement or transaction. Fan-out concurrency lives above this layer.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and run migrations.
    pub fn open(path: &str) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database. Used by tests and the local simulator.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// The underlying connection.
    pub(crate) fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            account TEXT NOT NULL,
            strategy_id TEXT,
            parent_id TEXT REFERENCES orders(id),
            side TEXT NOT NULL,
            order_type TEXT NOT NULL,
            symbol TEXT NOT NULL,
            exchange TEXT NOT NULL,
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            price REAL,
            trigger_price REAL,
            product TEXT NOT NULL,
            validity TEXT NOT NULL,
            created_at TEXT NOT NULL,
            submitted_at TEXT,
            terminal_at TEXT,
            status TEXT NOT NULL,
            broker_order_id TEXT,
            exchange_order_id TEXT,
            last_message TEXT,
            traded_qty INTEGER NOT NULL DEFAULT 0,
            avg_trade_price REAL,
            status_revision INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_orders_parent ON orders(parent_id);
        CREATE INDEX IF NOT EXISTS idx_orders_account_created
            ON orders(account, created_at);
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);

        CREATE TABLE IF NOT EXISTS follower_links (
            master_account TEXT NOT NULL,
            follower_account TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            policy_kind TEXT NOT NULL,
            policy_ratio REAL,
            policy_percent REAL,
            policy_quantity INTEGER,
            max_order_notional REAL,
            max_daily_loss REAL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (master_account, follower_account)
        );
        CREATE INDEX IF NOT EXISTS idx_links_master_active
            ON follower_links(master_account, active);

        CREATE TABLE IF NOT EXISTS scrip_master (
            symbol TEXT NOT NULL,
            exchange TEXT NOT NULL,
            segment TEXT NOT NULL,
            scrip_code INTEGER NOT NULL,
            lot_size INTEGER NOT NULL DEFAULT 1,
            active INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (symbol, exchange)
        );

        CREATE TABLE IF NOT EXISTS broker_credentials (
            account TEXT PRIMARY KEY,
            sealed TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS replication_events (
            id TEXT PRIMARY KEY,
            master_order_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT NOT NULL,
            total INTEGER NOT NULL,
            dispatched INTEGER NOT NULL,
            policy_skipped INTEGER NOT NULL,
            unmapped INTEGER NOT NULL,
            risk_denied INTEGER NOT NULL,
            broker_errored INTEGER NOT NULL,
            timed_out INTEGER NOT NULL,
            p50_ms INTEGER NOT NULL,
            p95_ms INTEGER NOT NULL,
            p99_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_repl_events_master
            ON replication_events(master_order_id);

        CREATE TABLE IF NOT EXISTS replication_outcomes (
            event_id TEXT NOT NULL REFERENCES replication_events(id),
            follower_account TEXT NOT NULL,
            outcome TEXT NOT NULL,
            detail TEXT,
            latency_ms INTEGER NOT NULL,
            message TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_repl_outcomes_event
            ON replication_outcomes(event_id);",
    )?;
    Ok(())
}
