//! # copytrade-core
//!
//! The replication core of a copy-trading service: on every accepted
//! master order, fan out transformed orders to the master's followers
//! against an IIFL-style broker HTTP API — with bounded concurrency,
//! per-follower risk gating, retry with backoff, and sub-second tail
//! latency as the design target.
//!
//! The crate is the engine a front door embeds; user registration,
//! billing, dashboards, and the outer HTTP server live elsewhere.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use copytrade_core::broker::{IiflAuthClient, IiflBroker};
//! use copytrade_core::config::CoreConfig;
//! use copytrade_core::engine::{Dispatcher, DispatcherParts, IngressHook};
//! use copytrade_core::marks::MarkCache;
//! use copytrade_core::publish::EventPublisher;
//! use copytrade_core::risk::{BrokerPortfolio, RiskGate};
//! use copytrade_core::session::CredentialVault;
//! use copytrade_core::store::{Database, EventLog, FollowerRegistry, InstrumentMapper, OrderStore};
//! use copytrade_core::types::RiskEnvelope;
//!
//! # fn main() -> copytrade_core::Result<()> {
//! let cfg = CoreConfig::from_env()?;
//! let db = Database::open("copytrade.db")?;
//!
//! let store = Arc::new(OrderStore::new(db.clone()));
//! let registry = Arc::new(FollowerRegistry::new(db.clone(), cfg.follower_snapshot_ttl));
//! let mapper = Arc::new(InstrumentMapper::new(db.clone()));
//! let events = Arc::new(EventLog::new(db.clone()));
//!
//! let auth = Arc::new(IiflAuthClient::new(&cfg));
//! let vault = Arc::new(CredentialVault::new(
//!     db,
//!     std::env::var("COPYTRADE_MASTER_KEY").unwrap_or_default(),
//!     auth,
//!     cfg.session_refresh_guard,
//! ));
//! let broker = Arc::new(IiflBroker::new(&cfg, vault.clone()));
//! let portfolio = Arc::new(BrokerPortfolio::new(vault.clone(), broker.clone()));
//! let marks = Arc::new(MarkCache::new());
//! let gate = Arc::new(RiskGate::new(
//!     store.clone(),
//!     portfolio.clone(),
//!     marks.clone(),
//!     RiskEnvelope::default(),
//! ));
//!
//! let publisher = EventPublisher::default();
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! let dispatcher = Dispatcher::new(
//!     cfg,
//!     DispatcherParts {
//!         store: store.clone(),
//!         registry,
//!         mapper,
//!         vault,
//!         broker,
//!         gate,
//!         portfolio,
//!         marks,
//!         events,
//!         publisher: publisher.clone(),
//!     },
//!     shutdown,
//! );
//! let _hook = IngressHook::new(dispatcher, store, publisher);
//! // The front door calls hook.on_master_order_accepted(id) per order.
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod marks;
pub mod policy;
pub mod publish;
pub mod risk;
pub mod session;
pub mod store;
pub mod types;

/// Re-export the engine entry points at the crate root for convenience.
pub use engine::{Dispatcher, DispatcherParts, IngressHook, Reconciler};
/// Re-export the error type and Result alias.
pub use error::{BrokerError, CoreError, Result};
