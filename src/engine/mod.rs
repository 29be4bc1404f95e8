//! The replication engine.
//!
//! - [`dispatcher`] — the bounded-concurrency fan-out core
//! - [`retry`] — the exponential backoff curve for transient broker errors
//! - [`metrics`] — outcome aggregation and latency percentiles
//! - [`reconciler`] — background resolution of `UNKNOWN` orders
//! - [`ingress`] — the front door's entry point into replication

use tokio::sync::watch;

pub mod dispatcher;
pub mod ingress;
pub mod metrics;
pub mod reconciler;
pub mod retry;

pub use dispatcher::{Dispatcher, DispatcherParts};
pub use ingress::IngressHook;
pub use reconciler::Reconciler;
pub use retry::BackoffPolicy;

/// Resolves when the shutdown signal fires. A dropped sender never fires —
/// the engine then runs until the process exits.
pub(crate) async fn cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
