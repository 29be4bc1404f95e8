//! Replication outcome aggregation.
//!
//! Percentiles are computed by sorting the per-follower latency vector —
//! fan-outs top out around a thousand followers, so nothing heavier is
//! warranted.

use chrono::{DateTime, Utc};

use crate::types::event::{FollowerOutcome, FollowerRecord, ReplicationEvent, ReplicationSummary};
use crate::types::order::OrderId;

/// Nearest-rank percentile over an ascending-sorted slice. Empty → 0.
pub fn percentile_ms(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Fold per-follower records into the aggregate summary. The latency
/// distribution is taken over dispatched followers only.
pub fn summarize(records: &[FollowerRecord]) -> ReplicationSummary {
    let mut summary = ReplicationSummary {
        total: records.len() as u32,
        ..ReplicationSummary::default()
    };

    let mut latencies_ms: Vec<u64> = Vec::new();
    for record in records {
        match record.outcome {
            FollowerOutcome::Dispatched => {
                summary.dispatched += 1;
                latencies_ms.push(record.latency.as_millis() as u64);
            }
            FollowerOutcome::PolicySkipped(_) => summary.policy_skipped += 1,
            FollowerOutcome::Unmapped => summary.unmapped += 1,
            FollowerOutcome::RiskDenied(_) => summary.risk_denied += 1,
            FollowerOutcome::BrokerErrored => summary.broker_errored += 1,
            FollowerOutcome::TimedOut => summary.timed_out += 1,
        }
    }

    latencies_ms.sort_unstable();
    summary.p50_ms = percentile_ms(&latencies_ms, 50.0);
    summary.p95_ms = percentile_ms(&latencies_ms, 95.0);
    summary.p99_ms = percentile_ms(&latencies_ms, 99.0);
    summary
}

/// Seal a replication event from the collected records.
pub fn seal(
    master_order_id: OrderId,
    started_at: DateTime<Utc>,
    records: Vec<FollowerRecord>,
) -> ReplicationEvent {
    let summary = summarize(&records);
    ReplicationEvent {
        id: uuid::Uuid::new_v4().to_string(),
        master_order_id,
        started_at,
        ended_at: Utc::now(),
        summary,
        records,
    }
}
