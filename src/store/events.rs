//! Append-only persistence for sealed replication events.

use std::time::Duration;

use chrono::DateTime;
use rusqlite::params;

use crate::error::Result;
use crate::store::Database;
use crate::types::event::{FollowerOutcome, FollowerRecord, ReplicationEvent, ReplicationSummary};
use crate::types::order::OrderId;

/// The replication event log. Events are written once, at seal time, and
/// never mutated; analytics reads them out of band.
#[derive(Clone)]
pub struct EventLog {
    db: Database,
}

impl EventLog {
    /// Build a log over the shared database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a sealed event and its per-follower outcome rows.
    pub async fn append(&self, event: &ReplicationEvent) -> Result<()> {
        let mut conn = self.db.conn().lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO replication_events (
                id, master_order_id, started_at, ended_at, total, dispatched,
                policy_skipped, unmapped, risk_denied, broker_errored,
                timed_out, p50_ms, p95_ms, p99_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                event.id,
                event.master_order_id.as_str(),
                event.started_at.to_rfc3339(),
                event.ended_at.to_rfc3339(),
                event.summary.total,
                event.summary.dispatched,
                event.summary.policy_skipped,
                event.summary.unmapped,
                event.summary.risk_denied,
                event.summary.broker_errored,
                event.summary.timed_out,
                event.summary.p50_ms,
                event.summary.p95_ms,
                event.summary.p99_ms,
            ],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO replication_outcomes
                    (event_id, follower_account, outcome, detail, latency_ms, message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for record in &event.records {
                stmt.execute(params![
                    event.id,
                    record.follower_account,
                    record.outcome.kind_str(),
                    record.outcome.detail_str(),
                    record.latency.as_millis() as u64,
                    record.message,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The most recent sealed events, newest first, outcomes included.
    pub async fn recent(&self, limit: u32) -> Result<Vec<ReplicationEvent>> {
        let conn = self.db.conn().lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, master_order_id, started_at, ended_at, total,
                    dispatched, policy_skipped, unmapped, risk_denied,
                    broker_errored, timed_out, p50_ms, p95_ms, p99_ms
             FROM replication_events ORDER BY started_at DESC LIMIT ?1",
        )?;
        let events = stmt
            .query_map([limit], |row| {
                let started_at: String = row.get(2)?;
                let ended_at: String = row.get(3)?;
                Ok(ReplicationEvent {
                    id: row.get(0)?,
                    master_order_id: OrderId::from(row.get::<_, String>(1)?),
                    started_at: parse_ts(2, &started_at)?,
                    ended_at: parse_ts(3, &ended_at)?,
                    summary: ReplicationSummary {
                        total: row.get(4)?,
                        dispatched: row.get(5)?,
                        policy_skipped: row.get(6)?,
                        unmapped: row.get(7)?,
                        risk_denied: row.get(8)?,
                        broker_errored: row.get(9)?,
                        timed_out: row.get(10)?,
                        p50_ms: row.get(11)?,
                        p95_ms: row.get(12)?,
                        p99_ms: row.get(13)?,
                    },
                    records: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(events.len());
        let mut stmt = conn.prepare_cached(
            "SELECT follower_account, outcome, detail, latency_ms, message
             FROM replication_outcomes WHERE event_id = ?1",
        )?;
        for mut event in events {
            let records = stmt
                .query_map([&event.id], |row| {
                    let outcome: String = row.get(1)?;
                    let detail: Option<String> = row.get(2)?;
                    let latency_ms: u64 = row.get(3)?;
                    Ok((outcome, detail, latency_ms, row.get::<_, String>(0)?, row.get::<_, Option<String>>(4)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (outcome, detail, latency_ms, follower_account, message) in records {
                if let Some(outcome) =
                    FollowerOutcome::from_storage(&outcome, detail.as_deref())
                {
                    event.records.push(FollowerRecord {
                        follower_account,
                        outcome,
                        latency: Duration::from_millis(latency_ms),
                        message,
                    });
                }
            }
            out.push(event);
        }
        Ok(out)
    }
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                format!("bad timestamp {raw:?}: {e}").into(),
            )
        })
}
