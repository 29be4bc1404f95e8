//! The follower registry.
//!
//! Active master→follower links with their copy policies. Reads during a
//! fan-out go through a short-TTL snapshot cache so a burst of master
//! orders does not hammer the database; link changes that land mid-fan-out
//! are deliberately ignored until the next snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};

use crate::error::Result;
use crate::store::Database;
use crate::types::link::{CopyPolicy, FollowerLink};

/// Registry of follower links with a per-master snapshot cache.
pub struct FollowerRegistry {
    db: Database,
    snapshot_ttl: Duration,
    cache: parking_lot::Mutex<HashMap<String, (Instant, Arc<Vec<FollowerLink>>)>>,
}

impl FollowerRegistry {
    /// Build a registry over the shared database.
    pub fn new(db: Database, snapshot_ttl: Duration) -> Self {
        Self {
            db,
            snapshot_ttl,
            cache: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Point-in-time snapshot of the active followers of `master_account`.
    ///
    /// Served from cache within the TTL; one fan-out reads this exactly
    /// once, so every follower pipeline sees the same link set.
    pub async fn active_followers(&self, master_account: &str) -> Result<Arc<Vec<FollowerLink>>> {
        {
            let cache = self.cache.lock();
            if let Some((at, snapshot)) = cache.get(master_account) {
                if at.elapsed() < self.snapshot_ttl {
                    return Ok(snapshot.clone());
                }
            }
        }

        let snapshot = Arc::new(self.load_active(master_account).await?);
        self.cache
            .lock()
            .insert(master_account.to_owned(), (Instant::now(), snapshot.clone()));
        Ok(snapshot)
    }

    /// Create or replace the link for `(master, follower)`. Validates the
    /// policy and drops the master's cached snapshot.
    pub async fn upsert_link(&self, link: &FollowerLink) -> Result<()> {
        link.policy.validate()?;

        let (ratio, percent, quantity) = match link.policy {
            CopyPolicy::FixedRatio { ratio } => (Some(ratio), None, None),
            CopyPolicy::Percentage { percent } => (None, Some(percent), None),
            CopyPolicy::FixedQuantity { quantity } => (None, None, Some(quantity)),
        };

        {
            let conn = self.db.conn().lock().await;
            conn.execute(
                "INSERT INTO follower_links (
                    master_account, follower_account, active, policy_kind,
                    policy_ratio, policy_percent, policy_quantity,
                    max_order_notional, max_daily_loss, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(master_account, follower_account) DO UPDATE SET
                    active = ?3, policy_kind = ?4, policy_ratio = ?5,
                    policy_percent = ?6, policy_quantity = ?7,
                    max_order_notional = ?8, max_daily_loss = ?9",
                params![
                    link.master_account,
                    link.follower_account,
                    link.active,
                    link.policy.kind(),
                    ratio,
                    percent,
                    quantity,
                    link.max_order_notional,
                    link.max_daily_loss,
                    link.created_at.to_rfc3339(),
                ],
            )?;
        }
        self.invalidate(&link.master_account);
        Ok(())
    }

    /// Soft-delete on unfollow: clears the active flag, keeps the row.
    pub async fn deactivate_link(&self, master_account: &str, follower_account: &str) -> Result<()> {
        {
            let conn = self.db.conn().lock().await;
            conn.execute(
                "UPDATE follower_links SET active = 0
                 WHERE master_account = ?1 AND follower_account = ?2",
                params![master_account, follower_account],
            )?;
        }
        self.invalidate(master_account);
        Ok(())
    }

    fn invalidate(&self, master_account: &str) {
        self.cache.lock().remove(master_account);
    }

    async fn load_active(&self, master_account: &str) -> Result<Vec<FollowerLink>> {
        let conn = self.db.conn().lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT master_account, follower_account, active, policy_kind,
                    policy_ratio, policy_percent, policy_quantity,
                    max_order_notional, max_daily_loss, created_at
             FROM follower_links
             WHERE master_account = ?1 AND active = 1
             ORDER BY follower_account",
        )?;
        let rows = stmt.query_map([master_account], row_to_link)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

fn row_to_link(row: &Row<'_>) -> rusqlite::Result<FollowerLink> {
    let kind: String = row.get(3)?;
    let policy = match kind.as_str() {
        "fixed_ratio" => CopyPolicy::FixedRatio {
            ratio: row.get::<_, Option<f64>>(4)?.unwrap_or(1.0),
        },
        "percentage" => CopyPolicy::Percentage {
            percent: row.get::<_, Option<f64>>(5)?.unwrap_or(100.0),
        },
        "fixed_quantity" => CopyPolicy::FixedQuantity {
            quantity: row.get::<_, Option<u32>>(6)?.unwrap_or(1),
        },
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unrecognized policy kind: {other:?}").into(),
            ));
        }
    };

    let created_at: String = row.get(9)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                rusqlite::types::Type::Text,
                format!("bad timestamp: {e}").into(),
            )
        })?;

    Ok(FollowerLink {
        master_account: row.get(0)?,
        follower_account: row.get(1)?,
        active: row.get(2)?,
        policy,
        max_order_notional: row.get(7)?,
        max_daily_loss: row.get(8)?,
        created_at,
    })
}
