//! The order store.
//!
//! One row per order, master or follower. Status appends are atomic and
//! optimistic: the update is conditional on the revision the caller read,
//! and non-monotonic transitions are refused with
//! [`CoreError::StaleTransition`]. Fan-out creates many parent-referencing
//! rows concurrently; the shared connection serializes the writes.

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};

use crate::error::{CoreError, Result};
use crate::store::Database;
use crate::types::enums::*;
use crate::types::order::{Order, OrderDraft, OrderId, StatusUpdate};

/// Persistent record of orders and their status transitions.
#[derive(Clone)]
pub struct OrderStore {
    db: Database,
}

impl OrderStore {
    /// Build a store over the shared database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create an order from a draft. Assigns identity, `PENDING` status,
    /// and revision 0. A follower draft must match its parent's side and
    /// symbol.
    pub async fn create(&self, draft: OrderDraft) -> Result<Order> {
        if draft.quantity == 0 {
            return Err(CoreError::InvalidArgument(
                "order quantity must be positive".into(),
            ));
        }

        let id = OrderId::generate();
        let created_at = Utc::now();
        let conn = self.db.conn().lock().await;

        if let Some(parent_id) = &draft.parent_id {
            let parent = query_order(&conn, parent_id)?
                .ok_or_else(|| CoreError::OrderNotFound(parent_id.to_string()))?;
            if parent.side != draft.side || parent.symbol != draft.symbol {
                return Err(CoreError::InvalidArgument(format!(
                    "follower order must match parent side and symbol \
                     (parent {} {}, draft {} {})",
                    parent.side.as_str(),
                    parent.symbol,
                    draft.side.as_str(),
                    draft.symbol,
                )));
            }
        }

        conn.execute(
            "INSERT INTO orders (
                id, account, strategy_id, parent_id, side, order_type, symbol,
                exchange, quantity, price, trigger_price, product, validity,
                created_at, status, traded_qty, status_revision
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                       ?14, ?15, 0, 0)",
            params![
                id.as_str(),
                draft.account,
                draft.strategy_id,
                draft.parent_id.as_ref().map(|p| p.as_str()),
                draft.side.as_str(),
                draft.order_type.as_str(),
                draft.symbol,
                draft.exchange.as_str(),
                draft.quantity,
                draft.price,
                draft.trigger_price,
                draft.product.as_str(),
                draft.validity.as_str(),
                created_at.to_rfc3339(),
                OrderStatus::PENDING.as_str(),
            ],
        )?;

        let order = query_order(&conn, &id)?.ok_or_else(|| {
            CoreError::OrderNotFound(id.to_string())
        })?;
        Ok(order)
    }

    /// Fetch an order by id.
    pub async fn get(&self, id: &OrderId) -> Result<Order> {
        let conn = self.db.conn().lock().await;
        query_order(&conn, id)?.ok_or_else(|| CoreError::OrderNotFound(id.to_string()))
    }

    /// Append a status transition.
    ///
    /// Atomic: reads the current status and revision, validates the
    /// transition against the status partial order, and writes conditionally
    /// on the revision it read. A refused transition or a lost race returns
    /// [`CoreError::StaleTransition`]; callers discard it and reread.
    pub async fn append_status(
        &self,
        id: &OrderId,
        new_status: OrderStatus,
        update: StatusUpdate,
    ) -> Result<Order> {
        let conn = self.db.conn().lock().await;

        let current = query_order(&conn, id)?
            .ok_or_else(|| CoreError::OrderNotFound(id.to_string()))?;

        if !current.status.can_transition_to(new_status) {
            return Err(CoreError::StaleTransition {
                order_id: id.to_string(),
                from: current.status,
                to: new_status,
            });
        }

        let now = Utc::now().to_rfc3339();
        let submitted_at = if new_status == OrderStatus::SUBMITTED {
            Some(now.clone())
        } else {
            None
        };
        let terminal_at = if new_status.is_terminal() {
            Some(now)
        } else {
            None
        };

        let changed = conn.execute(
            "UPDATE orders SET
                status = ?1,
                status_revision = status_revision + 1,
                broker_order_id = COALESCE(?2, broker_order_id),
                exchange_order_id = COALESCE(?3, exchange_order_id),
                last_message = COALESCE(?4, last_message),
                traded_qty = COALESCE(?5, traded_qty),
                avg_trade_price = COALESCE(?6, avg_trade_price),
                submitted_at = COALESCE(?7, submitted_at),
                terminal_at = COALESCE(?8, terminal_at)
             WHERE id = ?9 AND status_revision = ?10",
            params![
                new_status.as_str(),
                update.broker_order_id,
                update.exchange_order_id,
                update.message,
                update.traded_qty,
                update.avg_trade_price,
                submitted_at,
                terminal_at,
                id.as_str(),
                current.status_revision,
            ],
        )?;
        if changed == 0 {
            return Err(CoreError::StaleTransition {
                order_id: id.to_string(),
                from: current.status,
                to: new_status,
            });
        }

        let order = query_order(&conn, id)?
            .ok_or_else(|| CoreError::OrderNotFound(id.to_string()))?;
        tracing::debug!(
            order_id = %id,
            status = new_status.as_str(),
            revision = order.status_revision,
            "order status appended"
        );
        Ok(order)
    }

    /// All orders derived from `parent`.
    pub async fn list_by_parent(&self, parent: &OrderId) -> Result<Vec<Order>> {
        let conn = self.db.conn().lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM orders WHERE parent_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map([parent.as_str()], row_to_order)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The follower order already created for `(parent, account)`, if any.
    /// A re-dispatch short-circuits on this instead of placing twice.
    pub async fn find_follower_order(
        &self,
        parent: &OrderId,
        account: &str,
    ) -> Result<Option<Order>> {
        let conn = self.db.conn().lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM orders WHERE parent_id = ?1 AND account = ?2 LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![parent.as_str(), account], row_to_order)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// All orders currently in `UNKNOWN` status, oldest first. The
    /// reconciler's work queue.
    pub async fn list_unknown(&self) -> Result<Vec<Order>> {
        let conn = self.db.conn().lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM orders WHERE status = 'UNKNOWN' ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_order)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Realized PnL for today's executed follower trades of `account`:
    /// sell-notional minus buy-notional over traded quantities.
    pub async fn realized_pnl_today(&self, account: &str) -> Result<f64> {
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339())
            .unwrap_or_default();

        let conn = self.db.conn().lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT side, traded_qty, avg_trade_price, price FROM orders
             WHERE account = ?1 AND parent_id IS NOT NULL
               AND traded_qty > 0 AND created_at >= ?2",
        )?;
        let mut pnl = 0.0;
        let mut rows = stmt.query(params![account, midnight])?;
        while let Some(row) = rows.next()? {
            let side: String = row.get(0)?;
            let traded_qty: u32 = row.get(1)?;
            let avg: Option<f64> = row.get(2)?;
            let price: Option<f64> = row.get(3)?;
            let Some(px) = avg.or(price) else { continue };
            let notional = px * f64::from(traded_qty);
            match side.as_str() {
                "SELL" => pnl += notional,
                _ => pnl -= notional,
            }
        }
        Ok(pnl)
    }
}

fn query_order(conn: &rusqlite::Connection, id: &OrderId) -> Result<Option<Order>> {
    let mut stmt = conn.prepare_cached("SELECT * FROM orders WHERE id = ?1")?;
    let mut rows = stmt.query_map([id.as_str()], row_to_order)?;
    rows.next().transpose().map_err(Into::into)
}

fn parse_enum<T>(
    idx: usize,
    parse: impl FnOnce(&str) -> Option<T>,
    raw: &str,
) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unrecognized value: {raw:?}").into(),
        )
    })
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                format!("bad timestamp {raw:?}: {e}").into(),
            )
        })
}

fn row_to_order(row: &Row<'_>) -> rusqlite::Result<Order> {
    let side: String = row.get("side")?;
    let order_type: String = row.get("order_type")?;
    let exchange: String = row.get("exchange")?;
    let product: String = row.get("product")?;
    let validity: String = row.get("validity")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let submitted_at: Option<String> = row.get("submitted_at")?;
    let terminal_at: Option<String> = row.get("terminal_at")?;

    Ok(Order {
        id: OrderId::from(row.get::<_, String>("id")?),
        account: row.get("account")?,
        strategy_id: row.get("strategy_id")?,
        parent_id: row.get::<_, Option<String>>("parent_id")?.map(OrderId::from),
        side: parse_enum(4, Side::parse, &side)?,
        order_type: parse_enum(5, OrderType::parse, &order_type)?,
        symbol: row.get("symbol")?,
        exchange: parse_enum(7, Exchange::parse, &exchange)?,
        quantity: row.get("quantity")?,
        price: row.get("price")?,
        trigger_price: row.get("trigger_price")?,
        product: parse_enum(11, ProductType::parse, &product)?,
        validity: parse_enum(12, Validity::parse, &validity)?,
        created_at: parse_ts(13, &created_at)?,
        submitted_at: submitted_at.as_deref().map(|s| parse_ts(14, s)).transpose()?,
        terminal_at: terminal_at.as_deref().map(|s| parse_ts(15, s)).transpose()?,
        status: parse_enum(16, OrderStatus::parse, &status)?,
        broker_order_id: row.get("broker_order_id")?,
        exchange_order_id: row.get("exchange_order_id")?,
        last_message: row.get("last_message")?,
        traded_qty: row.get("traded_qty")?,
        avg_trade_price: row.get("avg_trade_price")?,
        status_revision: row.get("status_revision")?,
    })
}
