//! The instrument mapper.
//!
//! Resolves `(symbol, exchange)` to the broker's numeric scrip code and lot
//! size. Read-mostly: lookups hit a copy-on-write in-process cache
//! (`arc-swap`); misses fall through to the `scrip_master` table. The table
//! is populated offline from the broker's scrip dump and refreshed out of
//! band, which bumps a generation counter and drops the cache wholesale.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use rusqlite::params;

use crate::error::{CoreError, Result};
use crate::store::Database;
use crate::types::enums::{Exchange, ExchangeSegment};
use crate::types::instrument::InstrumentCode;

type CacheMap = HashMap<(String, Exchange), InstrumentCode>;

/// Symbol → broker instrument code resolution with a generation-stamped
/// cache.
pub struct InstrumentMapper {
    db: Database,
    cache: ArcSwap<CacheMap>,
    generation: AtomicU64,
}

impl InstrumentMapper {
    /// Build a mapper over the shared database.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cache: ArcSwap::from_pointee(CacheMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Resolve a symbol to its active instrument code.
    ///
    /// Cache hit is lock-free. A miss reads the store and publishes an
    /// updated cache map; absence is [`CoreError::UnknownInstrument`].
    pub async fn resolve(&self, symbol: &str, exchange: Exchange) -> Result<InstrumentCode> {
        let key = (symbol.to_owned(), exchange);
        if let Some(code) = self.cache.load().get(&key) {
            return Ok(code.clone());
        }

        let code = self.load_one(symbol, exchange).await?.ok_or_else(|| {
            CoreError::UnknownInstrument {
                symbol: symbol.to_owned(),
                exchange: exchange.as_str().to_owned(),
            }
        })?;

        // Copy-on-write insert; racing resolvers publish equivalent maps.
        self.cache.rcu(|current| {
            let mut next = CacheMap::clone(current);
            next.insert(key.clone(), code.clone());
            next
        });
        Ok(code)
    }

    /// Bulk upsert from a scrip master dump. Bumps the generation and
    /// replaces the cache with an empty map, so subsequent resolves see the
    /// fresh rows.
    pub async fn load_scrip_master(&self, rows: &[InstrumentCode]) -> Result<u64> {
        {
            let mut conn = self.db.conn().lock().await;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO scrip_master
                        (symbol, exchange, segment, scrip_code, lot_size, active)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(symbol, exchange) DO UPDATE SET
                        segment = ?3, scrip_code = ?4, lot_size = ?5, active = ?6",
                )?;
                for code in rows {
                    stmt.execute(params![
                        code.symbol,
                        code.exchange.as_str(),
                        code.segment.as_str(),
                        code.scrip_code,
                        code.lot_size,
                        code.active,
                    ])?;
                }
            }
            tx.commit()?;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cache.store(Arc::new(CacheMap::new()));
        tracing::info!(rows = rows.len(), generation, "scrip master refreshed");
        Ok(generation)
    }

    /// Current cache generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn load_one(&self, symbol: &str, exchange: Exchange) -> Result<Option<InstrumentCode>> {
        let conn = self.db.conn().lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT symbol, exchange, segment, scrip_code, lot_size, active
             FROM scrip_master
             WHERE symbol = ?1 AND exchange = ?2 AND active = 1",
        )?;
        let mut rows = stmt.query_map(params![symbol, exchange.as_str()], |row| {
            let exchange: String = row.get(1)?;
            let segment: String = row.get(2)?;
            Ok(InstrumentCode {
                symbol: row.get(0)?,
                exchange: parse_enum(1, Exchange::parse, &exchange)?,
                segment: parse_enum(2, ExchangeSegment::parse, &segment)?,
                scrip_code: row.get(3)?,
                lot_size: row.get(4)?,
                active: row.get(5)?,
            })
        })?;
        rows.next().transpose().map_err(Into::into)
    }
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
