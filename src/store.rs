//! Bar Store
//!
//! Durable SQLite storage for raw ticks, derived OHLCV bars, and analytics
//! snapshots. Bars are unique per (symbol, timeframe, bucket start) and
//! writes are idempotent (`INSERT OR IGNORE`), so concurrent resample
//! cycles never conflict. Ticks and snapshots are append-only.

use crate::models::{Bar, PairSnapshot, Tick, Timeframe};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

const STORE_SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;

-- Raw trade events, append-only
CREATE TABLE IF NOT EXISTS ticks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    ts_ms INTEGER NOT NULL,
    price REAL NOT NULL,
    quantity REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ticks_symbol_ts
    ON ticks(symbol, ts_ms);

-- Derived OHLCV bars, unique per (symbol, timeframe, bucket start)
CREATE TABLE IF NOT EXISTS bars (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    ts_ms INTEGER NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_bars_key
    ON bars(symbol, timeframe, ts_ms);

-- Analytics snapshot log, append-only
CREATE TABLE IF NOT EXISTS analytics_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol_pair TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    ts_ms INTEGER NOT NULL,
    hedge_ratio REAL,
    spread REAL,
    z_score REAL,
    correlation REAL,
    adf_statistic REAL,
    adf_pvalue REAL,
    spread_mean REAL,
    spread_std REAL
);

CREATE INDEX IF NOT EXISTS idx_analytics_pair_tf_ts
    ON analytics_results(symbol_pair, timeframe, ts_ms);
"#;

/// SQLite-backed time-series store.
///
/// Each public method takes and releases the connection lock for exactly one
/// operation; nothing holds the connection across unrelated work.
pub struct BarStore {
    conn: Mutex<Connection>,
}

impl BarStore {
    /// Open or create the store at the given path.
    pub fn open(db_path: &str) -> Result<Self> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open bar store database: {}", db_path))?;
        conn.execute_batch(STORE_SCHEMA)?;

        info!(path = %db_path, "Bar store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(STORE_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // =========================================================================
    // TICKS
    // =========================================================================

    pub fn insert_tick(&self, tick: &Tick) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ticks (symbol, ts_ms, price, quantity) VALUES (?1, ?2, ?3, ?4)",
            params![tick.symbol, tick.ts_ms, tick.price, tick.quantity],
        )?;
        Ok(())
    }

    /// Insert a batch of ticks in a single transaction.
    pub fn insert_ticks(&self, ticks: &[Tick]) -> Result<usize> {
        if ticks.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result = (|| -> Result<usize> {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO ticks (symbol, ts_ms, price, quantity) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for tick in ticks {
                stmt.execute(params![tick.symbol, tick.ts_ms, tick.price, tick.quantity])?;
            }
            Ok(ticks.len())
        })();

        match result {
            Ok(n) => {
                conn.execute("COMMIT", [])?;
                Ok(n)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    /// Ticks for a symbol in `[start_ms, end_ms)`, ascending by timestamp.
    pub fn ticks_in_range(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Tick>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT symbol, ts_ms, price, quantity FROM ticks
             WHERE symbol = ?1 AND ts_ms >= ?2 AND ts_ms < ?3
             ORDER BY ts_ms ASC",
        )?;
        let ticks = stmt
            .query_map(params![symbol, start_ms, end_ms], row_to_tick)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ticks)
    }

    /// Up to `limit` most recent ticks for a symbol, returned ascending.
    pub fn recent_ticks(&self, symbol: &str, limit: i64) -> Result<Vec<Tick>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT symbol, ts_ms, price, quantity FROM ticks
             WHERE symbol = ?1 ORDER BY ts_ms DESC LIMIT ?2",
        )?;
        let mut ticks = stmt
            .query_map(params![symbol, limit], row_to_tick)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ticks.reverse();
        Ok(ticks)
    }

    pub fn tick_count(&self, symbol: &str) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM ticks WHERE symbol = ?1",
            params![symbol],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // =========================================================================
    // BARS
    // =========================================================================

    /// Upsert one bar. Returns true if the bar was inserted, false when a
    /// row for that (symbol, timeframe, bucket) already existed.
    pub fn upsert_bar(&self, bar: &Bar) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = insert_bar_stmt(&conn, bar)?;
        Ok(changed > 0)
    }

    /// Upsert a batch of bars in one transaction; duplicates are skipped.
    /// Returns the number of newly inserted rows.
    pub fn upsert_bars(&self, bars: &[Bar]) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result = (|| -> Result<usize> {
            let mut inserted = 0;
            for bar in bars {
                inserted += insert_bar_stmt(&conn, bar)?;
            }
            Ok(inserted)
        })();

        match result {
            Ok(n) => {
                conn.execute("COMMIT", [])?;
                Ok(n)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    /// Most recent `limit` bars for (symbol, timeframe), oldest to newest.
    pub fn bars(&self, symbol: &str, timeframe: Timeframe, limit: i64) -> Result<Vec<Bar>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT symbol, timeframe, ts_ms, open, high, low, close, volume FROM bars
             WHERE symbol = ?1 AND timeframe = ?2
             ORDER BY ts_ms DESC LIMIT ?3",
        )?;
        let mut bars = stmt
            .query_map(params![symbol, timeframe.as_str(), limit], row_to_bar)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bars.reverse();
        Ok(bars)
    }

    pub fn bar_count(&self, symbol: &str, timeframe: Timeframe) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM bars WHERE symbol = ?1 AND timeframe = ?2",
            params![symbol, timeframe.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // =========================================================================
    // ANALYTICS SNAPSHOTS
    // =========================================================================

    /// Append one immutable snapshot row (current values of each series).
    pub fn insert_snapshot(&self, snapshot: &PairSnapshot) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO analytics_results (
                symbol_pair, timeframe, ts_ms,
                hedge_ratio, spread, z_score, correlation,
                adf_statistic, adf_pvalue, spread_mean, spread_std
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                snapshot.symbol_pair,
                snapshot.timeframe.as_str(),
                snapshot.computed_at_ms,
                snapshot.hedge_ratio,
                snapshot.spread_current,
                snapshot.current_z_score(),
                snapshot.current_correlation(),
                snapshot.adf.statistic,
                snapshot.adf.pvalue,
                snapshot.spread_mean,
                snapshot.spread_std,
            ],
        )?;
        Ok(())
    }

    pub fn snapshot_count(&self, symbol_pair: &str) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM analytics_results WHERE symbol_pair = ?1",
            params![symbol_pair],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // =========================================================================
    // SUMMARY
    // =========================================================================

    /// Bar counts per symbol and timeframe.
    pub fn data_summary(
        &self,
        symbols: &[String],
        timeframes: &[Timeframe],
    ) -> Result<HashMap<String, HashMap<String, i64>>> {
        let mut summary = HashMap::new();
        for symbol in symbols {
            let mut per_tf = HashMap::new();
            for tf in timeframes {
                per_tf.insert(tf.as_str().to_string(), self.bar_count(symbol, *tf)?);
            }
            summary.insert(symbol.clone(), per_tf);
        }
        Ok(summary)
    }
}

fn insert_bar_stmt(conn: &Connection, bar: &Bar) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO bars (symbol, timeframe, ts_ms, open, high, low, close, volume)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    let changed = stmt.execute(params![
        bar.symbol,
        bar.timeframe.as_str(),
        bar.bucket_ts_ms,
        bar.open,
        bar.high,
        bar.low,
        bar.close,
        bar.volume,
    ])?;
    Ok(changed)
}

fn row_to_tick(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tick> {
    Ok(Tick {
        symbol: row.get(0)?,
        ts_ms: row.get(1)?,
        price: row.get(2)?,
        quantity: row.get(3)?,
    })
}

fn row_to_bar(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bar> {
    let timeframe: String = row.get(1)?;
    Ok(Bar {
        symbol: row.get(0)?,
        timeframe: Timeframe::parse(&timeframe).unwrap_or(Timeframe::S1),
        bucket_ts_ms: row.get(2)?,
        open: row.get(3)?,
        high: row.get(4)?,
        low: row.get(5)?,
        close: row.get(6)?,
        volume: row.get(7)?,
    })
}
