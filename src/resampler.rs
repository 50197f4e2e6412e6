//! Resampling Engine
//!
//! Aggregates persisted ticks into OHLCV bars per (symbol, timeframe).
//! One physical loop wakes every second; each timeframe keeps its own
//! schedule and fires at a cadence equal to its bucket width. Bar writes
//! are idempotent upserts, so re-running a cycle over the same ticks never
//! produces duplicates.

use crate::models::{Bar, Config, Tick, Timeframe};
use crate::store::BarStore;
use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bucket ticks into OHLCV bars of the given timeframe.
///
/// Ticks may arrive in any order; open/close are decided by tick timestamp,
/// not input position. Output is sorted by bucket start.
pub fn resample_ticks(symbol: &str, timeframe: Timeframe, ticks: &[Tick]) -> Vec<Bar> {
    struct Bucket {
        first_ts: i64,
        open: f64,
        high: f64,
        low: f64,
        last_ts: i64,
        close: f64,
        volume: f64,
    }

    let interval = timeframe.interval_ms();
    let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();

    for tick in ticks {
        let bucket_start = tick.ts_ms.div_euclid(interval) * interval;
        buckets
            .entry(bucket_start)
            .and_modify(|b| {
                if tick.ts_ms < b.first_ts {
                    b.first_ts = tick.ts_ms;
                    b.open = tick.price;
                }
                if tick.ts_ms >= b.last_ts {
                    b.last_ts = tick.ts_ms;
                    b.close = tick.price;
                }
                b.high = b.high.max(tick.price);
                b.low = b.low.min(tick.price);
                b.volume += tick.quantity;
            })
            .or_insert(Bucket {
                first_ts: tick.ts_ms,
                open: tick.price,
                high: tick.price,
                low: tick.price,
                last_ts: tick.ts_ms,
                close: tick.price,
                volume: tick.quantity,
            });
    }

    buckets
        .into_iter()
        .map(|(bucket_ts_ms, b)| Bar {
            symbol: symbol.to_string(),
            timeframe,
            bucket_ts_ms,
            open: b.open,
            high: b.high,
            low: b.low,
            close: b.close,
            volume: b.volume,
        })
        .collect()
}

/// Per-timeframe due-time tracking, separated from the loop so scheduling
/// decisions are testable without sleeping.
#[derive(Debug)]
pub struct TimeframeSchedule {
    pub timeframe: Timeframe,
    last_run_ms: i64,
}

impl TimeframeSchedule {
    pub fn new(timeframe: Timeframe, now_ms: i64) -> Self {
        Self {
            timeframe,
            last_run_ms: now_ms,
        }
    }

    /// True when a full interval has elapsed since the last run; marks the
    /// timeframe as run at `now_ms` when it fires.
    pub fn due(&mut self, now_ms: i64) -> bool {
        if now_ms - self.last_run_ms >= self.timeframe.interval_ms() {
            self.last_run_ms = now_ms;
            true
        } else {
            false
        }
    }
}

pub struct Resampler {
    symbols: Vec<String>,
    timeframes: Vec<Timeframe>,
    finest: Timeframe,
    backfill_min_bars: i64,
    backfill_tick_limit: i64,
    shutdown_timeout: Duration,
    store: Arc<BarStore>,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Resampler {
    pub fn new(config: &Config, store: Arc<BarStore>) -> Self {
        Self {
            symbols: config.symbols.clone(),
            timeframes: config.timeframes.clone(),
            finest: config.finest_timeframe(),
            backfill_min_bars: config.backfill_min_bars,
            backfill_tick_limit: config.backfill_tick_limit,
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
            store,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Replay recent persisted ticks into bars for the finest timeframe
    /// when its bar count is below the warm threshold.
    ///
    /// Coarser timeframes are deliberately left to accumulate from live
    /// data: reprocessing the full tick history for them is not worth the
    /// cost at startup.
    pub fn backfill(&self) -> Result<()> {
        for symbol in &self.symbols {
            let count = self.store.bar_count(symbol, self.finest)?;
            if count >= self.backfill_min_bars {
                info!(symbol, timeframe = self.finest.as_str(), count, "Backfill not needed");
                continue;
            }

            let ticks = self.store.recent_ticks(symbol, self.backfill_tick_limit)?;
            if ticks.is_empty() {
                info!(symbol, "No persisted ticks to backfill from");
                continue;
            }

            let bars = resample_ticks(symbol, self.finest, &ticks);
            let inserted = self.store.upsert_bars(&bars)?;
            info!(
                symbol,
                timeframe = self.finest.as_str(),
                ticks = ticks.len(),
                bars = bars.len(),
                inserted,
                "Backfilled bars from persisted ticks"
            );
        }
        Ok(())
    }

    /// Start the background aggregation loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Resampler already running");
            return;
        }

        let resampler = self.clone();
        let handle = tokio::spawn(async move {
            resampler.run_loop().await;
        });
        *self.handle.lock() = Some(handle);
        info!(symbols = ?self.symbols, timeframes = ?self.timeframes, "Resampler started");
    }

    async fn run_loop(self: Arc<Self>) {
        let now_ms = Utc::now().timestamp_millis();
        let mut schedules: Vec<TimeframeSchedule> = self
            .timeframes
            .iter()
            .map(|&tf| TimeframeSchedule::new(tf, now_ms))
            .collect();

        let mut wake = tokio::time::interval(Duration::from_secs(1));
        wake.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while self.running.load(Ordering::Relaxed) {
            wake.tick().await;
            let now_ms = Utc::now().timestamp_millis();

            for schedule in schedules.iter_mut() {
                if !schedule.due(now_ms) {
                    continue;
                }
                for symbol in &self.symbols {
                    // One failing symbol/timeframe cycle must not halt the rest.
                    if let Err(e) = self.cycle(symbol, schedule.timeframe, now_ms) {
                        error!(
                            symbol,
                            timeframe = schedule.timeframe.as_str(),
                            error = %e,
                            "Resample cycle failed"
                        );
                    }
                }
            }
        }
    }

    /// Resample one (symbol, timeframe) over the current interval plus one
    /// prior interval of safety margin for late arrivals.
    fn cycle(&self, symbol: &str, timeframe: Timeframe, now_ms: i64) -> Result<()> {
        let interval = timeframe.interval_ms();
        let start_ms = now_ms - 2 * interval;

        let ticks = self.store.ticks_in_range(symbol, start_ms, now_ms)?;
        if ticks.is_empty() {
            return Ok(());
        }

        let bars = resample_ticks(symbol, timeframe, &ticks);
        let inserted = self.store.upsert_bars(&bars)?;
        debug!(
            symbol,
            timeframe = timeframe.as_str(),
            ticks = ticks.len(),
            bars = bars.len(),
            inserted,
            "Resample cycle complete"
        );
        Ok(())
    }

    /// Bars for a symbol/timeframe, oldest to newest, at most `limit`.
    pub fn ohlcv(&self, symbol: &str, timeframe: Timeframe, limit: i64) -> Result<Vec<Bar>> {
        self.store.bars(symbol, timeframe, limit)
    }

    /// Stop the loop; bounded wait for termination.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = tokio::time::timeout(self.shutdown_timeout, handle).await;
        }
        info!("Resampler stopped");
    }
}
