//! Application Context
//!
//! Owns every long-lived component and wires them together: store, tick
//! feed, resampler, analytics engine and alert monitor. Handles are passed
//! explicitly; nothing in the crate reaches for a global. The context is
//! also the query surface callers go through, so analytics computation and
//! alert evaluation stay in one place.

use crate::alerts::{AlertMonitor, MetricsByPair};
use crate::analytics::{
    self, AnalyticsEngine, BasicStats, LiquidityMetrics, RegressionMethod,
};
use crate::ingest::{FastCache, InMemoryCache, TickFeed};
use crate::models::{Bar, Config, PairSnapshot, Tick, Timeframe};
use crate::resampler::Resampler;
use crate::store::BarStore;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct AppContext {
    pub config: Config,
    store: Arc<BarStore>,
    feed: Arc<TickFeed>,
    resampler: Arc<Resampler>,
    engine: AnalyticsEngine,
    alerts: Arc<AlertMonitor>,
}

impl AppContext {
    /// Build every component from configuration. Nothing starts running
    /// until [`AppContext::start`].
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(BarStore::open(&config.database_path)?);
        let cache: Arc<dyn FastCache> = Arc::new(InMemoryCache::default());
        let feed = Arc::new(TickFeed::new(&config, store.clone(), Some(cache)));
        let resampler = Arc::new(Resampler::new(&config, store.clone()));
        let engine = AnalyticsEngine::from_config(&config);
        let alerts = Arc::new(AlertMonitor::new());

        Ok(Self {
            config,
            store,
            feed,
            resampler,
            engine,
            alerts,
        })
    }

    /// Backfill bars from persisted ticks, then start the feed and the
    /// resample loop.
    pub fn start(&self) -> Result<()> {
        self.resampler.backfill()?;
        self.feed.start();
        self.resampler.start();
        info!("Application context started");
        Ok(())
    }

    /// Stop background work; each component winds down within its own
    /// bounded timeout.
    pub async fn stop(&self) {
        self.feed.stop().await;
        self.resampler.stop().await;
        info!("Application context stopped");
    }

    // =========================================================================
    // QUERY SURFACE
    // =========================================================================

    pub fn latest_price(&self, symbol: &str) -> f64 {
        self.feed.latest_price(symbol)
    }

    /// Latest observed price for every configured symbol.
    pub fn latest_prices(&self) -> HashMap<String, f64> {
        self.config
            .symbols
            .iter()
            .map(|s| (s.clone(), self.feed.latest_price(s)))
            .collect()
    }

    pub fn recent_ticks(&self, symbol: &str, limit: usize) -> Vec<Tick> {
        self.feed.recent_ticks(symbol, limit)
    }

    pub fn is_feed_connected(&self) -> bool {
        self.feed.is_connected()
    }

    pub fn ohlcv(&self, symbol: &str, timeframe: Timeframe, limit: i64) -> Result<Vec<Bar>> {
        self.resampler.ohlcv(symbol, timeframe, limit)
    }

    /// Descriptive price statistics over the most recent bars of a symbol.
    pub fn basic_stats(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: i64,
    ) -> Result<Option<BasicStats>> {
        let bars = self.store.bars(symbol, timeframe, limit)?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        Ok(analytics::basic_stats(&closes))
    }

    /// Volume-based liquidity metrics over the most recent bars of a symbol.
    pub fn liquidity_metrics(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: i64,
    ) -> Result<Option<LiquidityMetrics>> {
        let bars = self.store.bars(symbol, timeframe, limit)?;
        Ok(analytics::liquidity_metrics(&bars))
    }

    /// Bar counts per symbol and timeframe.
    pub fn data_summary(&self) -> Result<HashMap<String, HashMap<String, i64>>> {
        self.store
            .data_summary(&self.config.symbols, &self.config.timeframes)
    }

    pub fn alerts(&self) -> &AlertMonitor {
        &self.alerts
    }

    /// Compute pair analytics over the most recent `limit` bars of both
    /// symbols, persist the snapshot, and evaluate alerts against the
    /// resulting metric values.
    ///
    /// Returns `None` when either symbol has no bars yet. A snapshot
    /// persistence failure is logged and does not fail the computation.
    pub fn compute_pair_analytics(
        &self,
        symbol_a: &str,
        symbol_b: &str,
        timeframe: Timeframe,
        limit: i64,
        window: Option<usize>,
        method: RegressionMethod,
    ) -> Result<Option<PairSnapshot>> {
        let bars_a = self.store.bars(symbol_a, timeframe, limit)?;
        let bars_b = self.store.bars(symbol_b, timeframe, limit)?;
        let series_a = analytics::close_series(&bars_a);
        let series_b = analytics::close_series(&bars_b);

        let Some(snapshot) = self.engine.compute_pair_analytics(
            symbol_a, symbol_b, timeframe, &series_a, &series_b, window, method,
        ) else {
            return Ok(None);
        };

        if let Err(e) = self.store.insert_snapshot(&snapshot) {
            warn!(pair = %snapshot.symbol_pair, error = %e, "Snapshot persistence failed");
        }

        self.alerts.check_alerts(&snapshot_metrics(&snapshot));
        Ok(Some(snapshot))
    }
}

/// Flatten a snapshot into the metric map alert rules evaluate against.
fn snapshot_metrics(snapshot: &PairSnapshot) -> MetricsByPair {
    let values = HashMap::from([
        ("z_score".to_string(), snapshot.current_z_score()),
        ("correlation".to_string(), snapshot.current_correlation()),
        ("spread".to_string(), snapshot.spread_current),
        ("hedge_ratio".to_string(), snapshot.hedge_ratio),
        ("spread_mean".to_string(), snapshot.spread_mean),
        ("spread_std".to_string(), snapshot.spread_std),
        ("adf_pvalue".to_string(), snapshot.adf.pvalue),
    ]);
    HashMap::from([(snapshot.symbol_pair.clone(), values)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Alert, AlertCondition};

    fn tick(symbol: &str, ts_ms: i64, price: f64) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            ts_ms,
            price,
            quantity: 1.0,
        }
    }

    fn context() -> AppContext {
        let config = Config {
            database_path: ":memory:".to_string(),
            ..Config::default()
        };
        AppContext::new(config).unwrap()
    }

    #[test]
    fn analytics_with_no_bars_is_none() {
        let ctx = context();
        let snap = ctx
            .compute_pair_analytics(
                "btcusdt",
                "ethusdt",
                Timeframe::S1,
                100,
                None,
                RegressionMethod::Ols,
            )
            .unwrap();
        assert!(snap.is_none());
    }

    #[test]
    fn ticks_to_bars_to_snapshot_to_alert() {
        let ctx = context();

        // Two correlated price paths, one tick per second for 60 seconds.
        let mut ticks = Vec::new();
        for i in 0..60i64 {
            let wave = (i as f64 * 0.3).sin();
            ticks.push(tick("btcusdt", i * 1000, 100.0 + wave));
            ticks.push(tick("ethusdt", i * 1000, 50.0 + 0.5 * wave));
        }
        ctx.store.insert_ticks(&ticks).unwrap();
        ctx.resampler.backfill().unwrap();

        assert_eq!(ctx.ohlcv("btcusdt", Timeframe::S1, 100).unwrap().len(), 60);
        assert!(ctx.latest_price("btcusdt") == 0.0); // feed never ran

        ctx.alerts().add_alert(Alert::new(
            "always",
            AlertCondition::Greater,
            "hedge_ratio",
            0.5,
            "btcusdt_ethusdt",
        ));

        let snap = ctx
            .compute_pair_analytics(
                "btcusdt",
                "ethusdt",
                Timeframe::S1,
                100,
                Some(10),
                RegressionMethod::Ols,
            )
            .unwrap()
            .expect("snapshot");

        assert!((snap.hedge_ratio - 2.0).abs() < 1e-6);
        assert_eq!(snap.spread.len(), 60);
        assert_eq!(ctx.store.snapshot_count("btcusdt_ethusdt").unwrap(), 1);

        let history = ctx.alerts().history(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].alert_name, "always");

        let summary = ctx.data_summary().unwrap();
        assert_eq!(summary["btcusdt"]["1s"], 60);
    }

    #[test]
    fn latest_prices_covers_every_configured_symbol() {
        let ctx = context();
        let prices = ctx.latest_prices();
        assert_eq!(prices.len(), 2);
        // The feed never ran, so both symbols report the no-trade default.
        assert_eq!(prices["btcusdt"], 0.0);
        assert_eq!(prices["ethusdt"], 0.0);
    }

    #[test]
    fn per_symbol_statistics_over_bars() {
        let ctx = context();
        let ticks: Vec<Tick> = (0..30i64)
            .map(|i| tick("btcusdt", i * 1000, 100.0 + i as f64))
            .collect();
        ctx.store.insert_ticks(&ticks).unwrap();
        ctx.resampler.backfill().unwrap();

        let stats = ctx
            .basic_stats("btcusdt", Timeframe::S1, 100)
            .unwrap()
            .expect("stats");
        assert_eq!(stats.current, 129.0);
        assert_eq!(stats.min, 100.0);

        let liq = ctx
            .liquidity_metrics("btcusdt", Timeframe::S1, 100)
            .unwrap()
            .expect("liquidity");
        assert_eq!(liq.total_volume, 30.0);

        assert!(ctx.basic_stats("ethusdt", Timeframe::S1, 100).unwrap().is_none());
    }
}
