use serde::{Deserialize, Serialize};

/// Aggregation bucket widths supported by the resampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    S1,
    M1,
    M5,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::S1 => "1s",
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1s" => Some(Timeframe::S1),
            "1m" => Some(Timeframe::M1),
            "5m" => Some(Timeframe::M5),
            _ => None,
        }
    }

    pub fn interval_ms(&self) -> i64 {
        match self {
            Timeframe::S1 => 1_000,
            Timeframe::M1 => 60_000,
            Timeframe::M5 => 300_000,
        }
    }
}

/// A single normalized trade event.
///
/// Ticks are bucketed by their exchange timestamp, never by arrival order,
/// so late frames still land in the correct bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    /// Exchange event time, epoch milliseconds.
    pub ts_ms: i64,
    pub price: f64,
    pub quantity: f64,
}

/// One OHLCV bar. Unique per (symbol, timeframe, bucket_ts_ms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Start of the aggregation bucket, epoch milliseconds.
    pub bucket_ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Augmented Dickey-Fuller test outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdfResult {
    pub statistic: f64,
    pub pvalue: f64,
    /// (label, value) critical values at 1%/5%/10%; empty when skipped.
    pub critical_values: Vec<(String, f64)>,
    pub is_stationary: bool,
}

impl AdfResult {
    /// Degenerate result for series too short (or too degenerate) to test.
    pub fn skipped() -> Self {
        Self {
            statistic: 0.0,
            pvalue: 1.0,
            critical_values: Vec::new(),
            is_stationary: false,
        }
    }
}

/// Full pair-analytics output for one invocation.
///
/// Immutable once computed; persisted as one `analytics_results` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSnapshot {
    pub symbol_pair: String,
    pub timeframe: Timeframe,
    pub computed_at_ms: i64,
    pub hedge_ratio: f64,
    pub r_squared: f64,
    pub intercept: f64,
    /// (timestamp_ms, value), ascending; inner-joined on common timestamps.
    pub spread: Vec<(i64, f64)>,
    pub z_score: Vec<(i64, f64)>,
    pub correlation: Vec<(i64, f64)>,
    pub adf: AdfResult,
    pub spread_mean: f64,
    pub spread_std: f64,
    pub spread_current: f64,
}

impl PairSnapshot {
    pub fn current_z_score(&self) -> f64 {
        self.z_score.last().map(|&(_, v)| v).unwrap_or(0.0)
    }

    pub fn current_correlation(&self) -> f64 {
        self.correlation.last().map(|&(_, v)| v).unwrap_or(0.0)
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub ws_base_url: String,
    pub tick_buffer_capacity: usize,
    /// Persist every Nth tick per symbol. 1 = every tick. The resampler
    /// reads persisted ticks, so raise this only if write throughput
    /// demands it.
    pub persist_every: u64,
    pub reconnect_delay_secs: u64,
    pub zscore_window: usize,
    pub correlation_window: usize,
    pub adf_significance: f64,
    /// Backfill kicks in when the finest timeframe has fewer bars than this.
    pub backfill_min_bars: i64,
    pub backfill_tick_limit: i64,
    pub shutdown_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./pairwatch.db".to_string());

        let symbols: Vec<String> = std::env::var("SYMBOLS")
            .unwrap_or_else(|_| "btcusdt,ethusdt".to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let timeframes: Vec<Timeframe> = std::env::var("TIMEFRAMES")
            .unwrap_or_else(|_| "1s,1m,5m".to_string())
            .split(',')
            .filter_map(Timeframe::parse)
            .collect();

        let ws_base_url = std::env::var("WS_BASE_URL")
            .unwrap_or_else(|_| "wss://fstream.binance.com/stream".to_string());

        let tick_buffer_capacity = std::env::var("TICK_BUFFER_CAPACITY")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);

        let persist_every = std::env::var("PERSIST_EVERY")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .ok()
            .filter(|&n: &u64| n > 0)
            .unwrap_or(1);

        let reconnect_delay_secs = std::env::var("RECONNECT_DELAY_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        let zscore_window = std::env::var("ZSCORE_WINDOW")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .unwrap_or(20);

        let correlation_window = std::env::var("CORRELATION_WINDOW")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .unwrap_or(50);

        let adf_significance = std::env::var("ADF_SIGNIFICANCE")
            .unwrap_or_else(|_| "0.05".to_string())
            .parse()
            .unwrap_or(0.05);

        let backfill_min_bars = std::env::var("BACKFILL_MIN_BARS")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .unwrap_or(100);

        let backfill_tick_limit = std::env::var("BACKFILL_TICK_LIMIT")
            .unwrap_or_else(|_| "100000".to_string())
            .parse()
            .unwrap_or(100_000);

        let shutdown_timeout_secs = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        anyhow::ensure!(!symbols.is_empty(), "SYMBOLS must name at least one symbol");
        anyhow::ensure!(
            !timeframes.is_empty(),
            "TIMEFRAMES must name at least one of 1s, 1m, 5m"
        );

        Ok(Self {
            database_path,
            symbols,
            timeframes,
            ws_base_url,
            tick_buffer_capacity,
            persist_every,
            reconnect_delay_secs,
            zscore_window,
            correlation_window,
            adf_significance,
            backfill_min_bars,
            backfill_tick_limit,
            shutdown_timeout_secs,
        })
    }

    /// Finest configured timeframe (smallest bucket width).
    pub fn finest_timeframe(&self) -> Timeframe {
        self.timeframes
            .iter()
            .copied()
            .min_by_key(|tf| tf.interval_ms())
            .unwrap_or(Timeframe::S1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: ":memory:".to_string(),
            symbols: vec!["btcusdt".to_string(), "ethusdt".to_string()],
            timeframes: vec![Timeframe::S1, Timeframe::M1, Timeframe::M5],
            ws_base_url: "wss://fstream.binance.com/stream".to_string(),
            tick_buffer_capacity: 1000,
            persist_every: 1,
            reconnect_delay_secs: 5,
            zscore_window: 20,
            correlation_window: 50,
            adf_significance: 0.05,
            backfill_min_bars: 100,
            backfill_tick_limit: 100_000,
            shutdown_timeout_secs: 5,
        }
    }
}
