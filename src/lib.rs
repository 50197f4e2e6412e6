//! Pair-trading analytics backend: live trade ingestion, multi-timeframe
//! OHLCV resampling, pair statistics (hedge ratio, spread, z-score,
//! correlation, ADF stationarity) and threshold alerts.

pub mod alerts;
pub mod analytics;
pub mod context;
pub mod ingest;
pub mod models;
pub mod resampler;
pub mod store;

pub use context::AppContext;
pub use models::Config;
