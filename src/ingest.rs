//! Tick Ingestion Stream
//!
//! Maintains one combined-stream WebSocket connection carrying the trade
//! stream for every configured symbol, normalizes events into [`Tick`]s,
//! keeps a bounded in-memory ring buffer per symbol for low-latency reads,
//! and persists a configurable sampled fraction of ticks to the bar store.
//!
//! The connection loop reconnects forever with a fixed backoff; it never
//! terminates the process. Store-write and fast-cache failures are logged
//! and skipped -- the buffer keeps serving reads regardless.

use crate::models::{Config, Tick};
use crate::store::BarStore;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Optional best-effort low-latency cache. Unavailability must never
/// affect correctness, only recency of the fast-path read.
pub trait FastCache: Send + Sync {
    fn put(&self, tick: &Tick) -> Result<()>;
    fn latest(&self, symbol: &str) -> Option<f64>;
}

/// Process-local last-value cache; the in-tree [`FastCache`] implementation.
#[derive(Default)]
pub struct InMemoryCache {
    inner: RwLock<HashMap<String, (i64, f64)>>,
}

impl FastCache for InMemoryCache {
    fn put(&self, tick: &Tick) -> Result<()> {
        self.inner
            .write()
            .insert(tick.symbol.clone(), (tick.ts_ms, tick.price));
        Ok(())
    }

    fn latest(&self, symbol: &str) -> Option<f64> {
        self.inner.read().get(symbol).map(|&(_, price)| price)
    }
}

/// Combined-stream envelope: {"stream":"btcusdt@trade","data":{...}}
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    data: TradeEvent,
}

/// Binance futures trade event payload (prices arrive as strings).
#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time_ms: i64,
}

impl TradeEvent {
    fn into_tick(self) -> Result<Tick> {
        Ok(Tick {
            symbol: self.symbol.to_lowercase(),
            ts_ms: self.trade_time_ms,
            price: self.price.parse().context("Invalid trade price")?,
            quantity: self.quantity.parse().context("Invalid trade quantity")?,
        })
    }
}

#[derive(Default)]
struct SymbolBuffer {
    ticks: VecDeque<Tick>,
    /// Total ticks observed for this symbol, drives persistence sampling.
    seen: u64,
}

pub struct TickFeed {
    symbols: Vec<String>,
    ws_base_url: String,
    buffer_capacity: usize,
    persist_every: u64,
    reconnect_delay: Duration,
    shutdown_timeout: Duration,
    store: Arc<BarStore>,
    cache: Option<Arc<dyn FastCache>>,
    buffers: RwLock<HashMap<String, SymbolBuffer>>,
    running: AtomicBool,
    connected: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TickFeed {
    pub fn new(config: &Config, store: Arc<BarStore>, cache: Option<Arc<dyn FastCache>>) -> Self {
        let buffers = config
            .symbols
            .iter()
            .map(|s| (s.clone(), SymbolBuffer::default()))
            .collect();

        Self {
            symbols: config.symbols.clone(),
            ws_base_url: config.ws_base_url.clone(),
            buffer_capacity: config.tick_buffer_capacity,
            persist_every: config.persist_every.max(1),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
            store,
            cache,
            buffers: RwLock::new(buffers),
            running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Subscribe to the configured symbols and start the read loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Tick feed already running");
            return;
        }

        let feed = self.clone();
        let handle = tokio::spawn(async move {
            feed.run_loop().await;
        });
        *self.handle.lock() = Some(handle);
        info!(symbols = ?self.symbols, "Tick feed started");
    }

    async fn run_loop(self: Arc<Self>) {
        while self.running.load(Ordering::Relaxed) {
            match self.connect_and_stream().await {
                Ok(()) => {
                    if !self.running.load(Ordering::Relaxed) {
                        break;
                    }
                    info!("Feed connection closed, reconnecting");
                }
                Err(e) => {
                    if !self.running.load(Ordering::Relaxed) {
                        break;
                    }
                    warn!(error = %e, "Feed connection failed, reconnecting");
                }
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
        self.connected.store(false, Ordering::Release);
    }

    async fn connect_and_stream(&self) -> Result<()> {
        let streams: Vec<String> = self.symbols.iter().map(|s| format!("{}@trade", s)).collect();
        let url = format!("{}?streams={}", self.ws_base_url, streams.join("/"));

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .context("Failed to connect to trade stream")?;
        self.connected.store(true, Ordering::Release);
        info!(symbols = ?self.symbols, "Trade stream connected");

        let (mut write, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }

            match msg {
                Ok(Message::Text(text)) => self.handle_message(&text),
                Ok(Message::Ping(payload)) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Ok(Message::Close(frame)) => {
                    info!(?frame, "Trade stream closed by server");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Trade stream read error");
                    break;
                }
            }
        }

        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn handle_message(&self, raw: &str) {
        let envelope: StreamEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Control/ack frames land here too; not worth more than debug.
                debug!(error = %e, "Unparseable feed message");
                return;
            }
        };

        match envelope.data.into_tick() {
            Ok(tick) => self.handle_tick(tick),
            Err(e) => debug!(error = %e, "Malformed trade event"),
        }
    }

    fn handle_tick(&self, tick: Tick) {
        let persist = {
            let mut buffers = self.buffers.write();
            let Some(buffer) = buffers.get_mut(&tick.symbol) else {
                // Not a configured symbol; ignore.
                return;
            };
            buffer.seen += 1;
            buffer.ticks.push_back(tick.clone());
            while buffer.ticks.len() > self.buffer_capacity {
                buffer.ticks.pop_front();
            }
            buffer.seen % self.persist_every == 0
        };

        // Best-effort fast path; failure falls back to buffer-only reads.
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&tick) {
                debug!(error = %e, "Fast cache write failed");
            }
        }

        if persist {
            if let Err(e) = self.store.insert_tick(&tick) {
                warn!(symbol = %tick.symbol, error = %e, "Tick persistence failed");
            }
        }
    }

    /// Most recent observed price, 0.0 if the symbol has not traded yet.
    /// Non-blocking; never touches I/O.
    pub fn latest_price(&self, symbol: &str) -> f64 {
        self.buffers
            .read()
            .get(symbol)
            .and_then(|b| b.ticks.back())
            .map(|t| t.price)
            .unwrap_or(0.0)
    }

    /// Up to `limit` most recent buffered ticks, oldest first. May return
    /// fewer; never blocks on I/O.
    pub fn recent_ticks(&self, symbol: &str, limit: usize) -> Vec<Tick> {
        let buffers = self.buffers.read();
        let Some(buffer) = buffers.get(symbol) else {
            return Vec::new();
        };
        let skip = buffer.ticks.len().saturating_sub(limit);
        buffer.ticks.iter().skip(skip).cloned().collect()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Stop the feed: flip the running flag, force-close the active
    /// connection, bounded wait for the loop to wind down.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = tokio::time::timeout(self.shutdown_timeout, handle).await;
        }
        self.connected.store(false, Ordering::Release);
        info!("Tick feed stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Config;

    struct FailingCache;

    impl FastCache for FailingCache {
        fn put(&self, _tick: &Tick) -> Result<()> {
            anyhow::bail!("cache down")
        }
        fn latest(&self, _symbol: &str) -> Option<f64> {
            None
        }
    }

    fn test_feed(persist_every: u64, cache: Option<Arc<dyn FastCache>>) -> (Arc<TickFeed>, Arc<BarStore>) {
        let config = Config {
            symbols: vec!["btcusdt".to_string()],
            tick_buffer_capacity: 5,
            persist_every,
            ..Config::default()
        };
        let store = Arc::new(BarStore::open_memory().unwrap());
        let feed = Arc::new(TickFeed::new(&config, store.clone(), cache));
        (feed, store)
    }

    fn trade_json(price: f64, ts_ms: i64) -> String {
        format!(
            r#"{{"stream":"btcusdt@trade","data":{{"e":"trade","E":{ts},"s":"BTCUSDT","t":1,"p":"{p}","q":"0.5","T":{ts},"m":true}}}}"#,
            ts = ts_ms,
            p = price
        )
    }

    #[test]
    fn trade_message_is_normalized() {
        let (feed, _) = test_feed(1, None);
        feed.handle_message(&trade_json(50000.5, 1_700_000_000_000));

        assert_eq!(feed.latest_price("btcusdt"), 50000.5);
        let ticks = feed.recent_ticks("btcusdt", 10);
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol, "btcusdt");
        assert_eq!(ticks[0].ts_ms, 1_700_000_000_000);
        assert_eq!(ticks[0].quantity, 0.5);
    }

    #[test]
    fn control_frames_and_unknown_symbols_are_ignored() {
        let (feed, store) = test_feed(1, None);
        feed.handle_message(r#"{"result":null,"id":1}"#);
        feed.handle_message(&trade_json(1.0, 0).replace("BTCUSDT", "DOGEUSDT"));

        assert_eq!(feed.latest_price("btcusdt"), 0.0);
        assert_eq!(store.tick_count("btcusdt").unwrap(), 0);
    }

    #[test]
    fn buffer_evicts_oldest_beyond_capacity() {
        let (feed, _) = test_feed(1, None);
        for i in 0..8 {
            feed.handle_message(&trade_json(100.0 + i as f64, i * 1000));
        }

        let ticks = feed.recent_ticks("btcusdt", 100);
        assert_eq!(ticks.len(), 5);
        assert_eq!(ticks[0].price, 103.0);
        assert_eq!(feed.latest_price("btcusdt"), 107.0);

        assert_eq!(feed.recent_ticks("btcusdt", 2).len(), 2);
        assert!(feed.recent_ticks("ethusdt", 2).is_empty());
    }

    #[test]
    fn persistence_sampling_writes_every_nth_tick() {
        let (feed, store) = test_feed(2, None);
        for i in 0..10 {
            feed.handle_message(&trade_json(1.0, i * 1000));
        }
        assert_eq!(store.tick_count("btcusdt").unwrap(), 5);
    }

    #[test]
    fn store_failure_does_not_break_the_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("feed.db");
        let store = Arc::new(BarStore::open(db_path.to_str().unwrap()).unwrap());
        let config = Config {
            symbols: vec!["btcusdt".to_string()],
            tick_buffer_capacity: 5,
            persist_every: 1,
            ..Config::default()
        };
        let feed = TickFeed::new(&config, store.clone(), None);

        feed.handle_message(&trade_json(10.0, 1000));
        assert_eq!(store.tick_count("btcusdt").unwrap(), 1);

        // Break the store underneath the feed.
        let saboteur = rusqlite::Connection::open(&db_path).unwrap();
        saboteur.execute("DROP TABLE ticks", []).unwrap();

        // The write fails, the buffer keeps serving reads.
        feed.handle_message(&trade_json(11.0, 2000));
        assert_eq!(feed.latest_price("btcusdt"), 11.0);
        assert_eq!(feed.recent_ticks("btcusdt", 10).len(), 2);
    }

    #[test]
    fn failing_cache_is_non_fatal() {
        let (feed, store) = test_feed(1, Some(Arc::new(FailingCache)));
        feed.handle_message(&trade_json(42.0, 1000));

        assert_eq!(feed.latest_price("btcusdt"), 42.0);
        assert_eq!(store.tick_count("btcusdt").unwrap(), 1);
    }

    #[test]
    fn in_memory_cache_round_trip() {
        let cache = InMemoryCache::default();
        assert_eq!(cache.latest("btcusdt"), None);
        cache
            .put(&Tick {
                symbol: "btcusdt".to_string(),
                ts_ms: 1,
                price: 9.0,
                quantity: 1.0,
            })
            .unwrap();
        assert_eq!(cache.latest("btcusdt"), Some(9.0));
    }
}
