//! The candle cache. One `CandleSummary` per symbol, one
//! [`CircularBuffer`] per `(symbol, interval)`, created lazily as data
//! arrives. The outer map is guarded by its own lock; each summary's
//! interval map has its own lock again, and each buffer is
//! self-synchronizing, so a write to `BTCUSDT/1h` never blocks a read
//! of `ETHUSDT/5m`.

use crate::collections::circular_buffer::CircularBuffer;
use crate::domain::candle::Candlestick;
use crate::domain::errors::MarketCacheError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

/// Per-symbol collection of interval buffers, plus bookkeeping
/// timestamps.
pub struct CandleSummary {
    buffers: RwLock<HashMap<String, Arc<CircularBuffer<Candlestick>>>>,
    capacity: usize,
    create_time_ms: AtomicI64,
    update_time_ms: AtomicI64,
}

impl CandleSummary {
    fn new(capacity: usize, now_ms: i64) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            capacity,
            create_time_ms: AtomicI64::new(now_ms),
            update_time_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn create_time_ms(&self) -> i64 {
        self.create_time_ms.load(Ordering::SeqCst)
    }

    pub fn update_time_ms(&self) -> i64 {
        self.update_time_ms.load(Ordering::SeqCst)
    }

    fn buffer(&self, interval: &str) -> Arc<CircularBuffer<Candlestick>> {
        if let Some(b) = self.buffers.read().expect("candle summary lock poisoned").get(interval) {
            return b.clone();
        }
        let mut buffers = self.buffers.write().expect("candle summary lock poisoned");
        buffers
            .entry(interval.to_string())
            .or_insert_with(|| Arc::new(CircularBuffer::new(self.capacity)))
            .clone()
    }

    /// Inserts `candle` into the interval's buffer (creating it if
    /// this is the first candle for the interval) and stamps
    /// `update_time_ms`. Returns the physical index written.
    pub fn create_candle(&self, interval: &str, candle: Candlestick, now_ms: i64) -> usize {
        let idx = self.buffer(interval).insert(candle);
        self.update_time_ms.store(now_ms, Ordering::SeqCst);
        idx
    }

    /// Replaces the candle at `index` within `interval`'s buffer.
    pub fn update_candle(
        &self,
        interval: &str,
        index: usize,
        candle: Candlestick,
        now_ms: i64,
    ) -> Result<(), MarketCacheError> {
        let buffers = self.buffers.read().expect("candle summary lock poisoned");
        let buf = buffers
            .get(interval)
            .ok_or_else(|| MarketCacheError::IntervalNotFound {
                symbol: String::new(),
                interval: interval.to_string(),
            })?;
        buf.update(index, candle);
        self.update_time_ms.store(now_ms, Ordering::SeqCst);
        Ok(())
    }

    /// Returns the buffer for `interval`, or `IntervalNotFound`.
    pub fn candles(&self, interval: &str) -> Result<Arc<CircularBuffer<Candlestick>>, MarketCacheError> {
        self.buffers
            .read()
            .expect("candle summary lock poisoned")
            .get(interval)
            .cloned()
            .ok_or_else(|| MarketCacheError::IntervalNotFound {
                symbol: String::new(),
                interval: interval.to_string(),
            })
    }
}

/// Symbol -> [`CandleSummary`] map, the top-level candle cache.
pub struct MarketCache {
    symbols: RwLock<HashMap<String, Arc<CandleSummary>>>,
    capacity: usize,
}

impl MarketCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            symbols: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Returns the existing summary for `symbol`, or `SymbolNotFound`.
    pub fn candle_summary(&self, symbol: &str) -> Result<Arc<CandleSummary>, MarketCacheError> {
        self.symbols
            .read()
            .expect("market cache lock poisoned")
            .get(symbol)
            .cloned()
            .ok_or_else(|| MarketCacheError::SymbolNotFound {
                symbol: symbol.to_string(),
            })
    }

    /// Returns the summary for `symbol`, creating it on first use.
    pub fn update_summary(&self, symbol: &str, now_ms: i64) -> Arc<CandleSummary> {
        if let Some(s) = self.symbols.read().expect("market cache lock poisoned").get(symbol) {
            return s.clone();
        }
        let mut symbols = self.symbols.write().expect("market cache lock poisoned");
        symbols
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(CandleSummary::new(self.capacity, now_ms)))
            .clone()
    }

    pub fn create_candle(
        &self,
        symbol: &str,
        interval: &str,
        candle: Candlestick,
        now_ms: i64,
    ) -> usize {
        self.update_summary(symbol, now_ms)
            .create_candle(interval, candle, now_ms)
    }

    pub fn update_candle(
        &self,
        symbol: &str,
        interval: &str,
        index: usize,
        candle: Candlestick,
        now_ms: i64,
    ) -> Result<(), MarketCacheError> {
        self.candle_summary(symbol)?
            .update_candle(interval, index, candle, now_ms)
            .map_err(|_| MarketCacheError::IntervalNotFound {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
            })
    }

    pub fn candles(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<Arc<CircularBuffer<Candlestick>>, MarketCacheError> {
        self.candle_summary(symbol)?
            .candles(interval)
            .map_err(|_| MarketCacheError::IntervalNotFound {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
            })
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols
            .read()
            .expect("market cache lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: &str) -> Candlestick {
        Candlestick {
            open_time_ms: 1_000,
            close_time_ms: 2_000,
            open: "100".to_string(),
            high: "110".to_string(),
            low: "95".to_string(),
            close: close.to_string(),
            volume: "10".to_string(),
        }
    }

    #[test]
    fn candle_summary_is_not_found_before_first_write() {
        let cache = MarketCache::new(100);
        assert!(matches!(
            cache.candle_summary("BTCUSDT"),
            Err(MarketCacheError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn create_candle_sets_tail_to_the_inserted_candle() {
        let cache = MarketCache::new(100);
        let c = candle("105");
        cache.create_candle("BTCUSDT", "1h", c.clone(), 1_700_000_000_000);

        let buf = cache.candles("BTCUSDT", "1h").unwrap();
        assert_eq!(buf.tail().0, Some(c));
    }

    #[test]
    fn update_candle_replaces_slot_in_place() {
        let cache = MarketCache::new(100);
        let idx = cache.create_candle("BTCUSDT", "1h", candle("105"), 1);
        cache
            .update_candle("BTCUSDT", "1h", idx, candle("106"), 2)
            .unwrap();

        let buf = cache.candles("BTCUSDT", "1h").unwrap();
        assert_eq!(buf.tail().0, Some(candle("106")));
    }

    #[test]
    fn update_time_is_monotonic_non_decreasing() {
        let cache = MarketCache::new(100);
        cache.create_candle("BTCUSDT", "1h", candle("1"), 100);
        let summary = cache.candle_summary("BTCUSDT").unwrap();
        assert_eq!(summary.update_time_ms(), 100);
        cache.create_candle("BTCUSDT", "1h", candle("2"), 200);
        assert_eq!(summary.update_time_ms(), 200);
    }

    #[test]
    fn unknown_interval_is_reported() {
        let cache = MarketCache::new(100);
        cache.create_candle("BTCUSDT", "1h", candle("1"), 1);
        assert!(matches!(
            cache.candles("BTCUSDT", "5m"),
            Err(MarketCacheError::IntervalNotFound { .. })
        ));
    }

    #[test]
    fn buffer_length_never_exceeds_configured_limit() {
        let cache = MarketCache::new(3);
        for i in 0..10 {
            cache.create_candle("BTCUSDT", "1h", candle(&i.to_string()), i);
        }
        let buf = cache.candles("BTCUSDT", "1h").unwrap();
        assert_eq!(buf.len(), 3);
    }
}
