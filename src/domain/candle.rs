//! Candlestick and derived-indicator types.
//!
//! Prices are kept as the decimal strings the exchange sends so that no
//! precision is lost on the wire; callers parse to `f64` when doing
//! arithmetic, and every stage downstream (indicators, scoring, order
//! sizing) works in `f64` too.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CandleError {
    #[error("candle has non-numeric price field: {0}")]
    BadPrice(String),
    #[error("candle invariant violated: {0}")]
    InvalidOhlc(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candlestick {
    pub open_time_ms: i64,
    pub close_time_ms: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
}

impl Candlestick {
    pub fn open_f64(&self) -> Result<f64, CandleError> {
        parse(&self.open)
    }
    pub fn high_f64(&self) -> Result<f64, CandleError> {
        parse(&self.high)
    }
    pub fn low_f64(&self) -> Result<f64, CandleError> {
        parse(&self.low)
    }
    pub fn close_f64(&self) -> Result<f64, CandleError> {
        parse(&self.close)
    }
    pub fn volume_f64(&self) -> Result<f64, CandleError> {
        parse(&self.volume)
    }

    /// Checks `low <= min(open, close) <= max(open, close) <= high` and
    /// `close_time_ms > open_time_ms`.
    pub fn validate(&self) -> Result<(), CandleError> {
        let (o, h, l, c) = (
            self.open_f64()?,
            self.high_f64()?,
            self.low_f64()?,
            self.close_f64()?,
        );
        let body_lo = o.min(c);
        let body_hi = o.max(c);
        if !(l <= body_lo && body_hi <= h) {
            return Err(CandleError::InvalidOhlc(format!(
                "low={l} high={h} open={o} close={c}"
            )));
        }
        if self.close_time_ms <= self.open_time_ms {
            return Err(CandleError::InvalidOhlc(format!(
                "close_time_ms {} <= open_time_ms {}",
                self.close_time_ms, self.open_time_ms
            )));
        }
        Ok(())
    }
}

fn parse(s: &str) -> Result<f64, CandleError> {
    s.parse::<f64>()
        .map_err(|_| CandleError::BadPrice(s.to_string()))
}

/// Stochastic-family oscillator reading for a single interval.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Stoch {
    pub rsi: f64,
    pub k: f64,
    pub d: f64,
}

/// Per-symbol mapping of interval -> oscillator reading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Oscillator {
    pub symbol: String,
    pub readings: std::collections::HashMap<String, Stoch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(o: &str, h: &str, l: &str, c: &str) -> Candlestick {
        Candlestick {
            open_time_ms: 1_000,
            close_time_ms: 2_000,
            open: o.to_string(),
            high: h.to_string(),
            low: l.to_string(),
            close: c.to_string(),
            volume: "10".to_string(),
        }
    }

    #[test]
    fn valid_ohlc_passes() {
        assert!(candle("100", "110", "95", "105").validate().is_ok());
    }

    #[test]
    fn high_below_body_fails() {
        assert!(candle("100", "101", "95", "105").validate().is_err());
    }

    #[test]
    fn low_above_body_fails() {
        assert!(candle("100", "110", "99", "105").validate().is_err());
    }

    #[test]
    fn close_time_must_exceed_open_time() {
        let mut c = candle("100", "110", "95", "105");
        c.close_time_ms = c.open_time_ms;
        assert!(c.validate().is_err());
    }

    #[test]
    fn non_numeric_price_is_rejected() {
        let c = candle("nan-ish", "110", "95", "105");
        assert!(c.validate().is_err());
    }
}
