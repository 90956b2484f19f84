//! RSI(14) via the `ta` crate and KDJ(9,3,3) computed from a
//! chronologically ordered candle slice.

use crate::domain::candle::Candlestick;
use ta::indicators::RelativeStrengthIndex;
use ta::Next;

/// Feeds the whole close history through a freshly seeded
/// [`RelativeStrengthIndex`] and returns its value after the last
/// close. `None` if there aren't enough candles to seed the period.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 {
        return None;
    }
    let mut rsi = RelativeStrengthIndex::new(period).ok()?;
    let mut value = 0.0;
    for &close in closes {
        value = rsi.next(close);
    }
    Some(value)
}

/// `K = RMA(rsv, k_period)`, `D = RMA(K, d_period)`, seeded at 50 as is
/// conventional for stochastic oscillators with no prior history.
/// `None` if there are fewer than `rsv_period` candles.
pub fn kdj(candles: &[Candlestick], rsv_period: usize, k_period: usize, d_period: usize) -> Option<(f64, f64)> {
    if candles.len() < rsv_period {
        return None;
    }
    let highs: Vec<f64> = candles.iter().map(|c| c.high_f64().unwrap_or(0.0)).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low_f64().unwrap_or(0.0)).collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close_f64().unwrap_or(0.0)).collect();

    let mut k = 50.0_f64;
    let mut d = 50.0_f64;
    for i in (rsv_period - 1)..candles.len() {
        let window_hi = highs[i + 1 - rsv_period..=i].iter().cloned().fold(f64::MIN, f64::max);
        let window_lo = lows[i + 1 - rsv_period..=i].iter().cloned().fold(f64::MAX, f64::min);
        let range = window_hi - window_lo;
        let rsv = if range > 0.0 {
            (closes[i] - window_lo) / range * 100.0
        } else {
            50.0
        };
        k = (k * (k_period - 1) as f64 + rsv) / k_period as f64;
        d = (d * (d_period - 1) as f64 + k) / d_period as f64;
    }
    Some((k, d))
}

pub fn j_line(k: f64, d: f64) -> f64 {
    3.0 * k - 2.0 * d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(h: f64, l: f64, c: f64) -> Candlestick {
        Candlestick {
            open_time_ms: 0,
            close_time_ms: 1,
            open: c.to_string(),
            high: h.to_string(),
            low: l.to_string(),
            close: c.to_string(),
            volume: "1".to_string(),
        }
    }

    #[test]
    fn rsi_is_100_when_there_are_no_losses() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, 14), Some(100.0));
    }

    #[test]
    fn rsi_is_low_on_a_steady_decline() {
        let closes: Vec<f64> = (0..20).map(|i| 200.0 - i as f64).collect();
        let value = rsi(&closes, 14).unwrap();
        assert!(value < 30.0, "expected oversold rsi, got {value}");
    }

    #[test]
    fn rsi_needs_at_least_period_plus_one_candles() {
        let closes = vec![100.0; 10];
        assert_eq!(rsi(&closes, 14), None);
    }

    #[test]
    fn kdj_drops_on_a_steady_decline() {
        let candles: Vec<Candlestick> = (0..20)
            .map(|i| {
                let px = 200.0 - i as f64;
                candle(px + 1.0, px - 1.0, px)
            })
            .collect();
        let (k, d) = kdj(&candles, 9, 3, 3).unwrap();
        assert!(k < 50.0 && d < 50.0, "k={k} d={d}");
    }

    #[test]
    fn j_line_formula() {
        assert_eq!(j_line(60.0, 40.0), 100.0);
    }
}
