//! Exchange symbol metadata (perpetual USDT-margined contracts).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SymbolFilters {
    pub tick_size: f64,
    pub step_size: f64,
    pub min_notional: f64,
    pub percent_price_up: f64,
    pub percent_price_down: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub symbol: String,
    pub pair: String,
    pub margin_asset: String,
    pub base_asset: String,
    pub filters: SymbolFilters,
}

impl Symbol {
    /// `true` for perpetual USDT-margined symbols whose name has no
    /// underscore and isn't blacklisted.
    pub fn is_eligible(&self, blacklist: &std::collections::HashSet<String>) -> bool {
        self.margin_asset == "USDT"
            && !self.symbol.contains('_')
            && !blacklist.contains(&self.symbol)
    }

    /// Rounds a price down to the nearest `tick_size` multiple.
    pub fn round_to_tick(&self, price: f64) -> f64 {
        round_to_step(price, self.filters.tick_size)
    }

    /// Rounds a quantity down to the nearest `step_size` multiple.
    pub fn round_to_step_size(&self, qty: f64) -> f64 {
        round_to_step(qty, self.filters.step_size)
    }
}

fn round_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sym(name: &str, margin: &str) -> Symbol {
        Symbol {
            symbol: name.to_string(),
            pair: name.to_string(),
            margin_asset: margin.to_string(),
            base_asset: name.trim_end_matches("USDT").to_string(),
            filters: SymbolFilters {
                tick_size: 0.1,
                step_size: 0.001,
                min_notional: 5.0,
                percent_price_up: 1.1,
                percent_price_down: 0.9,
            },
        }
    }

    #[test]
    fn excludes_non_usdt_margin() {
        let s = sym("BTCBUSD", "BUSD");
        assert!(!s.is_eligible(&HashSet::new()));
    }

    #[test]
    fn excludes_underscore_names() {
        let s = sym("BTCUSDT_240329", "USDT");
        assert!(!s.is_eligible(&HashSet::new()));
    }

    #[test]
    fn excludes_blacklisted() {
        let s = sym("BTCUSDT", "USDT");
        let mut bl = HashSet::new();
        bl.insert("BTCUSDT".to_string());
        assert!(!s.is_eligible(&bl));
    }

    #[test]
    fn accepts_plain_usdt_perp() {
        let s = sym("ETHUSDT", "USDT");
        assert!(s.is_eligible(&HashSet::new()));
    }

    #[test]
    fn rounds_price_to_tick() {
        let s = sym("ETHUSDT", "USDT");
        assert!((s.round_to_tick(45123.37) - 45123.3).abs() < 1e-9);
    }
}
