//! Prometheus metric definitions for perpbot.
//!
//! All metrics use the `perpbot_` prefix and are push-only: there is no
//! HTTP server here, only outbound structured logs (see [`super::reporter`]).

use prometheus::{
    CounterVec, Gauge, GaugeVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub account_equity_usd: GenericGauge<AtomicF64>,
    pub daily_pnl_usd: GenericGauge<AtomicF64>,
    pub drawdown_current: GenericGauge<AtomicF64>,
    pub positions_count: GenericGauge<AtomicF64>,
    pub position_notional_usd: GenericGaugeVec<AtomicF64>,
    pub signals_total: CounterVec,
    pub decisions_total: CounterVec,
    pub orders_total: CounterVec,
    pub circuit_breaker_open: GenericGaugeVec<AtomicF64>,
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let account_equity_usd =
            Gauge::with_opts(Opts::new("perpbot_account_equity_usd", "Account equity in USD"))?;
        registry.register(Box::new(account_equity_usd.clone()))?;

        let daily_pnl_usd = Gauge::with_opts(Opts::new("perpbot_daily_pnl_usd", "Realized P&L today in USD"))?;
        registry.register(Box::new(daily_pnl_usd.clone()))?;

        let drawdown_current =
            Gauge::with_opts(Opts::new("perpbot_drawdown_current", "Current drawdown fraction (0-1)"))?;
        registry.register(Box::new(drawdown_current.clone()))?;

        let positions_count =
            Gauge::with_opts(Opts::new("perpbot_positions_count", "Number of open positions"))?;
        registry.register(Box::new(positions_count.clone()))?;

        let position_notional_usd = GaugeVec::new(
            Opts::new("perpbot_position_notional_usd", "Notional exposure per symbol"),
            &["symbol"],
        )?;
        registry.register(Box::new(position_notional_usd.clone()))?;

        let signals_total = CounterVec::new(
            Opts::new("perpbot_signals_total", "Signals emitted by the analyzer"),
            &["symbol", "action"],
        )?;
        registry.register(Box::new(signals_total.clone()))?;

        let decisions_total = CounterVec::new(
            Opts::new("perpbot_decisions_total", "Trading decisions scored"),
            &["action"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("perpbot_orders_total", "Orders submitted by side and outcome"),
            &["side", "outcome"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let circuit_breaker_open = GaugeVec::new(
            Opts::new("perpbot_circuit_breaker_open", "1 if the named breaker is open, else 0"),
            &["rule"],
        )?;
        registry.register(Box::new(circuit_breaker_open.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new("perpbot_uptime_seconds", "Process uptime in seconds"))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            account_equity_usd,
            daily_pnl_usd,
            drawdown_current,
            positions_count,
            position_notional_usd,
            signals_total,
            decisions_total,
            orders_total,
            circuit_breaker_open,
            uptime_seconds,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode_to_string(&families).unwrap_or_default()
    }

    pub fn set_position_notional(&self, symbol: &str, value: f64) {
        self.position_notional_usd.with_label_values(&[symbol]).set(value);
    }

    pub fn inc_signal(&self, symbol: &str, action: &str) {
        self.signals_total.with_label_values(&[symbol, action]).inc();
    }

    pub fn inc_decision(&self, action: &str) {
        self.decisions_total.with_label_values(&[action]).inc();
    }

    pub fn inc_order(&self, side: &str, outcome: &str) {
        self.orders_total.with_label_values(&[side, outcome]).inc();
    }

    pub fn set_breaker(&self, rule: &str, open: bool) {
        self.circuit_breaker_open.with_label_values(&[rule]).set(if open { 1.0 } else { 0.0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_render_with_the_package_prefix() {
        let metrics = Metrics::new().unwrap();
        assert!(metrics.render().contains("perpbot_"));
    }

    #[test]
    fn per_symbol_notional_is_labeled() {
        let metrics = Metrics::new().unwrap();
        metrics.set_position_notional("BTCUSDT", 5000.0);
        let output = metrics.render();
        assert!(output.contains("BTCUSDT"));
        assert!(output.contains("5000"));
    }
}
