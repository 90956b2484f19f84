//! Push-based metrics reporter: periodically renders a JSON snapshot of
//! [`TradingState`] to stdout, prefixed so log collectors can filter it out.

use crate::domain::state::TradingState;
use crate::infrastructure::observability::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub account_equity_usd: f64,
    pub daily_pnl_usd: f64,
    pub drawdown: f64,
    pub positions_count: usize,
}

pub struct MetricsReporter {
    state: Arc<RwLock<TradingState>>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(state: Arc<RwLock<TradingState>>, metrics: Metrics, interval_seconds: u64) -> Self {
        Self { state, metrics, start_time: Instant::now(), interval: Duration::from_secs(interval_seconds) }
    }

    pub async fn run(self) {
        info!(interval = ?self.interval, "metrics reporter starting");
        loop {
            tokio::time::sleep(self.interval).await;
            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => println!("METRICS_JSON:{json}"),
                    Err(e) => warn!(error = %e, "failed to serialize metrics snapshot"),
                },
                Err(e) => warn!(error = %e, "failed to collect metrics snapshot"),
            }
        }
    }

    async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let state = self.state.read().await;
        let uptime = self.start_time.elapsed().as_secs();

        self.metrics.account_equity_usd.set(state.account_equity);
        self.metrics.daily_pnl_usd.set(state.daily_pnl);
        self.metrics.drawdown_current.set(state.drawdown);
        self.metrics.positions_count.set(state.active_position_count() as f64);
        self.metrics.uptime_seconds.set(uptime as f64);
        for position in state.positions.values().filter(|p| p.is_active) {
            self.metrics.set_position_notional(&position.symbol, position.notional());
        }

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            account_equity_usd: state.account_equity,
            daily_pnl_usd: state.daily_pnl,
            drawdown: state.drawdown,
            positions_count: state.active_position_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_reflects_the_current_state() {
        let mut initial = TradingState::default();
        initial.account_equity = 12_000.0;
        let state = Arc::new(RwLock::new(initial));
        let metrics = Metrics::new().unwrap();
        let reporter = MetricsReporter::new(state, metrics, 60);

        let snapshot = reporter.collect_snapshot().await.unwrap();
        assert_eq!(snapshot.account_equity_usd, 12_000.0);
        assert_eq!(snapshot.positions_count, 0);
    }
}
