//! Process-wide, persistable trading state.

use crate::domain::orders::{CompletedTrade, PendingOrder, Position};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemStatus {
    Active,
    Paused,
    Emergency,
    Maintenance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub max_positions: usize,
    pub daily_loss_limit: f64,
    pub current_daily_loss: f64,
    pub win_rate: f64,
    pub exposure_ratio: f64,
    pub position_count: usize,
}

impl Default for RiskMetrics {
    fn default() -> Self {
        Self {
            max_positions: 5,
            daily_loss_limit: 1000.0,
            current_daily_loss: 0.0,
            win_rate: 0.0,
            exposure_ratio: 0.0,
            position_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingState {
    pub positions: HashMap<String, Position>,
    pub pending_orders: HashMap<String, PendingOrder>,
    pub trading_history: Vec<CompletedTrade>,
    pub risk_metrics: RiskMetrics,
    pub system_status: SystemStatus,
    pub total_pnl: f64,
    pub daily_pnl: f64,
    pub drawdown: f64,
    pub max_drawdown: f64,
    pub account_equity: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for TradingState {
    fn default() -> Self {
        Self {
            positions: HashMap::new(),
            pending_orders: HashMap::new(),
            trading_history: Vec::new(),
            risk_metrics: RiskMetrics::default(),
            system_status: SystemStatus::Active,
            total_pnl: 0.0,
            daily_pnl: 0.0,
            drawdown: 0.0,
            max_drawdown: 0.0,
            account_equity: 0.0,
            last_updated: Utc::now(),
        }
    }
}

impl TradingState {
    /// `sum(trading_history[*].realized_pnl) == total_pnl`.
    pub fn record_trade(&mut self, trade: CompletedTrade, now: DateTime<Utc>) {
        self.total_pnl += trade.realized_pnl;
        self.daily_pnl += trade.realized_pnl;
        self.trading_history.push(trade);
        self.last_updated = now;
    }

    pub fn active_position_count(&self) -> usize {
        self.positions.values().filter(|p| p.is_active).count()
    }

    /// Invariant check: `sum(history realized_pnl) == total_pnl`.
    pub fn invariant_total_pnl_matches_history(&self) -> bool {
        let sum: f64 = self.trading_history.iter().map(|t| t.realized_pnl).sum();
        (sum - self.total_pnl).abs() < 1e-6
    }
}
