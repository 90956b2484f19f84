//! A ticker-driven consumer on `decisions` that approves or
//! rejects each one against an eight-condition gate, pushing approvals
//! to `approved-orders`.

use crate::application::guard::Guard;
use crate::collections::queue::MessageQueue;
use crate::collections::worker_pool::{Poller, WorkerPool, WorkerPoolConfig};
use crate::domain::errors::QueueError;
use crate::domain::signal::{DecisionAction, TradingDecision};
use crate::domain::state::{SystemStatus, TradingState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::info;

pub const APPROVED_ORDERS_TOPIC: &str = "approved-orders";
const GROUP: &str = "risk-checker";

#[derive(Debug, Clone)]
pub struct RiskCheckerConfig {
    pub max_positions: usize,
    pub daily_loss_limit: f64,
    pub entry_confidence_min: f64,
    pub close_confidence_min: f64,
    pub max_exposure_fraction: f64,
    pub max_same_base_positions: usize,
    pub size_min: f64,
    pub size_max: f64,
}

impl Default for RiskCheckerConfig {
    fn default() -> Self {
        Self {
            max_positions: 5,
            daily_loss_limit: 1000.0,
            entry_confidence_min: 0.6,
            close_confidence_min: 0.4,
            max_exposure_fraction: 0.8,
            max_same_base_positions: 2,
            size_min: 0.001,
            size_max: 10.0,
        }
    }
}

fn is_entry(action: DecisionAction) -> bool {
    matches!(action, DecisionAction::Buy | DecisionAction::Sell)
}

/// Pure function implementing the eight rules. Returns the first
/// violated rule's name, or `None` if every rule passes.
pub fn check_decision(
    decision: &TradingDecision,
    state: &TradingState,
    guard: &Guard,
    config: &RiskCheckerConfig,
) -> Result<(), &'static str> {
    if state.system_status != SystemStatus::Active {
        return Err("system_not_active");
    }
    if is_entry(decision.action) && state.active_position_count() >= config.max_positions {
        return Err("max_positions");
    }
    if !(config.size_min..=config.size_max).contains(&decision.size) {
        return Err("size_out_of_range");
    }
    if is_entry(decision.action) && -state.daily_pnl >= config.daily_loss_limit * 0.8 {
        return Err("daily_loss_near_limit");
    }
    let confidence_floor = if is_entry(decision.action) {
        config.entry_confidence_min
    } else {
        config.close_confidence_min
    };
    if decision.confidence < confidence_floor {
        return Err("confidence_below_floor");
    }
    if guard.any_breaker_open() {
        return Err("circuit_breaker_open");
    }
    let total_exposure: f64 = state.positions.values().filter(|p| p.is_active).map(|p| p.notional()).sum();
    let prospective = decision.price * decision.size;
    if total_exposure + prospective > state.account_equity * config.max_exposure_fraction {
        return Err("exposure_limit");
    }
    let base = decision.symbol.get(..3.min(decision.symbol.len())).unwrap_or(&decision.symbol);
    let same_base = state
        .positions
        .values()
        .filter(|p| p.is_active && p.symbol.starts_with(base))
        .count();
    if is_entry(decision.action) && same_base >= config.max_same_base_positions {
        return Err("same_base_limit");
    }
    Ok(())
}

struct RiskScanner {
    decisions: Arc<MessageQueue<TradingDecision>>,
    approved: Arc<MessageQueue<TradingDecision>>,
    state: Arc<AsyncRwLock<TradingState>>,
    guard: Arc<Guard>,
    config: RiskCheckerConfig,
}

#[async_trait]
impl Poller for RiskScanner {
    async fn poll(&self, _idx: usize) -> anyhow::Result<()> {
        loop {
            let delivery = match self.decisions.consume(super::decision_maker::DECISIONS_TOPIC, GROUP).await {
                Ok(d) => d,
                Err(QueueError::NoMessage | QueueError::MustCommitBeforeConsuming) => return Ok(()),
            };
            let state = self.state.read().await;
            match check_decision(&delivery.data, &state, &self.guard, &self.config) {
                Ok(()) => {
                    drop(state);
                    self.approved.push(APPROVED_ORDERS_TOPIC, delivery.data.clone(), None).await;
                }
                Err(reason) => {
                    info!(symbol = %delivery.data.symbol, reason, "decision rejected by risk checker");
                }
            }
            self.decisions.commit(super::decision_maker::DECISIONS_TOPIC, GROUP, delivery.offset).await;
        }
    }
}

pub struct RiskChecker {
    pool: Arc<WorkerPool<()>>,
}

impl RiskChecker {
    pub async fn start(
        decisions: Arc<MessageQueue<TradingDecision>>,
        approved: Arc<MessageQueue<TradingDecision>>,
        state: Arc<AsyncRwLock<TradingState>>,
        guard: Arc<Guard>,
        config: RiskCheckerConfig,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig {
            num_process: 0,
            num_polling: 1,
            polling_backoff: Duration::from_secs(2),
            ..Default::default()
        }));
        let scanner = Arc::new(RiskScanner {
            decisions,
            approved,
            state,
            guard,
            config,
        });
        pool.start(Arc::new(NoopProcessor), Some(scanner)).await;
        Self { pool }
    }

    pub async fn stop(&self) {
        self.pool.stop().await;
    }
}

struct NoopProcessor;
#[async_trait]
impl crate::collections::worker_pool::JobProcessor<()> for NoopProcessor {
    async fn process(&self, _message: ()) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn decision(action: DecisionAction, confidence: f64, size: f64, symbol: &str) -> TradingDecision {
        TradingDecision {
            symbol: symbol.to_string(),
            action,
            size,
            price: 100.0,
            confidence,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    fn active_state() -> TradingState {
        let mut s = TradingState::default();
        s.account_equity = 100_000.0;
        s
    }

    #[test]
    fn low_confidence_entry_is_rejected() {
        let guard = Guard::new(crate::application::guard::GuardConfig::default(), Arc::new(crate::domain::ports::NullNotifier));
        let state = active_state();
        let d = decision(DecisionAction::Buy, 0.5, 1.0, "BTCUSDT");
        assert_eq!(
            check_decision(&d, &state, &guard, &RiskCheckerConfig::default()),
            Err("confidence_below_floor")
        );
    }

    #[test]
    fn size_outside_bounds_is_rejected() {
        let guard = Guard::new(crate::application::guard::GuardConfig::default(), Arc::new(crate::domain::ports::NullNotifier));
        let state = active_state();
        let d = decision(DecisionAction::Buy, 0.9, 20.0, "BTCUSDT");
        assert_eq!(
            check_decision(&d, &state, &guard, &RiskCheckerConfig::default()),
            Err("size_out_of_range")
        );
    }

    #[test]
    fn system_not_active_is_rejected() {
        let guard = Guard::new(crate::application::guard::GuardConfig::default(), Arc::new(crate::domain::ports::NullNotifier));
        let mut state = active_state();
        state.system_status = SystemStatus::Emergency;
        let d = decision(DecisionAction::Buy, 0.9, 1.0, "BTCUSDT");
        assert_eq!(
            check_decision(&d, &state, &guard, &RiskCheckerConfig::default()),
            Err("system_not_active")
        );
    }

    #[test]
    fn well_formed_entry_is_approved() {
        let guard = Guard::new(crate::application::guard::GuardConfig::default(), Arc::new(crate::domain::ports::NullNotifier));
        let state = active_state();
        let d = decision(DecisionAction::Buy, 0.9, 1.0, "BTCUSDT");
        assert_eq!(check_decision(&d, &state, &guard, &RiskCheckerConfig::default()), Ok(()));
    }
}
