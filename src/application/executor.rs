//! Consumes `approved-orders`, deduplicates and sizes a bracket
//! order, submits it as a batch, and unwinds the entry if the
//! take-profit/stop-loss legs fail to place.

use crate::collections::queue::MessageQueue;
use crate::collections::worker_pool::{Poller, WorkerPool, WorkerPoolConfig};
use crate::domain::errors::{QueueError, TradingError};
use crate::domain::orders::{OrderSide, OrderType, PositionSide};
use crate::domain::ports::{ExchangeClient, OrderRequest};
use crate::domain::signal::{DecisionAction, TradingDecision};
use crate::domain::symbol::Symbol;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

const GROUP: &str = "executor";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub trading_cost: f64,
    pub desired_pnl_long: f64,
    pub desired_pnl_loss: f64,
    pub entry_nudge_pct: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            trading_cost: 100.0,
            desired_pnl_long: 0.02,
            desired_pnl_loss: 0.01,
            entry_nudge_pct: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Appraisal {
    pub entry: f64,
    pub quantity: f64,
    pub profit: f64,
    pub loss: f64,
}

/// `entry` is the extremum of the last two candles, nudged away from
/// the current price by `entry_nudge_pct` if the current price has
/// already crossed it; `quantity = trading_cost * leverage / entry`;
/// profit/loss scale linearly in quantity.
pub fn appraise(
    side: PositionSide,
    last_two_closes: (f64, f64),
    current_price: f64,
    leverage: u32,
    config: &ExecutorConfig,
) -> Appraisal {
    let (prev, last) = last_two_closes;
    let mut entry = match side {
        PositionSide::Long => prev.min(last),
        PositionSide::Short => prev.max(last),
    };
    let crossed = match side {
        PositionSide::Long => current_price <= entry,
        PositionSide::Short => current_price >= entry,
    };
    if crossed {
        entry = match side {
            PositionSide::Long => current_price * (1.0 + config.entry_nudge_pct),
            PositionSide::Short => current_price * (1.0 - config.entry_nudge_pct),
        };
    }

    let quantity = config.trading_cost * leverage as f64 / entry;
    let profit = quantity * config.desired_pnl_long;
    let loss = quantity * config.desired_pnl_loss;
    Appraisal { entry, quantity, profit, loss }
}

fn side_from_rsi(rsi: f64) -> Option<PositionSide> {
    if rsi >= 70.0 {
        Some(PositionSide::Short)
    } else if rsi <= 30.0 {
        Some(PositionSide::Long)
    } else {
        None
    }
}

pub fn build_bracket_orders(
    symbol: &Symbol,
    side: PositionSide,
    appraisal: &Appraisal,
    include_stop_loss: bool,
) -> Vec<OrderRequest> {
    let order_side = match side {
        PositionSide::Long => OrderSide::Buy,
        PositionSide::Short => OrderSide::Sell,
    };
    let closing_side = match order_side {
        OrderSide::Buy => OrderSide::Sell,
        OrderSide::Sell => OrderSide::Buy,
    };

    let entry_price = symbol.round_to_tick(appraisal.entry);
    let quantity = symbol.round_to_step_size(appraisal.quantity);
    let tp_price = symbol.round_to_tick(match side {
        PositionSide::Long => appraisal.entry + appraisal.profit,
        PositionSide::Short => appraisal.entry - appraisal.profit,
    });
    let sl_price = symbol.round_to_tick(match side {
        PositionSide::Long => appraisal.entry - appraisal.loss,
        PositionSide::Short => appraisal.entry + appraisal.loss,
    });

    let mut orders = vec![
        OrderRequest {
            symbol: symbol.symbol.clone(),
            side: order_side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(entry_price),
            stop_price: None,
        },
        OrderRequest {
            symbol: symbol.symbol.clone(),
            side: closing_side,
            order_type: OrderType::TakeProfitMarket,
            quantity,
            price: None,
            stop_price: Some(tp_price),
        },
    ];
    if include_stop_loss {
        orders.push(OrderRequest {
            symbol: symbol.symbol.clone(),
            side: closing_side,
            order_type: OrderType::StopMarket,
            quantity,
            price: None,
            stop_price: Some(sl_price),
        });
    }
    orders
}

struct ExecutorScanner {
    approved: Arc<MessageQueue<TradingDecision>>,
    client: Arc<dyn ExchangeClient>,
    config: ExecutorConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl ExecutorScanner {
    async fn execute_one(&self, decision: &TradingDecision) -> anyhow::Result<()> {
        if !self.in_flight.lock().expect("executor lock poisoned").insert(decision.symbol.clone()) {
            info!(symbol = %decision.symbol, "duplicate order for symbol already in flight, skipping");
            return Ok(());
        }
        let result = self.execute_inner(decision).await;
        self.in_flight.lock().expect("executor lock poisoned").remove(&decision.symbol);
        result
    }

    async fn execute_inner(&self, decision: &TradingDecision) -> anyhow::Result<()> {
        if let Some(existing) = self.client.position_risk(&decision.symbol).await? {
            if existing.is_active && existing.size.abs() > 0.0 {
                info!(symbol = %decision.symbol, "existing open position, skipping");
                return Ok(());
            }
        }

        let rsi = decision
            .metadata
            .get("rsi")
            .and_then(|v| v.as_f64())
            .unwrap_or(if matches!(decision.action, DecisionAction::Buy) { 25.0 } else { 75.0 });
        let Some(side) = side_from_rsi(rsi) else {
            return Err(TradingError::InvalidInput {
                reason: format!("rsi {rsi} is not in an actionable band"),
            }
            .into());
        };

        let leverage = decision
            .metadata
            .get("leverage")
            .and_then(|v| v.as_u64())
            .unwrap_or(5) as u32;
        let current_price = self.client.get_current_price(&decision.symbol).await?;
        let candles = self.client.get_candlesticks(&decision.symbol, "1h", 2).await?;
        if candles.len() < 2 {
            return Err(TradingError::InvalidInput {
                reason: "not enough candle history to appraise entry".to_string(),
            }
            .into());
        }
        let last_two = (candles[0].close_f64()?, candles[1].close_f64()?);
        let appraisal = appraise(side, last_two, current_price, leverage, &self.config);

        let exchange_info = self.client.get_exchange_info().await?;
        let Some(symbol) = exchange_info.into_iter().find(|s| s.symbol == decision.symbol) else {
            return Err(TradingError::InvalidInput {
                reason: format!("symbol {} not found in exchange info", decision.symbol),
            }
            .into());
        };

        let orders = build_bracket_orders(&symbol, side, &appraisal, true);
        let order_ids = self.client.place_batch_orders(orders).await?;

        if order_ids.len() < 2 {
            warn!(symbol = %decision.symbol, "bracket placement incomplete, cancelling entry");
            if let Some(entry_id) = order_ids.first() {
                let _ = self.client.cancel_order(&decision.symbol, entry_id).await;
            }
            return Err(TradingError::ExecutionFailed {
                reason: "take-profit/stop-loss leg failed to place".to_string(),
            }
            .into());
        }

        info!(symbol = %decision.symbol, order_count = order_ids.len(), "bracket order submitted");
        Ok(())
    }
}

#[async_trait]
impl Poller for ExecutorScanner {
    async fn poll(&self, _idx: usize) -> anyhow::Result<()> {
        loop {
            let delivery = match self.approved.consume(super::risk_checker::APPROVED_ORDERS_TOPIC, GROUP).await {
                Ok(d) => d,
                Err(QueueError::NoMessage | QueueError::MustCommitBeforeConsuming) => return Ok(()),
            };
            if let Err(e) = self.execute_one(&delivery.data).await {
                error!(symbol = %delivery.data.symbol, error = %e, "order execution failed");
            }
            self.approved.commit(super::risk_checker::APPROVED_ORDERS_TOPIC, GROUP, delivery.offset).await;
        }
    }
}

pub struct Executor {
    pool: Arc<WorkerPool<()>>,
}

impl Executor {
    pub async fn start(
        approved: Arc<MessageQueue<TradingDecision>>,
        client: Arc<dyn ExchangeClient>,
        config: ExecutorConfig,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig {
            num_process: 0,
            num_polling: 1,
            polling_backoff: Duration::from_secs(1),
            ..Default::default()
        }));
        let scanner = Arc::new(ExecutorScanner {
            approved,
            client,
            config,
            in_flight: Mutex::new(HashSet::new()),
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
