//! Owner of the process-wide [`TradingState`]. Listeners are notified
//! of every mutation, but dispatched outside the state lock: the state
//! manager serializes each change onto a per-listener mailbox so a
//! slow or re-entrant listener can never deadlock the writer.

use crate::domain::orders::CompletedTrade;
use crate::domain::state::TradingState;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

#[derive(Debug, Clone)]
pub enum StateEvent {
    TradeRecorded(CompletedTrade),
    StatusChanged(crate::domain::state::SystemStatus),
}

pub struct StateManager {
    state: Arc<RwLock<TradingState>>,
    listeners: RwLock<Vec<mpsc::Sender<StateEvent>>>,
}

impl StateManager {
    pub fn new(initial: TradingState) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn handle(&self) -> Arc<RwLock<TradingState>> {
        self.state.clone()
    }

    /// Registers a mailbox that receives every future [`StateEvent`].
    pub async fn subscribe(&self, capacity: usize) -> mpsc::Receiver<StateEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.listeners.write().await.push(tx);
        rx
    }

    pub async fn record_trade(&self, trade: CompletedTrade) {
        {
            let mut state = self.state.write().await;
            state.record_trade(trade.clone(), Utc::now());
        }
        self.dispatch(StateEvent::TradeRecorded(trade)).await;
    }

    pub async fn set_status(&self, status: crate::domain::state::SystemStatus) {
        {
            let mut state = self.state.write().await;
            state.system_status = status;
            state.last_updated = Utc::now();
        }
        self.dispatch(StateEvent::StatusChanged(status)).await;
    }

    /// Sends to every listener mailbox without holding the state lock,
    /// so a listener that calls back into the state manager does not
    /// deadlock against the writer above.
    async fn dispatch(&self, event: StateEvent) {
        let listeners = self.listeners.read().await;
        for listener in listeners.iter() {
            if listener.send(event.clone()).await.is_err() {
                warn!("state listener mailbox closed, dropping its subscription on next prune");
            }
        }
    }

    pub async fn snapshot(&self) -> TradingState {
        self.state.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::orders::PositionSide;

    fn trade(pnl: f64) -> CompletedTrade {
        let now = Utc::now();
        CompletedTrade {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            size: 1.0,
            realized_pnl: pnl,
            opened_at: now,
            closed_at: now,
        }
    }

    #[tokio::test]
    async fn recording_a_trade_notifies_subscribers() {
        let manager = StateManager::new(TradingState::default());
        let mut rx = manager.subscribe(4).await;
        manager.record_trade(trade(42.0)).await;

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, StateEvent::TradeRecorded(t) if t.realized_pnl == 42.0));
        assert_eq!(manager.snapshot().await.total_pnl, 42.0);
    }

    #[tokio::test]
    async fn status_change_is_observable_through_the_handle() {
        let manager = StateManager::new(TradingState::default());
        manager.set_status(crate::domain::state::SystemStatus::Paused).await;
        assert_eq!(manager.handle().read().await.system_status, crate::domain::state::SystemStatus::Paused);
    }
}
