//! Port interfaces to the outside world. The exchange's HTTP/WebSocket
//! client and the notification backend are external collaborators;
//! only the capability surface lives here.

use crate::domain::candle::Candlestick;
use crate::domain::orders::{PendingOrder, Position};
use crate::domain::symbol::Symbol;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;

#[derive(Debug, Clone)]
pub struct KlineEvent {
    pub symbol: String,
    pub interval: String,
    pub candle: Candlestick,
    pub is_final: bool,
}

#[derive(Debug, Clone)]
pub enum UserDataEvent {
    OrderTradeUpdate(PendingOrder),
    ListenKeyExpired,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: crate::domain::orders::OrderSide,
    pub order_type: crate::domain::orders::OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct LeverageBracket {
    pub symbol: String,
    pub max_leverage: u32,
    pub notional_cap: f64,
}

/// Capability set the exchange is abstracted behind: REST + WebSocket +
/// order placement.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_exchange_info(&self) -> Result<Vec<Symbol>>;
    async fn get_current_price(&self, symbol: &str) -> Result<f64>;
    async fn get_candlesticks(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candlestick>>;
    async fn position_risk(&self, symbol: &str) -> Result<Option<Position>>;
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<PendingOrder>>;
    async fn leverage_bracket(&self, symbol: &str) -> Result<LeverageBracket>;
    async fn listen_key(&self) -> Result<String>;
    async fn subscribe_combined_klines(
        &self,
        symbols_by_interval: Vec<(String, String)>,
    ) -> Result<Receiver<KlineEvent>>;
    async fn subscribe_user_data(&self, listen_key: &str) -> Result<Receiver<UserDataEvent>>;
    async fn place_batch_orders(&self, orders: Vec<OrderRequest>) -> Result<Vec<String>>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;
}

/// The chat-bot notification client, modeled as a port so the guard
/// and executor depend on an abstraction rather than a webhook detail.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, message: &str) -> Result<()>;
}

pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _channel: &str, _message: &str) -> Result<()> {
        Ok(())
    }
}

pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, channel: &str, message: &str) -> Result<()> {
        tracing::info!(channel, message, "notification");
        Ok(())
    }
}
