//! In-memory `ExchangeClient` used under `Mode::Mock` so the pipeline
//! can run end-to-end without real exchange credentials.

use crate::domain::candle::Candlestick;
use crate::domain::orders::{PendingOrder, Position};
use crate::domain::ports::{ExchangeClient, KlineEvent, LeverageBracket, OrderRequest, UserDataEvent};
use crate::domain::symbol::{Symbol, SymbolFilters};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, Receiver};

pub struct MockExchangeClient {
    symbols: Vec<Symbol>,
    next_order_id: AtomicI64,
    placed_orders: Mutex<Vec<OrderRequest>>,
}

impl MockExchangeClient {
    pub fn new(symbols: Vec<String>) -> Self {
        let symbols = symbols
            .into_iter()
            .map(|s| Symbol {
                base_asset: s.trim_end_matches("USDT").to_string(),
                symbol: s.clone(),
                pair: s,
                margin_asset: "USDT".to_string(),
                filters: SymbolFilters {
                    tick_size: 0.1,
                    step_size: 0.001,
                    min_notional: 5.0,
                    percent_price_up: 1.1,
                    percent_price_down: 0.9,
                },
            })
            .collect();
        Self { symbols, next_order_id: AtomicI64::new(1), placed_orders: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    async fn get_exchange_info(&self) -> Result<Vec<Symbol>> {
        Ok(self.symbols.clone())
    }

    async fn get_current_price(&self, _symbol: &str) -> Result<f64> {
        Ok(100.0)
    }

    async fn get_candlesticks(&self, _symbol: &str, _interval: &str, limit: usize) -> Result<Vec<Candlestick>> {
        let mut price: f64 = 100.0;
        let mut candles = Vec::with_capacity(limit);
        for i in 0..limit {
            let open = price;
            price *= 1.0 + 0.001 * (if i % 2 == 0 { 1.0 } else { -1.0 });
            candles.push(Candlestick {
                open_time_ms: i as i64 * 3_600_000,
                close_time_ms: i as i64 * 3_600_000 + 3_599_999,
                open: open.to_string(),
                high: (open.max(price) * 1.001).to_string(),
                low: (open.min(price) * 0.999).to_string(),
                close: price.to_string(),
                volume: "1000".to_string(),
            });
        }
        Ok(candles)
    }

    async fn position_risk(&self, _symbol: &str) -> Result<Option<Position>> {
        Ok(None)
    }

    async fn get_open_orders(&self, _symbol: &str) -> Result<Vec<PendingOrder>> {
        Ok(vec![])
    }

    async fn leverage_bracket(&self, symbol: &str) -> Result<LeverageBracket> {
        Ok(LeverageBracket { symbol: symbol.to_string(), max_leverage: 20, notional_cap: 1_000_000.0 })
    }

    async fn listen_key(&self) -> Result<String> {
        Ok("mock-listen-key".to_string())
    }

    async fn subscribe_combined_klines(&self, _symbols_by_interval: Vec<(String, String)>) -> Result<Receiver<KlineEvent>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn subscribe_user_data(&self, _listen_key: &str) -> Result<Receiver<UserDataEvent>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn place_batch_orders(&self, orders: Vec<OrderRequest>) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(orders.len());
        let mut placed = self.placed_orders.lock().expect("mock exchange lock poisoned");
        for order in orders {
            ids.push(self.next_order_id.fetch_add(1, Ordering::SeqCst).to_string());
            placed.push(order);
        }
        Ok(ids)
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generates_the_requested_number_of_candles() {
        let client = MockExchangeClient::new(vec!["BTCUSDT".to_string()]);
        let candles = client.get_candlesticks("BTCUSDT", "1h", 10).await.unwrap();
        assert_eq!(candles.len(), 10);
    }

    #[tokio::test]
    async fn order_ids_are_unique_and_sequential() {
        let client = MockExchangeClient::new(vec!["BTCUSDT".to_string()]);
        let orders = vec![
            OrderRequest {
                symbol: "BTCUSDT".to_string(),
                side: crate::domain::orders::OrderSide::Buy,
                order_type: crate::domain::orders::OrderType::Limit,
                quantity: 0.01,
                price: Some(100.0),
                stop_price: None,
            };
            3
        ];
        let ids = client.place_batch_orders(orders).await.unwrap();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
