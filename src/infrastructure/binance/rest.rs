//! `ExchangeClient` implementation against Binance USDT-M futures
//! (`fapi.binance.com`).

use super::common::{build_client, sign};
use super::stream::{spawn_kline_stream, spawn_user_data_stream};
use crate::domain::candle::Candlestick;
use crate::domain::orders::{OrderSide, OrderStatus, OrderType, PendingOrder, Position, PositionSide};
use crate::domain::ports::{ExchangeClient, KlineEvent, LeverageBracket, OrderRequest, UserDataEvent};
use crate::domain::symbol::{Symbol, SymbolFilters};
use crate::infrastructure::rate_limiter::RateLimiter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver};

pub struct BinanceClient {
    client: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    ws_url: String,
    rate_limiter: Arc<RateLimiter>,
}

impl BinanceClient {
    pub fn new(
        api_key: String,
        api_secret: String,
        base_url: String,
        ws_url: String,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self { client: build_client(), api_key, api_secret, base_url, ws_url, rate_limiter }
    }

    fn signed_query(&self, mut params: Vec<(&str, String)>) -> String {
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = sign(&self.api_secret, &query);
        format!("{query}&signature={signature}")
    }
}

#[derive(Debug, Deserialize)]
struct RawFilter {
    #[serde(rename = "filterType")]
    filter_type: String,
    #[serde(rename = "tickSize")]
    tick_size: Option<String>,
    #[serde(rename = "stepSize")]
    step_size: Option<String>,
    notional: Option<String>,
    #[serde(rename = "multiplierUp")]
    multiplier_up: Option<String>,
    #[serde(rename = "multiplierDown")]
    multiplier_down: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSymbol {
    symbol: String,
    pair: String,
    #[serde(rename = "marginAsset")]
    margin_asset: String,
    #[serde(rename = "baseAsset")]
    base_asset: String,
    status: String,
    filters: Vec<RawFilter>,
}

#[derive(Debug, Deserialize)]
struct RawExchangeInfo {
    symbols: Vec<RawSymbol>,
}

fn parse_f64(s: &Option<String>, default: f64) -> f64 {
    s.as_deref().and_then(|v| v.parse::<f64>().ok()).unwrap_or(default)
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn get_exchange_info(&self) -> Result<Vec<Symbol>> {
        self.rate_limiter.acquire().await;
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let response = self.client.get(&url).send().await.context("fetching exchangeInfo")?;
        if !response.status().is_success() {
            anyhow::bail!("exchangeInfo request failed: {}", response.status());
        }
        let info: RawExchangeInfo = response.json().await.context("parsing exchangeInfo")?;
        let symbols = info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| {
                let mut filters = SymbolFilters::default();
                for f in &s.filters {
                    match f.filter_type.as_str() {
                        "PRICE_FILTER" => filters.tick_size = parse_f64(&f.tick_size, 0.01),
                        "LOT_SIZE" => filters.step_size = parse_f64(&f.step_size, 0.001),
                        "MIN_NOTIONAL" => filters.min_notional = parse_f64(&f.notional, 5.0),
                        "PERCENT_PRICE" => {
                            filters.percent_price_up = parse_f64(&f.multiplier_up, 1.1);
                            filters.percent_price_down = parse_f64(&f.multiplier_down, 0.9);
                        }
                        _ => {}
                    }
                }
                Symbol {
                    symbol: s.symbol,
                    pair: s.pair,
                    margin_asset: s.margin_asset,
                    base_asset: s.base_asset,
                    filters,
                }
            })
            .collect();
        Ok(symbols)
    }

    async fn get_current_price(&self, symbol: &str) -> Result<f64> {
        self.rate_limiter.acquire().await;
        let url = format!("{}/fapi/v1/ticker/price", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .context("fetching current price")?;
        #[derive(Deserialize)]
        struct Ticker {
            price: String,
        }
        let ticker: Ticker = response.json().await.context("parsing ticker price")?;
        ticker.price.parse::<f64>().context("parsing ticker price as f64")
    }

    async fn get_candlesticks(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candlestick>> {
        self.rate_limiter.acquire().await;
        let url = format!("{}/fapi/v1/klines", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .context("fetching klines")?;
        if !response.status().is_success() {
            anyhow::bail!("klines request failed: {}", response.status());
        }
        let raw: Vec<serde_json::Value> = response.json().await.context("parsing klines")?;
        let candles = raw
            .into_iter()
            .filter_map(|k| {
                let arr = k.as_array()?;
                Some(Candlestick {
                    open_time_ms: arr.first()?.as_i64()?,
                    close_time_ms: arr.get(6)?.as_i64()?,
                    open: arr.get(1)?.as_str()?.to_string(),
                    high: arr.get(2)?.as_str()?.to_string(),
                    low: arr.get(3)?.as_str()?.to_string(),
                    close: arr.get(4)?.as_str()?.to_string(),
                    volume: arr.get(5)?.as_str()?.to_string(),
                })
            })
            .collect();
        Ok(candles)
    }

    async fn position_risk(&self, symbol: &str) -> Result<Option<Position>> {
        self.rate_limiter.acquire().await;
        let query = self.signed_query(vec![("symbol", symbol.to_string())]);
        let url = format!("{}/fapi/v2/positionRisk?{}", self.base_url, query);
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("fetching position risk")?;
        #[derive(Deserialize)]
        struct RawPosition {
            #[serde(rename = "positionAmt")]
            position_amt: String,
            #[serde(rename = "entryPrice")]
            entry_price: String,
            #[serde(rename = "markPrice")]
            mark_price: String,
            #[serde(rename = "unRealizedProfit")]
            unrealized_profit: String,
            leverage: String,
        }
        let positions: Vec<RawPosition> = response.json().await.context("parsing position risk")?;
        let Some(p) = positions.into_iter().find(|p| p.position_amt.parse::<f64>().unwrap_or(0.0) != 0.0) else {
            return Ok(None);
        };
        let amt = p.position_amt.parse::<f64>().unwrap_or(0.0);
        Ok(Some(Position {
            symbol: symbol.to_string(),
            side: if amt >= 0.0 { PositionSide::Long } else { PositionSide::Short },
            size: amt.abs(),
            entry_price: p.entry_price.parse().unwrap_or(0.0),
            current_price: p.mark_price.parse().unwrap_or(0.0),
            unrealized_pnl: p.unrealized_profit.parse().unwrap_or(0.0),
            leverage: p.leverage.parse().unwrap_or(1),
            open_time: Utc::now(),
            stop_loss: None,
            take_profit: None,
            is_active: true,
        }))
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<PendingOrder>> {
        self.rate_limiter.acquire().await;
        let query = self.signed_query(vec![("symbol", symbol.to_string())]);
        let url = format!("{}/fapi/v1/openOrders?{}", self.base_url, query);
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("fetching open orders")?;
        #[derive(Deserialize)]
        struct RawOrder {
            #[serde(rename = "orderId")]
            order_id: i64,
            symbol: String,
            side: String,
            #[serde(rename = "type")]
            order_type: String,
            #[serde(rename = "origQty")]
            orig_qty: String,
            price: String,
            status: String,
        }
        let raw: Vec<RawOrder> = response.json().await.context("parsing open orders")?;
        let now = Utc::now();
        Ok(raw
            .into_iter()
            .map(|o| PendingOrder {
                order_id: o.order_id.to_string(),
                symbol: o.symbol,
                side: if o.side == "BUY" { OrderSide::Buy } else { OrderSide::Sell },
                order_type: match o.order_type.as_str() {
                    "LIMIT" => OrderType::Limit,
                    "TAKE_PROFIT_MARKET" => OrderType::TakeProfitMarket,
                    "STOP_MARKET" => OrderType::StopMarket,
                    _ => OrderType::Market,
                },
                size: o.orig_qty.parse().unwrap_or(0.0),
                price: o.price.parse().unwrap_or(0.0),
                stop_price: None,
                status: match o.status.as_str() {
                    "NEW" => OrderStatus::Submitted,
                    "FILLED" => OrderStatus::Filled,
                    "CANCELED" => OrderStatus::Canceled,
                    "REJECTED" | "EXPIRED" => OrderStatus::Rejected,
                    _ => OrderStatus::Pending,
                },
                created_at: now,
                updated_at: now,
                trigger_signal: None,
            })
            .collect())
    }

    async fn leverage_bracket(&self, symbol: &str) -> Result<LeverageBracket> {
        self.rate_limiter.acquire().await;
        let query = self.signed_query(vec![("symbol", symbol.to_string())]);
        let url = format!("{}/fapi/v1/leverageBracket?{}", self.base_url, query);
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("fetching leverage bracket")?;
        #[derive(Deserialize)]
        struct Bracket {
            #[serde(rename = "initialLeverage")]
            initial_leverage: u32,
            #[serde(rename = "notionalCap")]
            notional_cap: f64,
        }
        #[derive(Deserialize)]
        struct SymbolBrackets {
            symbol: String,
            brackets: Vec<Bracket>,
        }
        let raw: Vec<SymbolBrackets> = response.json().await.context("parsing leverage bracket")?;
        let top = raw
            .into_iter()
            .find(|b| b.symbol == symbol)
            .and_then(|b| b.brackets.into_iter().next())
            .unwrap_or(Bracket { initial_leverage: 20, notional_cap: 50_000.0 });
        Ok(LeverageBracket {
            symbol: symbol.to_string(),
            max_leverage: top.initial_leverage,
            notional_cap: top.notional_cap,
        })
    }

    async fn listen_key(&self) -> Result<String> {
        self.rate_limiter.acquire().await;
        let url = format!("{}/fapi/v1/listenKey", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("requesting listen key")?;
        #[derive(Deserialize)]
        struct ListenKey {
            #[serde(rename = "listenKey")]
            listen_key: String,
        }
        let parsed: ListenKey = response.json().await.context("parsing listen key")?;
        Ok(parsed.listen_key)
    }

    async fn subscribe_combined_klines(&self, symbols_by_interval: Vec<(String, String)>) -> Result<Receiver<KlineEvent>> {
        let (tx, rx) = mpsc::channel(256);
        spawn_kline_stream(self.ws_url.clone(), symbols_by_interval, tx);
        Ok(rx)
    }

    async fn subscribe_user_data(&self, listen_key: &str) -> Result<Receiver<UserDataEvent>> {
        let (tx, rx) = mpsc::channel(64);
        spawn_user_data_stream(self.ws_url.clone(), listen_key.to_string(), tx);
        Ok(rx)
    }

    async fn place_batch_orders(&self, orders: Vec<OrderRequest>) -> Result<Vec<String>> {
        let mut order_ids = Vec::with_capacity(orders.len());
        for order in orders {
            let side = match order.side {
                OrderSide::Buy => "BUY",
                OrderSide::Sell => "SELL",
            };
            let order_type = match order.order_type {
                OrderType::Limit => "LIMIT",
                OrderType::Market => "MARKET",
                OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
                OrderType::StopMarket => "STOP_MARKET",
            };
            let mut params = vec![
                ("symbol", order.symbol.clone()),
                ("side", side.to_string()),
                ("type", order_type.to_string()),
                ("quantity", order.quantity.to_string()),
                ("newClientOrderId", uuid::Uuid::new_v4().to_string()),
            ];
            if let Some(price) = order.price {
                params.push(("price", price.to_string()));
                params.push(("timeInForce", "GTC".to_string()));
            }
            if let Some(stop_price) = order.stop_price {
                params.push(("stopPrice", stop_price.to_string()));
            }
            self.rate_limiter.acquire().await;
            let query = self.signed_query(params);
            let url = format!("{}/fapi/v1/order?{}", self.base_url, query);
            let response = self
                .client
                .post(&url)
                .header("X-MBX-APIKEY", &self.api_key)
                .send()
                .await
                .context("placing order")?;
            if !response.status().is_success() {
                let text = response.text().await.unwrap_or_default();
                tracing::warn!(symbol = %order.symbol, error = %text, "order placement failed");
                continue;
            }
            #[derive(Deserialize)]
            struct OrderAck {
                #[serde(rename = "orderId")]
                order_id: i64,
            }
            if let Ok(ack) = response.json::<OrderAck>().await {
                order_ids.push(ack.order_id.to_string());
            }
        }
        Ok(order_ids)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        self.rate_limiter.acquire().await;
        let query = self.signed_query(vec![
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ]);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, query);
        let response = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("cancelling order")?;
        if !response.status().is_success() {
            anyhow::bail!("cancel order failed: {}", response.status());
        }
        Ok(())
    }
}
