//! WebSocket plumbing for combined kline streams and the user-data
//! stream. Both reconnect with exponential backoff.

use crate::domain::candle::Candlestick;
use crate::domain::orders::{OrderStatus, PendingOrder};
use crate::domain::ports::{KlineEvent, UserDataEvent};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const MAX_BACKOFF_SECS: u64 = 60;

pub fn spawn_kline_stream(ws_base: String, symbols_by_interval: Vec<(String, String)>, tx: Sender<KlineEvent>) {
    tokio::spawn(async move {
        let mut backoff = 1u64;
        loop {
            if tx.is_closed() {
                return;
            }
            match run_kline_stream(&ws_base, &symbols_by_interval, &tx).await {
                Ok(()) => {
                    info!("binance kline stream closed gracefully, reconnecting");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    backoff = 1;
                }
                Err(e) => {
                    error!(error = %e, backoff, "binance kline stream error, reconnecting");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                }
            }
        }
    });
}

async fn run_kline_stream(
    ws_base: &str,
    symbols_by_interval: &[(String, String)],
    tx: &Sender<KlineEvent>,
) -> anyhow::Result<()> {
    let streams: Vec<String> = symbols_by_interval
        .iter()
        .map(|(symbol, interval)| format!("{}@kline_{}", symbol.to_lowercase(), interval))
        .collect();
    if streams.is_empty() {
        tokio::time::sleep(Duration::from_secs(5)).await;
        return Ok(());
    }
    let url = format!("{}/stream?streams={}", ws_base.trim_end_matches('/'), streams.join("/"));
    let (ws, _) = connect_async(&url).await?;
    let (mut write, mut read) = ws.split();

    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<Message>(32);
    let pinger = out_tx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(180));
        loop {
            interval.tick().await;
            if pinger.send(Message::Ping(Vec::new().into())).await.is_err() {
                break;
            }
        }
    });
    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(event) = parse_kline_message(&text) {
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
            }
            Ok(Message::Ping(_)) => {
                let _ = out_tx.send(Message::Pong(Vec::new().into())).await;
            }
            Ok(Message::Close(frame)) => {
                debug!(?frame, "binance kline stream closed by server");
                break;
            }
            Err(e) => {
                warn!(error = %e, "binance kline stream read error");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    s: String,
    k: KlineBody,
}

#[derive(Debug, Deserialize)]
struct KlineBody {
    t: i64,
    #[serde(rename = "T")]
    close_time: i64,
    i: String,
    o: String,
    h: String,
    l: String,
    c: String,
    v: String,
    x: bool,
}

fn parse_kline_message(text: &str) -> Option<KlineEvent> {
    let envelope: StreamEnvelope = serde_json::from_str(text).ok()?;
    let payload: KlinePayload = serde_json::from_value(envelope.data).ok()?;
    Some(KlineEvent {
        symbol: payload.s,
        interval: payload.k.i,
        candle: Candlestick {
            open_time_ms: payload.k.t,
            close_time_ms: payload.k.close_time,
            open: payload.k.o,
            high: payload.k.h,
            low: payload.k.l,
            close: payload.k.c,
            volume: payload.k.v,
        },
        is_final: payload.k.x,
    })
}

pub fn spawn_user_data_stream(ws_base: String, listen_key: String, tx: Sender<UserDataEvent>) {
    tokio::spawn(async move {
        let mut backoff = 1u64;
        loop {
            if tx.is_closed() {
                return;
            }
            match run_user_data_stream(&ws_base, &listen_key, &tx).await {
                Ok(()) => return,
                Err(e) => {
                    error!(error = %e, backoff, "binance user-data stream error, reconnecting");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                }
            }
        }
    });
}

async fn run_user_data_stream(ws_base: &str, listen_key: &str, tx: &Sender<UserDataEvent>) -> anyhow::Result<()> {
    let url = format!("{}/ws/{}", ws_base.trim_end_matches('/'), listen_key);
    let (ws, _) = connect_async(&url).await?;
    let (_write, mut read) = ws.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(event) = parse_user_data_message(&text) {
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(error = %e, "binance user-data stream read error");
                break;
            }
            _ => {}
        }
    }
    let _ = tx.send(UserDataEvent::ListenKeyExpired).await;
    Ok(())
}

fn parse_user_data_message(text: &str) -> Option<UserDataEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    match value.get("e").and_then(|v| v.as_str())? {
        "ORDER_TRADE_UPDATE" => {
            let order = value.get("o")?;
            let symbol = order.get("s")?.as_str()?.to_string();
            let order_id = order.get("i")?.as_i64()?.to_string();
            let side = order.get("S")?.as_str()?;
            let order_type = order.get("o")?.as_str()?;
            let quantity = order.get("q")?.as_str()?.parse::<f64>().ok()?;
            let price = order.get("p")?.as_str()?.parse::<f64>().unwrap_or(0.0);
            let status = match order.get("X")?.as_str()? {
                "NEW" => OrderStatus::Submitted,
                "FILLED" => OrderStatus::Filled,
                "CANCELED" | "EXPIRED" => OrderStatus::Canceled,
                "REJECTED" => OrderStatus::Rejected,
                _ => OrderStatus::Pending,
            };
            let now = chrono::Utc::now();
            Some(UserDataEvent::OrderTradeUpdate(PendingOrder {
                order_id,
                symbol,
                side: if side == "BUY" { crate::domain::orders::OrderSide::Buy } else { crate::domain::orders::OrderSide::Sell },
                order_type: match order_type {
                    "LIMIT" => crate::domain::orders::OrderType::Limit,
                    "TAKE_PROFIT_MARKET" => crate::domain::orders::OrderType::TakeProfitMarket,
                    "STOP_MARKET" => crate::domain::orders::OrderType::StopMarket,
                    _ => crate::domain::orders::OrderType::Market,
                },
                size: quantity,
                price,
                stop_price: None,
                status,
                created_at: now,
                updated_at: now,
                trigger_signal: None,
            }))
        }
        "listenKeyExpired" => Some(UserDataEvent::ListenKeyExpired),
        _ => None,
    }
}
