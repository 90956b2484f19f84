//! Brings the exchange's symbol universe and candle history into the
//! [`MarketCache`], then keeps it live via a kline stream and a
//! user-data stream, with a bounded retry path for transient fetch
//! failures.

use crate::application::market_cache::MarketCache;
use crate::collections::worker_pool::{JobProcessor, WorkerPool, WorkerPoolConfig};
use crate::domain::ports::{ExchangeClient, Notifier, UserDataEvent};
use crate::domain::symbol::Symbol;
use anyhow::Context;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

const EXCHANGE_REFRESH_PERIOD: Duration = Duration::from_secs(15 * 60);
const RETRY_WORKERS: usize = 4;
const RETRY_BASE_BACKOFF: Duration = Duration::from_millis(100);
const RETRY_LONG_BACKOFF_EVERY: u32 = 9;
const RETRY_LONG_BACKOFF_EXTRA: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct IngesterConfig {
    pub intervals: Vec<String>,
    pub candle_limit: usize,
    pub blacklist: HashSet<String>,
}

/// A symbol/interval pair whose initial history fetch failed and needs
/// to be retried with backoff.
#[derive(Debug, Clone)]
pub struct RetryMessage {
    pub symbol: String,
    pub interval: String,
    pub attempt: u32,
}

pub struct Ingester {
    client: Arc<dyn ExchangeClient>,
    market_cache: Arc<MarketCache>,
    notifier: Arc<dyn Notifier>,
    config: IngesterConfig,
    exchange_symbols: RwLock<Vec<Symbol>>,
    retry_pool: Arc<WorkerPool<RetryMessage>>,
}

impl Ingester {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        market_cache: Arc<MarketCache>,
        notifier: Arc<dyn Notifier>,
        config: IngesterConfig,
    ) -> Arc<Self> {
        let retry_pool = Arc::new(WorkerPool::new(WorkerPoolConfig {
            num_process: RETRY_WORKERS,
            num_polling: 0,
            ..Default::default()
        }));
        Arc::new(Self {
            client,
            market_cache,
            notifier,
            config,
            exchange_symbols: RwLock::new(Vec::new()),
            retry_pool,
        })
    }

    /// `(1)` select the perpetual USDT-margined, non-blacklisted
    /// universe and populate it; `(2)` backfill candle history for
    /// every symbol and configured interval. Both run to completion
    /// before the live subsystems start.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        self.fetch_exchange().await?;
        self.fetch_market_summary().await;

        let processor: Arc<dyn JobProcessor<RetryMessage>> = Arc::new(RetryProcessor {
            ingester: self.clone(),
        });
        self.retry_pool.start(processor, None).await;

        self.spawn_exchange_refresh();
        self.spawn_kline_consumer().await?;
        self.spawn_user_data_consumer().await?;
        Ok(())
    }

    pub async fn fetch_exchange(&self) -> anyhow::Result<()> {
        let symbols = self
            .client
            .get_exchange_info()
            .await
            .context("fetching exchange info")?;
        let selected: Vec<Symbol> = symbols
            .into_iter()
            .filter(|s| !s.symbol.contains('_'))
            .filter(|s| s.is_eligible(&self.config.blacklist))
            .collect();
        info!(count = selected.len(), "exchange universe refreshed");
        *self.exchange_symbols.write().expect("ingester lock poisoned") = selected;
        Ok(())
    }

    fn spawn_exchange_refresh(self: &Arc<Self>) {
        let ingester = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EXCHANGE_REFRESH_PERIOD);
            loop {
                ticker.tick().await;
                if let Err(e) = ingester.fetch_exchange().await {
                    warn!(error = %e, "exchange refresh failed");
                }
            }
        });
    }

    pub async fn fetch_market_summary(self: &Arc<Self>) {
        let symbols: Vec<String> = self
            .exchange_symbols
            .read()
            .expect("ingester lock poisoned")
            .iter()
            .map(|s| s.symbol.clone())
            .collect();

        for symbol in symbols {
            for interval in self.config.intervals.clone() {
                if let Err(e) = self.backfill(&symbol, &interval).await {
                    warn!(symbol, interval, error = %e, "initial candle fetch failed, scheduling retry");
                    let _ = self
                        .retry_pool
                        .send_job(RetryMessage {
                            symbol: symbol.clone(),
                            interval: interval.clone(),
                            attempt: 1,
                        })
                        .await;
                }
            }
        }
    }

    async fn backfill(&self, symbol: &str, interval: &str) -> anyhow::Result<()> {
        let candles = self
            .client
            .get_candlesticks(symbol, interval, self.config.candle_limit)
            .await?;
        let now = chrono::Utc::now().timestamp_millis();
        for candle in candles {
            self.market_cache.create_candle(symbol, interval, candle, now);
        }
        Ok(())
    }

    async fn spawn_kline_consumer(self: &Arc<Self>) -> anyhow::Result<()> {
        for interval in self.config.intervals.clone() {
            let ingester = self.clone();
            tokio::spawn(async move {
                loop {
                    let pairs: Vec<(String, String)> = ingester
                        .exchange_symbols
                        .read()
                        .expect("ingester lock poisoned")
                        .iter()
                        .map(|s| (s.symbol.clone(), interval.clone()))
                        .collect();
                    let mut rx = match ingester.client.subscribe_combined_klines(pairs).await {
                        Ok(rx) => rx,
                        Err(e) => {
                            error!(interval, error = %e, "kline subscription failed, retrying in 5s");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            continue;
                        }
                    };
                    while let Some(event) = rx.recv().await {
                        ingester.handle_kline_event(event);
                    }
                    warn!(interval, "kline stream closed, reconnecting");
                }
            });
        }
        Ok(())
    }

    fn handle_kline_event(&self, event: crate::domain::ports::KlineEvent) {
        let now = chrono::Utc::now().timestamp_millis();
        let existing = self
            .market_cache
            .candles(&event.symbol, &event.interval)
            .ok()
            .and_then(|buf| {
                let (tail, idx) = buf.tail();
                tail.map(|c| (c, idx))
            });

        match existing {
            Some((last, idx))
                if last.open_time_ms == event.candle.open_time_ms
                    && last.close_time_ms == event.candle.close_time_ms =>
            {
                let _ = self
                    .market_cache
                    .update_candle(&event.symbol, &event.interval, idx as usize, event.candle, now);
            }
            _ => {
                self.market_cache
                    .create_candle(&event.symbol, &event.interval, event.candle, now);
            }
        }
    }

    async fn spawn_user_data_consumer(self: &Arc<Self>) -> anyhow::Result<()> {
        let ingester = self.clone();
        tokio::spawn(async move {
            loop {
                let listen_key = match ingester.client.listen_key().await {
                    Ok(key) => key,
                    Err(e) => {
                        error!(error = %e, "failed to obtain listen key, retrying in 5s");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };
                let mut rx = match ingester.client.subscribe_user_data(&listen_key).await {
                    Ok(rx) => rx,
                    Err(e) => {
                        error!(error = %e, "user data subscription failed, retrying in 5s");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };
                while let Some(event) = rx.recv().await {
                    match event {
                        UserDataEvent::OrderTradeUpdate(order) => {
                            let message = format!("order update: {} {:?}", order.symbol, order.status);
                            if let Err(e) = ingester.notifier.notify("orders", &message).await {
                                warn!(error = %e, "notification failed");
                            }
                        }
                        UserDataEvent::ListenKeyExpired => {
                            warn!("listen key expired, re-subscribing");
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    pub async fn stop(&self) {
        self.retry_pool.stop().await;
    }
}

struct RetryProcessor {
    ingester: Arc<Ingester>,
}

#[async_trait::async_trait]
impl JobProcessor<RetryMessage> for RetryProcessor {
    async fn process(&self, mut message: RetryMessage) -> anyhow::Result<()> {
        let mut backoff = RETRY_BASE_BACKOFF * message.attempt;
        if message.attempt % RETRY_LONG_BACKOFF_EVERY == 0 {
            backoff += RETRY_LONG_BACKOFF_EXTRA;
        }
        tokio::time::sleep(backoff).await;

        if let Err(e) = self.ingester.backfill(&message.symbol, &message.interval).await {
            warn!(
                symbol = %message.symbol,
                interval = %message.interval,
                attempt = message.attempt,
                error = %e,
                "retry attempt failed"
            );
            message.attempt += 1;
            self.ingester
                .retry_pool
                .send_job(message)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        Ok(())
    }
}
