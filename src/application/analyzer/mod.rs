//! The analyzer. Every `scan_period`, one [`AnalyzeJob`] per cached
//! symbol is dispatched through a [`WorkerPool`]; each job recomputes
//! RSI/KDJ for the configured interval and, unless the reading is
//! range-bound, emits a [`Signal`] onto the `signals` topic.

pub mod indicators;

use crate::application::market_cache::MarketCache;
use crate::collections::queue::MessageQueue;
use crate::collections::worker_pool::{JobProcessor, Poller, WorkerPool, WorkerPoolConfig};
use crate::domain::signal::{Signal, SignalAction, SignalType};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

pub const SIGNALS_TOPIC: &str = "signals";

/// Thresholds that define the "currently range-bound" gate: a reading
/// is discarded only when RSI *and* K *and* D all sit inside their
/// neutral band. Any one of them breaking out is treated as actionable.
#[derive(Debug, Clone)]
pub struct RangeBoundConfig {
    pub rsi_low: f64,
    pub rsi_high: f64,
    pub stoch_low: f64,
    pub stoch_high: f64,
}

impl Default for RangeBoundConfig {
    fn default() -> Self {
        Self {
            rsi_low: 30.0,
            rsi_high: 70.0,
            stoch_low: 20.0,
            stoch_high: 80.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub interval: String,
    pub rsi_period: usize,
    pub kdj_rsv_period: usize,
    pub kdj_k_period: usize,
    pub kdj_d_period: usize,
    pub range_bound: RangeBoundConfig,
    pub rate_limit: ChronoDuration,
    pub scan_period: Duration,
    pub pool: WorkerPoolConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            interval: "1h".to_string(),
            rsi_period: 14,
            kdj_rsv_period: 9,
            kdj_k_period: 3,
            kdj_d_period: 3,
            range_bound: RangeBoundConfig::default(),
            rate_limit: ChronoDuration::minutes(10),
            scan_period: Duration::from_secs(5),
            pool: WorkerPoolConfig {
                num_process: 8,
                num_polling: 1,
                polling_backoff: Duration::from_secs(5),
                channel_capacity: 512,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzeJob {
    pub symbol: String,
}

/// Whether a reading is oversold, overbought, or sitting inside the
/// neutral band on every axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reading {
    Oversold,
    Overbought,
    Neutral,
}

fn classify(rsi: f64, k: f64, d: f64, gate: &RangeBoundConfig) -> Reading {
    let oversold = rsi <= gate.rsi_low || k <= gate.stoch_low || d <= gate.stoch_low;
    let overbought = rsi >= gate.rsi_high || k >= gate.stoch_high || d >= gate.stoch_high;
    match (oversold, overbought) {
        (true, false) => Reading::Oversold,
        (false, true) => Reading::Overbought,
        // Conflicting or neither: treat as no actionable edge.
        _ => Reading::Neutral,
    }
}

/// Distance of the most extreme indicator past its threshold, scaled
/// into `[0, 1]` and used for both strength and confidence.
fn extremity(rsi: f64, k: f64, d: f64, gate: &RangeBoundConfig, reading: Reading) -> f64 {
    let score = match reading {
        Reading::Oversold => (gate.rsi_low - rsi).max(gate.stoch_low - k).max(gate.stoch_low - d),
        Reading::Overbought => (rsi - gate.rsi_high).max(k - gate.stoch_high).max(d - gate.stoch_high),
        Reading::Neutral => 0.0,
    };
    (score.max(0.0) / 30.0).min(1.0)
}

pub struct AnalyzerProcessor {
    market_cache: Arc<MarketCache>,
    signals: Arc<MessageQueue<Signal>>,
    config: AnalyzerConfig,
    last_emit: RwLock<HashMap<String, chrono::DateTime<Utc>>>,
}

impl AnalyzerProcessor {
    fn rate_limited(&self, id: &str, now: chrono::DateTime<Utc>) -> bool {
        let last = self.last_emit.read().expect("analyzer lock poisoned").get(id).copied();
        matches!(last, Some(t) if now - t < self.config.rate_limit)
    }

    fn mark_emitted(&self, id: &str, now: chrono::DateTime<Utc>) {
        self.last_emit
            .write()
            .expect("analyzer lock poisoned")
            .insert(id.to_string(), now);
    }
}

#[async_trait]
impl JobProcessor<AnalyzeJob> for AnalyzerProcessor {
    async fn process(&self, job: AnalyzeJob) -> anyhow::Result<()> {
        let interval = &self.config.interval;
        let buf = match self.market_cache.candles(&job.symbol, interval) {
            Ok(buf) => buf,
            Err(_) => return Ok(()),
        };
        let candles = buf.sorted();
        if candles.is_empty() {
            return Ok(());
        }

        let closes: Vec<f64> = candles.iter().filter_map(|c| c.close_f64().ok()).collect();
        let Some(rsi) = indicators::rsi(&closes, self.config.rsi_period) else {
            return Ok(());
        };
        let Some((k, d)) = indicators::kdj(
            &candles,
            self.config.kdj_rsv_period,
            self.config.kdj_k_period,
            self.config.kdj_d_period,
        ) else {
            return Ok(());
        };
        let j = indicators::j_line(k, d);

        let reading = classify(rsi, k, d, &self.config.range_bound);
        if reading == Reading::Neutral {
            debug!(symbol = %job.symbol, rsi, k, d, "range-bound, discarding");
            return Ok(());
        }

        let id = format!("{}-{}", job.symbol, interval);
        let now = Utc::now();
        if self.rate_limited(&id, now) {
            return Ok(());
        }

        let strength = extremity(rsi, k, d, &self.config.range_bound, reading);
        let action = match reading {
            Reading::Oversold => SignalAction::Buy,
            Reading::Overbought => SignalAction::Sell,
            Reading::Neutral => unreachable!(),
        };
        let price = candles.last().and_then(|c| c.close_f64().ok()).unwrap_or(0.0);

        let signal = Signal {
            symbol: job.symbol.clone(),
            interval: interval.clone(),
            signal_type: SignalType::Entry,
            action,
            strength,
            confidence: strength,
            price,
            strategy: "rsi-kdj".to_string(),
            indicators: HashMap::from([
                ("rsi".to_string(), rsi),
                ("k".to_string(), k),
                ("d".to_string(), d),
                ("j".to_string(), j),
            ]),
            metadata: HashMap::new(),
            created_at: now,
            expires_at: now + ChronoDuration::minutes(10),
        };

        self.signals.push(SIGNALS_TOPIC, signal, None).await;
        self.mark_emitted(&id, now);
        Ok(())
    }
}

struct AnalyzerScanner {
    pool: Arc<WorkerPool<AnalyzeJob>>,
    market_cache: Arc<MarketCache>,
}

#[async_trait]
impl Poller for AnalyzerScanner {
    async fn poll(&self, _idx: usize) -> anyhow::Result<()> {
        for symbol in self.market_cache.symbols() {
            self.pool.send_job(AnalyzeJob { symbol }).await?;
        }
        Ok(())
    }
}

pub struct Analyzer {
    pool: Arc<WorkerPool<AnalyzeJob>>,
}

impl Analyzer {
    pub async fn start(
        config: AnalyzerConfig,
        market_cache: Arc<MarketCache>,
        signals: Arc<MessageQueue<Signal>>,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(config.pool.clone()));
        let processor = Arc::new(AnalyzerProcessor {
            market_cache: market_cache.clone(),
            signals,
            config,
            last_emit: RwLock::new(HashMap::new()),
        });
        let scanner = Arc::new(AnalyzerScanner {
            pool: pool.clone(),
            market_cache,
        });
        pool.start(processor, Some(scanner)).await;
        Self { pool }
    }

    pub async fn stop(&self) {
        self.pool.stop().await;
    }
}
