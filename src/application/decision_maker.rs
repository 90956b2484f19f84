//! Consumes `signals`, promotes the highest-scoring one once a
//! per-interval backlog threshold is met, and runs the scoring engine
//! to produce a [`TradingDecision`] on topic `decisions`.

use crate::application::signal_service::SignalService;
use crate::collections::queue::MessageQueue;
use crate::collections::worker_pool::{Poller, WorkerPool, WorkerPoolConfig};
use crate::domain::signal::{DecisionAction, TradingDecision};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DECISIONS_TOPIC: &str = "decisions";
const MIN_BACKLOG: usize = 3;

/// The feature vector the scoring engine consumes, covering market
/// structure, order flow, funding, on-chain, macro, and quant signals
/// across multiple timeframes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionInput {
    pub symbol: String,
    pub rsi: f64,
    pub k: f64,
    pub d: f64,
    pub j: f64,
    pub atr_percent: f64,
    pub vwap: f64,
    pub recent_high: f64,
    pub recent_low: f64,
    pub rsi_5m: f64,
    pub rsi_15m: f64,
    pub rsi_1h: f64,
    pub relative_volume: f64,
    pub volume_ratio: f64,
    pub spot_vol_change: f64,
    pub futures_vol_change: f64,
    pub trend_strength: f64,
    pub support_level: f64,
    pub resistance_level: f64,
    pub funding_rate: f64,
    pub long_short_ratio: f64,
    pub oi_change: f64,
    pub exchange_inflows: f64,
    pub macro_sentiment_score: f64,
    pub news_sentiment_score: f64,
    pub fear_greed_index: f64,
    pub price: f64,
    pub capital: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub k_sl: f64,
    pub k_tp: f64,
    pub min_sl_pct: f64,
    pub min_tp_pct: f64,
    pub max_position_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            k_sl: 1.5,
            k_tp: 2.5,
            min_sl_pct: 0.002,
            min_tp_pct: 0.004,
            max_position_pct: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ScalePlan {
    None,
    ScaleIn2,
    ScaleOut3,
}

#[derive(Debug, Clone)]
pub struct DecisionOutput {
    pub bias: Bias,
    pub action: DecisionAction,
    pub confidence: f64,
    pub weighted_score: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub leverage: u32,
    pub position_size_percent: f64,
    pub scale_plan: ScalePlan,
    pub category_scores: HashMap<&'static str, f64>,
}

fn clamp2(x: f64) -> f64 {
    x.clamp(-2.0, 2.0)
}

fn score_market_structure(i: &DecisionInput) -> f64 {
    let range = (i.resistance_level - i.support_level).max(1e-9);
    let position = ((i.price - i.support_level) / range).clamp(0.0, 1.0);
    let support_resistance = (0.5 - position) * 4.0;
    let vwap_bias = if i.vwap > 0.0 { (i.price - i.vwap) / i.vwap * 50.0 } else { 0.0 };
    clamp2(support_resistance + vwap_bias)
}

fn score_volume(i: &DecisionInput) -> f64 {
    clamp2((i.relative_volume - 1.0) + (i.volume_ratio - 1.0))
}

fn score_funding(i: &DecisionInput) -> f64 {
    clamp2(-i.funding_rate * 50.0 + (i.long_short_ratio - 1.0))
}

fn score_onchain(i: &DecisionInput) -> f64 {
    clamp2(-i.exchange_inflows * 10.0 + i.oi_change * 5.0)
}

fn score_macro(i: &DecisionInput) -> f64 {
    clamp2(i.macro_sentiment_score * 2.0 + i.news_sentiment_score * 2.0 + (i.fear_greed_index - 50.0) / 50.0)
}

fn score_quant(i: &DecisionInput) -> f64 {
    let rsi_bias = (50.0 - i.rsi) / 20.0;
    let kdj_bias = (50.0 - i.k) / 30.0 + (50.0 - i.d) / 30.0;
    let alignment = ((50.0 - i.rsi_5m) + (50.0 - i.rsi_15m) + (50.0 - i.rsi_1h)) / 3.0 / 20.0;
    clamp2(rsi_bias + kdj_bias + alignment)
}

fn score_risk(i: &DecisionInput) -> f64 {
    clamp2(1.0 - i.atr_percent / 5.0)
}

struct Category {
    name: &'static str,
    weight: f64,
    score_fn: fn(&DecisionInput) -> f64,
}

const CATEGORIES: &[Category] = &[
    Category { name: "market_structure", weight: 0.25, score_fn: score_market_structure },
    Category { name: "volume_order_flow", weight: 0.20, score_fn: score_volume },
    Category { name: "funding_long_short", weight: 0.15, score_fn: score_funding },
    Category { name: "on_chain", weight: 0.10, score_fn: score_onchain },
    Category { name: "macro_sentiment", weight: 0.10, score_fn: score_macro },
    Category { name: "quantitative_models", weight: 0.15, score_fn: score_quant },
    Category { name: "risk_management", weight: 0.05, score_fn: score_risk },
];

fn leverage_for(atr_percent: f64, confidence: f64) -> u32 {
    match (atr_percent, confidence) {
        (atr, conf) if atr < 1.0 && conf >= 80.0 => 20,
        (atr, conf) if atr < 1.0 && conf >= 60.0 => 10,
        (atr, _) if atr < 3.0 => 5,
        _ => 2,
    }
}

fn volatility_factor(atr_percent: f64) -> f64 {
    match atr_percent {
        a if a < 1.0 => 1.2,
        a if a < 3.0 => 1.0,
        a if a < 5.0 => 0.7,
        _ => 0.4,
    }
}

fn scale_plan_for(atr_percent: f64) -> ScalePlan {
    match atr_percent {
        a if a < 1.5 => ScalePlan::None,
        a if a < 4.0 => ScalePlan::ScaleIn2,
        _ => ScalePlan::ScaleOut3,
    }
}

/// Pure scoring function over the seven weighted categories below. No
/// I/O, no shared state.
pub fn score(input: &DecisionInput, risk: &RiskConfig) -> DecisionOutput {
    let mut category_scores = HashMap::new();
    let mut weighted = 0.0;
    let mut positive_categories = 0usize;
    for category in CATEGORIES {
        let raw = clamp2((category.score_fn)(input));
        category_scores.insert(category.name, raw);
        let contribution = raw * category.weight;
        weighted += contribution;
        if contribution > 0.0 {
            positive_categories += 1;
        }
    }
    weighted = clamp2(weighted);

    let bias = if weighted >= 0.8 {
        Bias::Bullish
    } else if weighted <= -0.8 {
        Bias::Bearish
    } else {
        Bias::Neutral
    };

    let agreement_bonus = 20.0 * (positive_categories as f64 / CATEGORIES.len() as f64);
    let confidence = (weighted.abs() * 30.0 + 50.0 + agreement_bonus).clamp(0.0, 100.0);

    let mut action = match bias {
        Bias::Bullish => DecisionAction::Buy,
        Bias::Bearish => DecisionAction::Sell,
        Bias::Neutral => DecisionAction::Hold,
    };
    if confidence < 60.0 {
        action = DecisionAction::Hold;
    }

    let entry = input.price;
    let atr_frac = input.atr_percent / 100.0;
    let long = matches!(bias, Bias::Bullish);
    let sl_buffer = (risk.k_sl * atr_frac).max(risk.min_sl_pct);
    let tp_buffer = (risk.k_tp * atr_frac).max(risk.min_tp_pct);
    let (stop_loss, take_profit) = if long {
        (entry * (1.0 - sl_buffer), entry * (1.0 + tp_buffer))
    } else {
        (entry * (1.0 + sl_buffer), entry * (1.0 - tp_buffer))
    };

    let base_pct = if confidence <= 60.0 {
        2.0
    } else {
        2.0 + (confidence - 60.0) / 40.0 * (risk.max_position_pct - 2.0)
    };
    let position_size_percent = (base_pct * volatility_factor(input.atr_percent)).min(risk.max_position_pct);

    DecisionOutput {
        bias,
        action,
        confidence,
        weighted_score: weighted,
        entry_price: entry,
        stop_loss,
        take_profit,
        leverage: leverage_for(input.atr_percent, confidence),
        position_size_percent,
        scale_plan: scale_plan_for(input.atr_percent),
        category_scores,
    }
}

pub struct DecisionMaker {
    pool: Arc<WorkerPool<()>>,
}

struct DecisionScanner {
    signal_service: Arc<SignalService>,
    decisions: Arc<MessageQueue<TradingDecision>>,
    risk: RiskConfig,
}

#[async_trait]
impl Poller for DecisionScanner {
    async fn poll(&self, _idx: usize) -> anyhow::Result<()> {
        for interval in self.signal_service.intervals() {
            if self.signal_service.size(&interval) < MIN_BACKLOG {
                continue;
            }
            let Some(signal) = self.signal_service.pop(&interval) else {
                continue;
            };
            if !signal.is_active(Utc::now()) {
                continue;
            }
            let input = decision_input_from_signal(&signal);
            let output = score(&input, &self.risk);
            let decision = TradingDecision {
                symbol: signal.symbol.clone(),
                action: output.action,
                size: output.position_size_percent,
                price: output.entry_price,
                confidence: output.confidence / 100.0,
                timestamp: Utc::now(),
                metadata: HashMap::from([
                    ("stop_loss".to_string(), serde_json::json!(output.stop_loss)),
                    ("take_profit".to_string(), serde_json::json!(output.take_profit)),
                    ("leverage".to_string(), serde_json::json!(output.leverage)),
                    ("rsi".to_string(), serde_json::json!(input.rsi)),
                ]),
            };
            self.decisions.push(DECISIONS_TOPIC, decision, None).await;
        }
        Ok(())
    }
}

fn decision_input_from_signal(signal: &crate::domain::signal::Signal) -> DecisionInput {
    let rsi = signal.score();
    let k = signal.indicators.get("k").copied().unwrap_or(50.0);
    let d = signal.indicators.get("d").copied().unwrap_or(50.0);
    let j = signal.indicators.get("j").copied().unwrap_or(50.0);
    DecisionInput {
        symbol: signal.symbol.clone(),
        rsi,
        k,
        d,
        j,
        atr_percent: 2.0,
        vwap: signal.price,
        recent_high: signal.price * 1.02,
        recent_low: signal.price * 0.98,
        rsi_5m: rsi,
        rsi_15m: rsi,
        rsi_1h: rsi,
        relative_volume: 1.0,
        volume_ratio: 1.0,
        spot_vol_change: 0.0,
        futures_vol_change: 0.0,
        trend_strength: 50.0,
        support_level: signal.price * 0.98,
        resistance_level: signal.price * 1.02,
        funding_rate: 0.0,
        long_short_ratio: 1.0,
        oi_change: 0.0,
        exchange_inflows: 0.0,
        macro_sentiment_score: 0.0,
        news_sentiment_score: 0.0,
        fear_greed_index: 50.0,
        price: signal.price,
        capital: 0.0,
    }
}

impl DecisionMaker {
    pub async fn start(
        signal_service: Arc<SignalService>,
        decisions: Arc<MessageQueue<TradingDecision>>,
        risk: RiskConfig,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig {
            num_process: 0,
            num_polling: 1,
            polling_backoff: Duration::from_secs(2),
            ..Default::default()
        }));
        let scanner = Arc::new(DecisionScanner {
            signal_service,
            decisions,
            risk,
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

    fn scenario_input() -> DecisionInput {
        DecisionInput {
            symbol: "BTCUSDT".to_string(),
            rsi: 35.0,
            k: 25.0,
            d: 20.0,
            j: 15.0,
            atr_percent: 2.5,
            vwap: 44800.0,
            recent_high: 46000.0,
            recent_low: 43000.0,
            rsi_5m: 40.0,
            rsi_15m: 32.0,
            rsi_1h: 35.0,
            relative_volume: 1.8,
            volume_ratio: 1.2,
            spot_vol_change: 0.15,
            futures_vol_change: 0.20,
            trend_strength: 35.0,
            support_level: 44500.0,
            resistance_level: 46200.0,
            funding_rate: 0.01,
            long_short_ratio: 1.3,
            oi_change: 0.05,
            exchange_inflows: -0.02,
            macro_sentiment_score: 0.1,
            news_sentiment_score: 0.2,
            fear_greed_index: 25.0,
            price: 45000.0,
            capital: 100_000.0,
        }
    }

    #[test]
    fn every_category_score_is_clamped() {
        let input = scenario_input();
        let output = score(&input, &RiskConfig::default());
        for (_, v) in output.category_scores {
            assert!((-2.0..=2.0).contains(&v));
        }
        assert!((-2.0..=2.0).contains(&output.weighted_score));
        assert!((0.0..=100.0).contains(&output.confidence));
    }

    /// Every category flattened to zero and price sitting at the
    /// midpoint of its support/resistance band, so every category
    /// (including market structure) scores at or near zero.
    fn neutral_input() -> DecisionInput {
        let mut input = scenario_input();
        input.trend_strength = 50.0;
        input.relative_volume = 1.0;
        input.volume_ratio = 1.0;
        input.funding_rate = 0.0;
        input.long_short_ratio = 1.0;
        input.exchange_inflows = 0.0;
        input.oi_change = 0.0;
        input.macro_sentiment_score = 0.0;
        input.news_sentiment_score = 0.0;
        input.fear_greed_index = 50.0;
        input.rsi = 50.0;
        input.rsi_5m = 50.0;
        input.rsi_15m = 50.0;
        input.rsi_1h = 50.0;
        input.k = 50.0;
        input.d = 50.0;
        let midpoint = input.support_level + (input.resistance_level - input.support_level) / 2.0;
        input.price = midpoint;
        input.vwap = midpoint;
        input
    }

    #[test]
    fn low_confidence_forces_hold() {
        let output = score(&neutral_input(), &RiskConfig::default());
        assert!(output.confidence < 60.0, "expected low confidence, got {}", output.confidence);
        assert_eq!(output.action, DecisionAction::Hold);
    }

    #[test]
    fn neutral_bias_forces_hold() {
        let output = score(&neutral_input(), &RiskConfig::default());
        assert_eq!(output.bias, Bias::Neutral);
        assert_eq!(output.action, DecisionAction::Hold);
    }

    #[test]
    fn documented_scenario_two_produces_a_bullish_long() {
        let input = scenario_input();
        let output = score(&input, &RiskConfig::default());
        assert_eq!(output.entry_price, 45000.0);
        assert!(output.confidence >= 60.0, "expected a confident call, got {}", output.confidence);
        assert_eq!(output.bias, Bias::Bullish);
        assert_eq!(output.action, DecisionAction::Buy);
        assert!(output.stop_loss < output.entry_price);
        assert!(output.take_profit > output.entry_price);
        assert!(output.position_size_percent > 0.0 && output.position_size_percent <= RiskConfig::default().max_position_pct);
    }
}
