//! A bullish multi-factor feature vector at entry price 45000 scores
//! as a long with a sane bracket and a position size within bounds.

use perpbot::application::decision_maker::{DecisionInput, RiskConfig};
use perpbot::domain::signal::DecisionAction;

fn bullish_input() -> DecisionInput {
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
fn bullish_vector_at_45000_produces_a_bounded_long() {
    let risk = RiskConfig::default();
    let input = bullish_input();
    let output = perpbot::application::decision_maker::score(&input, &risk);

    assert_eq!(output.entry_price, 45000.0);
    assert!(output.confidence >= 60.0, "expected a confident call, got {}", output.confidence);
    assert_eq!(output.action, DecisionAction::Buy);
    assert!(output.stop_loss < output.entry_price);
    assert!(output.take_profit > output.entry_price);
    assert!(output.position_size_percent > 0.0);
    assert!(output.position_size_percent <= risk.max_position_pct);
}
