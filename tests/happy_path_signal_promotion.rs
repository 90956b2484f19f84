//! A descending-close candle run drives RSI(14) and KDJ into oversold
//! territory, and a single analyzer pass emits exactly one buy signal
//! for it.

use chrono::Duration as ChronoDuration;
use perpbot::application::analyzer::{Analyzer, AnalyzerConfig, SIGNALS_TOPIC};
use perpbot::application::market_cache::MarketCache;
use perpbot::collections::queue::MessageQueue;
use perpbot::domain::candle::Candlestick;
use perpbot::domain::signal::SignalAction;
use std::sync::Arc;
use std::time::Duration;

fn descending_candle(idx: i64, close: f64) -> Candlestick {
    Candlestick {
        open_time_ms: idx * 3_600_000,
        close_time_ms: idx * 3_600_000 + 3_599_999,
        open: (close + 1.0).to_string(),
        high: (close + 1.5).to_string(),
        low: (close - 0.5).to_string(),
        close: close.to_string(),
        volume: "100".to_string(),
    }
}

#[tokio::test]
async fn oversold_run_emits_exactly_one_buy_signal() {
    let market_cache = Arc::new(MarketCache::new(200));
    let mut price = 50_000.0;
    for i in 0..100 {
        market_cache.create_candle("BTCUSDT", "1h", descending_candle(i, price), i * 3_600_000);
        price -= 5.0;
    }

    let signals = Arc::new(MessageQueue::new(ChronoDuration::hours(1)));
    let analyzer = Analyzer::start(
        AnalyzerConfig { scan_period: Duration::from_secs(3600), ..AnalyzerConfig::default() },
        market_cache,
        signals.clone(),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    analyzer.stop().await;

    let delivery = signals
        .consume(SIGNALS_TOPIC, "test")
        .await
        .expect("expected a promoted signal");
    assert_eq!(delivery.data.symbol, "BTCUSDT");
    assert_eq!(delivery.data.interval, "1h");
    assert_eq!(delivery.data.action, SignalAction::Buy);
    assert!(delivery.data.indicators["rsi"] <= 30.0);

    signals.commit(SIGNALS_TOPIC, "test", delivery.offset).await;
    assert!(matches!(
        signals.consume(SIGNALS_TOPIC, "test").await,
        Err(perpbot::domain::errors::QueueError::NoMessage)
    ));
}
