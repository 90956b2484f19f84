//! Signal and trading-decision types that flow through the message queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub interval: String,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub action: SignalAction,
    pub strength: f64,
    pub confidence: f64,
    pub price: f64,
    pub strategy: String,
    pub indicators: HashMap<String, f64>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Signal {
    /// `is_active ⇔ (now < expires_at)`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// `ID() = symbol + "-" + interval`.
    pub fn id(&self) -> String {
        format!("{}-{}", self.symbol, self.interval)
    }

    /// `Score() = indicators["rsi"]`.
    pub fn score(&self) -> f64 {
        self.indicators.get("rsi").copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionAction {
    Buy,
    Sell,
    Close,
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingDecision {
    pub symbol: String,
    pub action: DecisionAction,
    pub size: f64,
    pub price: f64,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_signal(expires_in: Duration) -> Signal {
        let now = Utc::now();
        Signal {
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            signal_type: SignalType::Entry,
            action: SignalAction::Buy,
            strength: 0.8,
            confidence: 0.7,
            price: 45000.0,
            strategy: "rsi-kdj".to_string(),
            indicators: HashMap::from([("rsi".to_string(), 28.0)]),
            metadata: HashMap::new(),
            created_at: now,
            expires_at: now + expires_in,
        }
    }

    #[test]
    fn id_concatenates_symbol_and_interval() {
        let s = sample_signal(Duration::minutes(10));
        assert_eq!(s.id(), "BTCUSDT-1h");
    }

    #[test]
    fn score_reads_rsi_indicator() {
        let s = sample_signal(Duration::minutes(10));
        assert_eq!(s.score(), 28.0);
    }

    #[test]
    fn active_iff_not_expired() {
        let s = sample_signal(Duration::minutes(10));
        assert!(s.is_active(Utc::now()));
        let expired = sample_signal(Duration::seconds(-1));
        assert!(!expired.is_active(Utc::now()));
    }
}
