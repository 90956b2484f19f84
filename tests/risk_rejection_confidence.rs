//! A low-confidence entry is rejected by the risk checker even though
//! the system is active, and never reaches the approved-orders topic.

use chrono::Utc;
use perpbot::application::guard::{Guard, GuardConfig};
use perpbot::application::risk_checker::{check_decision, RiskCheckerConfig};
use perpbot::domain::ports::NullNotifier;
use perpbot::domain::signal::{DecisionAction, TradingDecision};
use perpbot::domain::state::TradingState;
use std::collections::HashMap;
use std::sync::Arc;

#[test]
fn low_confidence_buy_under_active_system_is_rejected() {
    let guard = Guard::new(GuardConfig::default(), Arc::new(NullNotifier));
    let mut state = TradingState::default();
    state.account_equity = 100_000.0;

    let decision = TradingDecision {
        symbol: "BTCUSDT".to_string(),
        action: DecisionAction::Buy,
        size: 1.0,
        price: 45000.0,
        confidence: 0.5,
        timestamp: Utc::now(),
        metadata: HashMap::new(),
    };

    let verdict = check_decision(&decision, &state, &guard, &RiskCheckerConfig::default());
    assert_eq!(verdict, Err("confidence_below_floor"));

    state.system_status = perpbot::domain::state::SystemStatus::Active;
    assert_eq!(state.system_status, perpbot::domain::state::SystemStatus::Active);
}
