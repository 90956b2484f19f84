//! A daily loss at the configured limit trips the guard straight to
//! EMERGENCY_STOP on the first evaluation, and the risk checker then
//! rejects any further decision.

use chrono::Utc;
use perpbot::application::guard::{Action, Guard, GuardConfig};
use perpbot::application::risk_checker::{check_decision, RiskCheckerConfig};
use perpbot::domain::ports::NullNotifier;
use perpbot::domain::signal::{DecisionAction, TradingDecision};
use perpbot::domain::state::{SystemStatus, TradingState};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test]
async fn daily_loss_at_limit_halts_trading() {
    let guard = Guard::new(
        GuardConfig {
            daily_loss_limit: 100.0,
            ..GuardConfig::default()
        },
        Arc::new(NullNotifier),
    );

    let mut state = TradingState::default();
    state.account_equity = 10_000.0;
    state.daily_pnl = -100.0;

    let violations = guard.evaluate(&mut state).await;
    assert!(violations.iter().any(|v| v.rule == "daily_loss_limit" && v.action == Action::EmergencyStop));
    assert_eq!(state.system_status, SystemStatus::Emergency);

    let decision = TradingDecision {
        symbol: "ETHUSDT".to_string(),
        action: DecisionAction::Buy,
        size: 1.0,
        price: 3000.0,
        confidence: 0.9,
        timestamp: Utc::now(),
        metadata: HashMap::new(),
    };
    let verdict = check_decision(&decision, &state, &guard, &RiskCheckerConfig::default());
    assert_eq!(verdict, Err("system_not_active"));
}
