//! The safety rule engine. A fixed battery of priority-ordered
//! rules evaluated against [`TradingState`] on a ticker; each rule's
//! violations accumulate in a per-rule circuit breaker that escalates
//! WARN -> PAUSE -> EMERGENCY_STOP on consecutive hits.

use crate::domain::ports::Notifier;
use crate::domain::state::{SystemStatus, TradingState};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Warn,
    Pause,
    EmergencyStop,
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub rule: &'static str,
    pub severity: Severity,
    pub action: Action,
    pub message: String,
}

pub struct Rule {
    pub name: &'static str,
    pub priority: u32,
    pub check: fn(&TradingState, &GuardConfig) -> Option<Violation>,
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub daily_loss_limit: f64,
    pub min_equity: f64,
    pub max_drawdown: f64,
    pub max_positions: usize,
    pub max_single_notional: f64,
    pub max_total_notional: f64,
    pub stale_state_warn: ChronoDuration,
    pub stale_state_pause: ChronoDuration,
    pub stale_order_warn: ChronoDuration,
    pub consecutive_for_severity: HashMap<&'static str, u32>,
    pub cooldown_for_severity: HashMap<&'static str, ChronoDuration>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit: 1000.0,
            min_equity: 500.0,
            max_drawdown: 0.20,
            max_positions: 5,
            max_single_notional: 5_000.0,
            max_total_notional: 15_000.0,
            stale_state_warn: ChronoDuration::minutes(5),
            stale_state_pause: ChronoDuration::minutes(15),
            stale_order_warn: ChronoDuration::minutes(30),
            consecutive_for_severity: HashMap::from([
                ("MEDIUM", 3),
                ("HIGH", 3),
                ("CRITICAL", 1),
            ]),
            cooldown_for_severity: HashMap::from([
                ("MEDIUM", ChronoDuration::minutes(5)),
                ("HIGH", ChronoDuration::minutes(15)),
                ("CRITICAL", ChronoDuration::hours(1)),
            ]),
        }
    }
}

fn severity_key(s: Severity) -> &'static str {
    match s {
        Severity::Medium => "MEDIUM",
        Severity::High => "HIGH",
        Severity::Critical => "CRITICAL",
    }
}

fn rule_daily_loss(state: &TradingState, cfg: &GuardConfig) -> Option<Violation> {
    let loss = -state.daily_pnl;
    if loss >= cfg.daily_loss_limit {
        Some(Violation {
            rule: "daily_loss_limit",
            severity: Severity::Critical,
            action: Action::EmergencyStop,
            message: format!("daily loss {loss} >= limit {}", cfg.daily_loss_limit),
        })
    } else if loss >= cfg.daily_loss_limit * 0.8 {
        Some(Violation {
            rule: "daily_loss_limit",
            severity: Severity::High,
            action: Action::Pause,
            message: format!("daily loss {loss} >= 80% of limit {}", cfg.daily_loss_limit),
        })
    } else {
        None
    }
}

fn rule_account_balance(state: &TradingState, cfg: &GuardConfig) -> Option<Violation> {
    if state.account_equity <= cfg.min_equity {
        Some(Violation {
            rule: "account_balance",
            severity: Severity::Critical,
            action: Action::EmergencyStop,
            message: format!("equity {} <= minimum {}", state.account_equity, cfg.min_equity),
        })
    } else if state.account_equity <= cfg.min_equity * 3.0 {
        Some(Violation {
            rule: "account_balance",
            severity: Severity::High,
            action: Action::Pause,
            message: format!("equity {} <= 3x minimum {}", state.account_equity, cfg.min_equity),
        })
    } else {
        None
    }
}

fn rule_drawdown(state: &TradingState, cfg: &GuardConfig) -> Option<Violation> {
    if state.drawdown >= cfg.max_drawdown {
        Some(Violation {
            rule: "drawdown",
            severity: Severity::Critical,
            action: Action::EmergencyStop,
            message: format!("drawdown {} >= {}", state.drawdown, cfg.max_drawdown),
        })
    } else if state.drawdown >= cfg.max_drawdown * 0.8 {
        Some(Violation {
            rule: "drawdown",
            severity: Severity::High,
            action: Action::Pause,
            message: format!("drawdown {} >= 80% of {}", state.drawdown, cfg.max_drawdown),
        })
    } else {
        None
    }
}

fn rule_market_volatility(state: &TradingState, _cfg: &GuardConfig) -> Option<Violation> {
    let active: Vec<_> = state.positions.values().filter(|p| p.is_active).collect();
    if active.is_empty() {
        return None;
    }
    let moved = active
        .iter()
        .filter(|p| {
            let pct = (p.current_price - p.entry_price).abs() / p.entry_price.max(1e-9);
            pct > 0.05
        })
        .count();
    if moved as f64 / active.len() as f64 >= 0.5 {
        Some(Violation {
            rule: "market_volatility",
            severity: Severity::High,
            action: Action::Pause,
            message: format!("{moved}/{} active positions moved > 5% since entry", active.len()),
        })
    } else {
        None
    }
}

fn rule_max_positions(state: &TradingState, cfg: &GuardConfig) -> Option<Violation> {
    let active = state.active_position_count();
    if active >= cfg.max_positions {
        Some(Violation {
            rule: "max_positions",
            severity: Severity::High,
            action: Action::Pause,
            message: format!("active positions {active} >= max {}", cfg.max_positions),
        })
    } else if active as f64 >= cfg.max_positions as f64 * 0.9 {
        Some(Violation {
            rule: "max_positions",
            severity: Severity::Medium,
            action: Action::Warn,
            message: format!("active positions {active} >= 90% of max {}", cfg.max_positions),
        })
    } else {
        None
    }
}

fn rule_connection_health(state: &TradingState, cfg: &GuardConfig) -> Option<Violation> {
    let age = Utc::now() - state.last_updated;
    if age > cfg.stale_state_pause {
        Some(Violation {
            rule: "connection_health",
            severity: Severity::High,
            action: Action::Pause,
            message: format!("state not updated for {age}"),
        })
    } else if age > cfg.stale_state_warn {
        Some(Violation {
            rule: "connection_health",
            severity: Severity::Medium,
            action: Action::Warn,
            message: format!("state not updated for {age}"),
        })
    } else if state
        .pending_orders
        .values()
        .any(|o| Utc::now() - o.created_at > cfg.stale_order_warn)
    {
        Some(Violation {
            rule: "connection_health",
            severity: Severity::Medium,
            action: Action::Warn,
            message: "a pending order has been open for over 30 minutes".to_string(),
        })
    } else {
        None
    }
}

fn rule_position_size(state: &TradingState, cfg: &GuardConfig) -> Option<Violation> {
    let total: f64 = state.positions.values().filter(|p| p.is_active).map(|p| p.notional()).sum();
    if total > cfg.max_total_notional {
        return Some(Violation {
            rule: "position_size",
            severity: Severity::High,
            action: Action::Pause,
            message: format!("total exposure {total} > {}", cfg.max_total_notional),
        });
    }
    if let Some(p) = state.positions.values().find(|p| p.is_active && p.notional() > cfg.max_single_notional) {
        return Some(Violation {
            rule: "position_size",
            severity: Severity::Medium,
            action: Action::Warn,
            message: format!("{} notional {} > {}", p.symbol, p.notional(), cfg.max_single_notional),
        });
    }
    None
}

fn rule_system_status(state: &TradingState, _cfg: &GuardConfig) -> Option<Violation> {
    match state.system_status {
        SystemStatus::Emergency if Utc::now() - state.last_updated > ChronoDuration::hours(24) => {
            Some(Violation {
                rule: "system_status",
                severity: Severity::Medium,
                action: Action::Warn,
                message: "system has been in EMERGENCY for over 24h".to_string(),
            })
        }
        SystemStatus::Paused if state.active_position_count() > 0 => Some(Violation {
            rule: "system_status",
            severity: Severity::Medium,
            action: Action::Warn,
            message: "system is PAUSED with active positions still open".to_string(),
        }),
        _ => None,
    }
}

const RULES: &[Rule] = &[
    Rule { name: "daily_loss_limit", priority: 100, check: rule_daily_loss },
    Rule { name: "account_balance", priority: 95, check: rule_account_balance },
    Rule { name: "drawdown", priority: 90, check: rule_drawdown },
    Rule { name: "market_volatility", priority: 85, check: rule_market_volatility },
    Rule { name: "max_positions", priority: 80, check: rule_max_positions },
    Rule { name: "connection_health", priority: 75, check: rule_connection_health },
    Rule { name: "position_size", priority: 70, check: rule_position_size },
    Rule { name: "system_status", priority: 60, check: rule_system_status },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Triggered,
}

struct Breaker {
    state: BreakerState,
    consecutive: u32,
    cooldown_until: Option<DateTime<Utc>>,
}

impl Default for Breaker {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive: 0,
            cooldown_until: None,
        }
    }
}

pub struct Guard {
    config: GuardConfig,
    breakers: RwLock<HashMap<&'static str, Breaker>>,
    notifier: Arc<dyn Notifier>,
}

impl Guard {
    pub fn new(config: GuardConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            notifier,
        }
    }

    /// Highest-priority rules run first; a rule that currently has an
    /// open, unexpired breaker is still checked (so it can close again)
    /// but its action is not re-applied while in cooldown.
    pub async fn evaluate(&self, state: &mut TradingState) -> Vec<Violation> {
        let mut fired = Vec::new();
        let mut ordered: Vec<&Rule> = RULES.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        for rule in ordered {
            let violation = (rule.check)(state, &self.config);
            let escalate = self.record(rule.name, violation.as_ref());
            if let Some(violation) = violation {
                if escalate {
                    self.apply(&violation, state).await;
                    fired.push(violation);
                }
            }
        }
        fired
    }

    /// Updates the named breaker's consecutive-violation count; returns
    /// `true` once the severity's required consecutive count is hit and
    /// the breaker is not already in cooldown.
    fn record(&self, rule: &'static str, violation: Option<&Violation>) -> bool {
        let mut breakers = self.breakers.write().expect("guard lock poisoned");
        let breaker = breakers.entry(rule).or_default();
        let now = Utc::now();

        if breaker.state == BreakerState::Triggered {
            if let Some(until) = breaker.cooldown_until {
                if now >= until && violation.is_none() {
                    breaker.state = BreakerState::Closed;
                    breaker.consecutive = 0;
                    breaker.cooldown_until = None;
                }
            }
        }

        match violation {
            None => {
                if breaker.state == BreakerState::Closed {
                    breaker.consecutive = 0;
                }
                false
            }
            Some(v) => {
                breaker.consecutive += 1;
                let needed = *self.config.consecutive_for_severity.get(severity_key(v.severity)).unwrap_or(&3);
                if breaker.state == BreakerState::Closed && breaker.consecutive >= needed {
                    let cooldown = *self
                        .config
                        .cooldown_for_severity
                        .get(severity_key(v.severity))
                        .unwrap_or(&ChronoDuration::minutes(5));
                    breaker.state = BreakerState::Triggered;
                    breaker.cooldown_until = Some(now + cooldown);
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn apply(&self, violation: &Violation, state: &mut TradingState) {
        warn!(rule = violation.rule, severity = ?violation.severity, "guard violation");
        match violation.action {
            Action::Warn => {
                let _ = self.notifier.notify("guard", &violation.message).await;
            }
            Action::Pause => {
                state.system_status = SystemStatus::Paused;
                let _ = self.notifier.notify("guard", &format!("PAUSED: {}", violation.message)).await;
            }
            Action::EmergencyStop => {
                state.system_status = SystemStatus::Emergency;
                let _ = self
                    .notifier
                    .notify("guard", &format!("EMERGENCY_STOP: {}", violation.message))
                    .await;
                info!("guard requested cancellation of all open orders");
            }
        }
    }

    pub fn is_breaker_open(&self, rule: &str) -> bool {
        let breakers = self.breakers.read().expect("guard lock poisoned");
        breakers
            .get(rule)
            .map(|b| b.state == BreakerState::Triggered && b.cooldown_until.map(|u| Utc::now() < u).unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn any_breaker_open(&self) -> bool {
        RULES.iter().any(|r| self.is_breaker_open(r.name))
    }

    pub fn spawn_ticker(self: Arc<Self>, state: Arc<tokio::sync::RwLock<TradingState>>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let mut state = state.write().await;
                self.evaluate(&mut state).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::orders::{Position, PositionSide};

    fn state_with_equity(equity: f64) -> TradingState {
        let mut s = TradingState::default();
        s.account_equity = equity;
        s
    }

    #[tokio::test]
    async fn daily_loss_at_limit_triggers_critical_on_first_hit() {
        let guard = Guard::new(
            GuardConfig {
                daily_loss_limit: 100.0,
                ..GuardConfig::default()
            },
            Arc::new(crate::domain::ports::NullNotifier),
        );
        let mut state = state_with_equity(10_000.0);
        state.daily_pnl = -100.0;
        let violations = guard.evaluate(&mut state).await;
        assert!(violations.iter().any(|v| v.rule == "daily_loss_limit" && v.action == Action::EmergencyStop));
        assert_eq!(state.system_status, SystemStatus::Emergency);
    }

    #[tokio::test]
    async fn breaker_requires_n_consecutive_violations_for_lower_severities() {
        let guard = Guard::new(GuardConfig::default(), Arc::new(crate::domain::ports::NullNotifier));
        let mut state = TradingState::default();
        for i in 0..5 {
            state.positions.insert(
                format!("SYM{i}"),
                Position {
                    symbol: format!("SYM{i}"),
                    side: PositionSide::Long,
                    size: 1.0,
                    entry_price: 100.0,
                    current_price: 100.0,
                    unrealized_pnl: 0.0,
                    leverage: 1,
                    open_time: Utc::now(),
                    stop_loss: None,
                    take_profit: None,
                    is_active: true,
                },
            );
        }
        state.account_equity = 10_000.0;

        let mut escalations = 0;
        for _ in 0..3 {
            let v = guard.evaluate(&mut state).await;
            if v.iter().any(|v| v.rule == "max_positions") {
                escalations += 1;
            }
        }
        assert_eq!(escalations, 1, "breaker should only fire once the 3rd consecutive hit lands");
    }

    #[tokio::test]
    async fn clean_check_after_cooldown_closes_the_breaker() {
        let guard = Guard::new(
            GuardConfig {
                daily_loss_limit: 100.0,
                cooldown_for_severity: HashMap::from([("CRITICAL", ChronoDuration::milliseconds(20))]),
                ..GuardConfig::default()
            },
            Arc::new(crate::domain::ports::NullNotifier),
        );
        let mut state = state_with_equity(10_000.0);
        state.daily_pnl = -100.0;
        guard.evaluate(&mut state).await;
        assert!(guard.is_breaker_open("daily_loss_limit"));

        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        state.daily_pnl = 0.0;
        guard.evaluate(&mut state).await;
        assert!(!guard.is_breaker_open("daily_loss_limit"));
    }
}
