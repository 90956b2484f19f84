//! Wires every component into one running pipeline: ingester feeds the
//! market cache, the analyzer scores it onto `signals`, the signal
//! service prioritizes per interval, the decision maker promotes and
//! scores, the risk checker gates, and the executor places orders.
//! Shutdown tears each of those down in reverse dependency order.

use crate::application::analyzer::{Analyzer, AnalyzerConfig};
use crate::application::decision_maker::{DecisionMaker, RiskConfig as DecisionRiskConfig};
use crate::application::executor::{Executor, ExecutorConfig};
use crate::application::guard::{Guard, GuardConfig};
use crate::application::ingester::{Ingester, IngesterConfig};
use crate::application::market_cache::MarketCache;
use crate::application::risk_checker::{RiskChecker, RiskCheckerConfig};
use crate::application::signal_service::SignalService;
use crate::application::state_manager::StateManager;
use crate::collections::queue::MessageQueue;
use crate::config::{Config, Mode};
use crate::domain::errors::QueueError;
use crate::domain::ports::{ExchangeClient, Notifier, NullNotifier};
use crate::domain::signal::{Signal, TradingDecision};
use crate::domain::state::TradingState;
use crate::infrastructure::binance::{BinanceClient, MockExchangeClient};
use crate::infrastructure::notify::WebhookNotifier;
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::persistence::StatePersistence;
use crate::infrastructure::rate_limiter::RateLimiter;
use anyhow::Result;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

const SIGNAL_BRIDGE_GROUP: &str = "signal-service";
const MARKET_CACHE_CAPACITY: usize = 1_000;
const QUEUE_RETENTION: ChronoDuration = ChronoDuration::hours(1);
const HEAP_MAX_SIZE: usize = 256;
const GUARD_TICK_PERIOD: Duration = Duration::from_secs(10);

/// Everything built up-front, before any background task is spawned.
pub struct Application {
    config: Config,
    client: Arc<dyn ExchangeClient>,
    notifier: Arc<dyn Notifier>,
    market_cache: Arc<MarketCache>,
    signals: Arc<MessageQueue<Signal>>,
    decisions: Arc<MessageQueue<TradingDecision>>,
    approved: Arc<MessageQueue<TradingDecision>>,
    signal_service: Arc<SignalService>,
    guard: Arc<Guard>,
    state_manager: Arc<StateManager>,
    persistence: Arc<StatePersistence>,
    metrics: Metrics,
}

/// Handles to everything spawned by [`Application::start`], kept so
/// [`Application::shutdown`] can stop them in reverse dependency order.
pub struct Running {
    ingester: Arc<Ingester>,
    analyzer: Analyzer,
    decision_maker: DecisionMaker,
    risk_checker: RiskChecker,
    executor: Executor,
    guard_ticker: tokio::task::JoinHandle<()>,
    signal_bridge: tokio::task::JoinHandle<()>,
    persist_ticker: tokio::task::JoinHandle<()>,
    state_manager: Arc<StateManager>,
    notifier: Arc<dyn Notifier>,
    persistence: Arc<StatePersistence>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        info!(mode = ?config.mode, "building application");

        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_requests,
            Duration::from_secs(config.rate_limit_duration_secs),
        ));

        let client: Arc<dyn ExchangeClient> = match config.mode {
            Mode::Mock => Arc::new(MockExchangeClient::new(config.symbols.clone())),
            Mode::Live => Arc::new(BinanceClient::new(
                config.binance_api_key.clone(),
                config.binance_api_secret.clone(),
                config.binance_base_url.clone(),
                config.binance_ws_url.clone(),
                rate_limiter,
            )),
        };

        let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
            None => Arc::new(NullNotifier),
        };

        let persistence = Arc::new(StatePersistence::new(config.state_path.clone()));
        let initial_state = persistence.load().await?.unwrap_or_else(|| {
            let mut state = TradingState::default();
            state.account_equity = config.account_starting_equity;
            state
        });
        let state_manager = Arc::new(StateManager::new(initial_state));

        let guard_config = GuardConfig {
            daily_loss_limit: config.daily_loss_limit,
            min_equity: config.min_equity,
            max_drawdown: config.max_drawdown,
            max_positions: config.max_positions,
            ..GuardConfig::default()
        };
        let guard = Arc::new(Guard::new(guard_config, notifier.clone()));

        let metrics = Metrics::new()?;

        Ok(Self {
            market_cache: Arc::new(MarketCache::new(MARKET_CACHE_CAPACITY)),
            signals: Arc::new(MessageQueue::new(QUEUE_RETENTION)),
            decisions: Arc::new(MessageQueue::new(QUEUE_RETENTION)),
            approved: Arc::new(MessageQueue::new(QUEUE_RETENTION)),
            signal_service: Arc::new(SignalService::new(HEAP_MAX_SIZE)),
            guard,
            state_manager,
            persistence,
            metrics,
            client,
            notifier,
            config,
        })
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    pub fn state_handle(&self) -> Arc<RwLock<TradingState>> {
        self.state_manager.handle()
    }

    /// Starts every component. Ingestion (exchange universe + candle
    /// backfill) runs to completion before anything downstream starts.
    pub async fn start(self) -> Result<Running> {
        let ingester_config = IngesterConfig {
            intervals: self.config.intervals.clone(),
            candle_limit: self.config.candle_limit,
            blacklist: self.config.blacklist.clone(),
        };
        let ingester = Ingester::new(
            self.client.clone(),
            self.market_cache.clone(),
            self.notifier.clone(),
            ingester_config,
        );
        ingester.start().await?;

        let analyzer = Analyzer::start(
            AnalyzerConfig::default(),
            self.market_cache.clone(),
            self.signals.clone(),
        )
        .await;

        let signal_bridge = spawn_signal_bridge(self.signals.clone(), self.signal_service.clone());

        let decision_maker = DecisionMaker::start(
            self.signal_service.clone(),
            self.decisions.clone(),
            DecisionRiskConfig::default(),
        )
        .await;

        let risk_checker_config = RiskCheckerConfig {
            max_positions: self.config.max_positions,
            daily_loss_limit: self.config.daily_loss_limit,
            max_exposure_fraction: self.config.max_position_size_pct / 100.0,
            ..RiskCheckerConfig::default()
        };
        let risk_checker = RiskChecker::start(
            self.decisions.clone(),
            self.approved.clone(),
            self.state_manager.handle(),
            self.guard.clone(),
            risk_checker_config,
        )
        .await;

        let executor = Executor::start(self.approved.clone(), self.client.clone(), ExecutorConfig::default()).await;

        let guard_ticker = self.guard.clone().spawn_ticker(self.state_manager.handle(), GUARD_TICK_PERIOD);

        let persist_ticker = spawn_persist_ticker(
            self.state_manager.clone(),
            self.persistence.clone(),
            Duration::from_secs(self.config.state_snapshot_interval_secs),
        );

        info!("application started");

        Ok(Running {
            ingester,
            analyzer,
            decision_maker,
            risk_checker,
            executor,
            guard_ticker,
            signal_bridge,
            persist_ticker,
            state_manager: self.state_manager,
            notifier: self.notifier,
            persistence: self.persistence,
        })
    }
}

/// Relays `signals` topic messages into the priority-heap signal
/// service. The analyzer has no direct reference to `SignalService` so
/// that it can be tested (and reused) against a bare queue.
fn spawn_signal_bridge(
    signals: Arc<MessageQueue<Signal>>,
    signal_service: Arc<SignalService>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match signals.consume(super::analyzer::SIGNALS_TOPIC, SIGNAL_BRIDGE_GROUP).await {
                Ok(delivery) => {
                    signal_service.ingest(delivery.data);
                    signals
                        .commit(super::analyzer::SIGNALS_TOPIC, SIGNAL_BRIDGE_GROUP, delivery.offset)
                        .await;
                }
                Err(QueueError::NoMessage) => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Err(QueueError::MustCommitBeforeConsuming) => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    })
}

fn spawn_persist_ticker(
    state_manager: Arc<StateManager>,
    persistence: Arc<StatePersistence>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let snapshot = state_manager.snapshot().await;
            if let Err(e) = persistence.save(&snapshot).await {
                warn!(error = %e, "failed to persist trading state");
            }
        }
    })
}

impl Running {
    pub fn spawn_metrics_reporter(&self, metrics: Metrics, interval_seconds: u64) -> tokio::task::JoinHandle<()> {
        let reporter = MetricsReporter::new(self.state_manager.handle(), metrics, interval_seconds);
        tokio::spawn(reporter.run())
    }

    /// Shuts down executor -> analyzer -> market (ingester) -> guard ->
    /// notifier -> persist state -> queue background tasks.
    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down application");

        self.executor.stop().await;
        self.analyzer.stop().await;
        self.decision_maker.stop().await;
        self.risk_checker.stop().await;
        self.ingester.stop().await;

        self.guard_ticker.abort();
        self.signal_bridge.abort();
        self.persist_ticker.abort();

        let _ = self
            .notifier
            .notify("system", "perpbot shutting down, persisting final state")
            .await;

        let snapshot = self.state_manager.snapshot().await;
        self.persistence.save(&snapshot).await?;

        info!("shutdown complete");
        Ok(())
    }
}
