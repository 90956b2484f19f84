//! Layered configuration: environment variables override an optional TOML
//! file, which overrides built-in defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Mock,
    Live,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Mode::Mock),
            "live" => Ok(Mode::Live),
            _ => anyhow::bail!("invalid MODE: {s}, must be 'mock' or 'live'"),
        }
    }
}

/// Mirrors the subset of fields a `config.toml` file may set. Every field is
/// optional: an absent key simply falls through to the built-in default (or
/// to the environment variable, which wins over both).
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    market: FileMarket,
    #[serde(default)]
    risk: FileRisk,
    #[serde(default)]
    guard: FileGuard,
    #[serde(default)]
    binance: FileBinance,
}

#[derive(Debug, Default, Deserialize)]
struct FileBinance {
    #[serde(default)]
    rate_limit: FileRateLimit,
}

#[derive(Debug, Default, Deserialize)]
struct FileRateLimit {
    requests: Option<u32>,
    duration: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileMarket {
    symbols: Option<Vec<String>>,
    intervals: Option<Vec<String>>,
    blacklist: Option<Vec<String>>,
    candle_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRisk {
    max_positions: Option<usize>,
    daily_loss_limit: Option<f64>,
    max_position_size_pct: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileGuard {
    max_drawdown: Option<f64>,
    min_equity: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub binance_api_key: String,
    pub binance_api_secret: String,
    pub binance_base_url: String,
    pub binance_ws_url: String,
    pub symbols: Vec<String>,
    pub intervals: Vec<String>,
    pub blacklist: HashSet<String>,
    pub candle_limit: usize,
    pub max_positions: usize,
    pub daily_loss_limit: f64,
    pub max_position_size_pct: f64,
    pub max_drawdown: f64,
    pub min_equity: f64,
    pub account_starting_equity: f64,
    pub state_path: String,
    pub state_snapshot_interval_secs: u64,
    pub notify_webhook_url: Option<String>,
    pub observability_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_duration_secs: u64,
}

impl Config {
    /// Loads `.env` at `env_path` (if given, else the process default), then
    /// an optional TOML file at `config_path`, then env vars, building the
    /// final config with env > TOML > defaults precedence.
    pub fn load(env_path: Option<&Path>, config_path: Option<&Path>) -> Result<Self> {
        match env_path {
            Some(p) => {
                dotenvy::from_path(p).with_context(|| format!("loading env file {p:?}"))?;
            }
            None => {
                let _ = dotenvy::dotenv();
            }
        }

        let file = match config_path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("reading config file {p:?}"))?;
                toml::from_str::<FileConfig>(&text)
                    .with_context(|| format!("parsing config file {p:?}"))?
            }
            None => FileConfig::default(),
        };

        Self::build(file)
    }

    fn build(file: FileConfig) -> Result<Self> {
        let mode_str = env::var("MODE").unwrap_or_else(|_| "mock".to_string());
        let mode = Mode::from_str(&mode_str)?;

        let binance_api_key = env::var("BINANCE_API_KEY").unwrap_or_default();
        let binance_api_secret = env::var("BINANCE_API_SECRET").unwrap_or_default();
        let binance_base_url = env::var("BINANCE_BASE_URL")
            .unwrap_or_else(|_| "https://fapi.binance.com".to_string());
        let binance_ws_url = env::var("BINANCE_WS_URL")
            .unwrap_or_else(|_| "wss://fstream.binance.com".to_string());
        url::Url::parse(&binance_base_url).context("invalid BINANCE_BASE_URL")?;
        url::Url::parse(&binance_ws_url).context("invalid BINANCE_WS_URL")?;

        let symbols = match env::var("SYMBOLS") {
            Ok(s) => s.split(',').map(|x| x.trim().to_string()).collect(),
            Err(_) => file.market.symbols.unwrap_or_else(|| vec!["BTCUSDT".to_string()]),
        };

        let intervals = match env::var("INTERVALS") {
            Ok(s) => s.split(',').map(|x| x.trim().to_string()).collect(),
            Err(_) => file.market.intervals.unwrap_or_else(|| vec!["1h".to_string()]),
        };

        let blacklist: HashSet<String> = match env::var("BLACKLIST") {
            Ok(s) if !s.is_empty() => s.split(',').map(|x| x.trim().to_string()).collect(),
            _ => file.market.blacklist.unwrap_or_default().into_iter().collect(),
        };

        let candle_limit = env_or_file("CANDLE_LIMIT", file.market.candle_limit, 500)?;
        let max_positions = env_or_file("MAX_POSITIONS", file.risk.max_positions, 5)?;
        let daily_loss_limit = env_or_file("DAILY_LOSS_LIMIT", file.risk.daily_loss_limit, 1000.0)?;
        let max_position_size_pct =
            env_or_file("MAX_POSITION_SIZE_PCT", file.risk.max_position_size_pct, 10.0)?;
        let max_drawdown = env_or_file("MAX_DRAWDOWN", file.guard.max_drawdown, 0.20)?;
        let min_equity = env_or_file("MIN_EQUITY", file.guard.min_equity, 500.0)?;

        let account_starting_equity = env::var("ACCOUNT_STARTING_EQUITY")
            .unwrap_or_else(|_| "10000.0".to_string())
            .parse::<f64>()
            .context("failed to parse ACCOUNT_STARTING_EQUITY")?;

        let state_path = env::var("STATE_PATH").unwrap_or_else(|_| "state.json".to_string());
        let state_snapshot_interval_secs = env::var("STATE_SNAPSHOT_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("failed to parse STATE_SNAPSHOT_INTERVAL_SECS")?;

        let notify_webhook_url = env::var("NOTIFY_WEBHOOK_URL").ok();
        if let Some(webhook) = &notify_webhook_url {
            url::Url::parse(webhook).context("invalid NOTIFY_WEBHOOK_URL")?;
        }
        let observability_enabled = env::var("OBSERVABILITY_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let rate_limit_requests =
            env_or_file("BINANCE_RATE_LIMIT_REQUESTS", file.binance.rate_limit.requests, 20)?;
        let rate_limit_duration_secs =
            env_or_file("BINANCE_RATE_LIMIT_DURATION_SECS", file.binance.rate_limit.duration, 1)?;

        Ok(Config {
            mode,
            binance_api_key,
            binance_api_secret,
            binance_base_url,
            binance_ws_url,
            symbols,
            intervals,
            blacklist,
            candle_limit,
            max_positions,
            daily_loss_limit,
            max_position_size_pct,
            max_drawdown,
            min_equity,
            account_starting_equity,
            state_path,
            state_snapshot_interval_secs,
            notify_webhook_url,
            observability_enabled,
            rate_limit_requests,
            rate_limit_duration_secs,
        })
    }
}

fn env_or_file<T>(key: &str, file_value: Option<T>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(s) => s
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("failed to parse {key}: {e}")),
        Err(_) => Ok(file_value.unwrap_or(default)),
    }
}
