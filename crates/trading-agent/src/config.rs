use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use decision_core::{DecisionError, Granularity};
use decision_orchestrator::{EngineConfig, GateConfig};
use rust_decimal::Decimal;

/// What the agent does after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// One decision cycle against the paper broker, then exit.
    Cycle,
    /// Decision cycles on a fixed interval until SIGINT/SIGTERM.
    Loop,
    /// Replay the CSV data through the engine and print a JSON report.
    Backtest,
}

impl FromStr for AgentMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cycle" | "once" => Ok(AgentMode::Cycle),
            "loop" => Ok(AgentMode::Loop),
            "backtest" => Ok(AgentMode::Backtest),
            other => bail!("unknown mode '{}' (expected cycle, loop or backtest)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub mode: AgentMode,
    pub portfolio_id: String,

    // Portfolio
    pub initial_cash: Decimal,

    // Market data
    pub data_dir: PathBuf,
    pub benchmark_symbol: String,
    /// Empty means every CSV in `data_dir`.
    pub symbols: Vec<String>,
    pub granularity: Granularity,
    pub lookback_bars: usize,
    /// Pretend "now" is this instant when reading data (replaying old CSVs).
    pub as_of: Option<DateTime<Utc>>,

    // Loop
    pub loop_interval_seconds: u64,
    pub ignore_market_hours: bool,
    pub metrics_log_interval_cycles: u64,

    // Gate and drawdown
    pub min_conviction: f64,
    pub max_position_pct: Decimal,
    pub min_cash_pct: Decimal,
    pub min_trade_size: Decimal,
    pub max_drawdown: Decimal,

    // Reasoning backend (optional)
    pub reasoning_url: Option<String>,
    pub reasoning_api_key: Option<String>,
    pub reasoning_model: String,
    pub reasoning_timeout_seconds: u64,
    /// Classify the regime with the reasoning backend instead of the rule-based detector.
    pub reasoning_regime: bool,

    // Backtest window
    pub backtest_start: Option<DateTime<Utc>>,
    pub backtest_end: Option<DateTime<Utc>>,

    // Database
    pub database_url: String,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            mode: var("AGENT_MODE", "cycle").parse()?,
            portfolio_id: var("PORTFOLIO_ID", "default"),

            initial_cash: var("INITIAL_CASH", "10000")
                .parse()
                .context("INITIAL_CASH must be a decimal")?,

            data_dir: PathBuf::from(var("DATA_DIR", "data")),
            benchmark_symbol: var("BENCHMARK_SYMBOL", "SPY").trim().to_uppercase(),
            symbols: var("SYMBOLS", "")
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            granularity: var("GRANULARITY", "daily")
                .parse::<Granularity>()
                .map_err(anyhow::Error::msg)?,
            lookback_bars: var("LOOKBACK_BARS", "250").parse()?,
            as_of: optional("AS_OF").map(|v| parse_time("AS_OF", &v)).transpose()?,

            loop_interval_seconds: var("LOOP_INTERVAL", "300").parse()?,
            ignore_market_hours: var("IGNORE_MARKET_HOURS", "true").parse()?,
            metrics_log_interval_cycles: var("METRICS_LOG_INTERVAL", "10").parse()?,

            min_conviction: var("MIN_CONVICTION", "0.3").parse()?,
            max_position_pct: var("MAX_POSITION_PCT", "0.10").parse()?,
            min_cash_pct: var("MIN_CASH_PCT", "0.05").parse()?,
            min_trade_size: var("MIN_TRADE_SIZE", "50").parse()?,
            max_drawdown: var("MAX_DRAWDOWN", "0.25").parse()?,

            reasoning_url: optional("REASONING_URL"),
            reasoning_api_key: optional("REASONING_API_KEY"),
            reasoning_model: var("REASONING_MODEL", "default"),
            reasoning_timeout_seconds: var("REASONING_TIMEOUT", "30").parse()?,
            reasoning_regime: var("REASONING_REGIME", "false").parse()?,

            backtest_start: optional("BACKTEST_START")
                .map(|v| parse_time("BACKTEST_START", &v))
                .transpose()?,
            backtest_end: optional("BACKTEST_END")
                .map(|v| parse_time("BACKTEST_END", &v))
                .transpose()?,

            database_url: var("DATABASE_URL", "sqlite:portfolio.db"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DecisionError> {
        if self.initial_cash <= Decimal::ZERO {
            return Err(DecisionError::Config(format!("INITIAL_CASH must be positive, got {}", self.initial_cash)));
        }
        if !(0.0..=1.0).contains(&self.min_conviction) {
            return Err(DecisionError::Config(format!("MIN_CONVICTION must be within [0, 1], got {}", self.min_conviction)));
        }
        if self.max_position_pct <= Decimal::ZERO || self.max_position_pct > Decimal::ONE {
            return Err(DecisionError::Config(format!("MAX_POSITION_PCT must be within (0, 1], got {}", self.max_position_pct)));
        }
        if self.min_cash_pct < Decimal::ZERO || self.min_cash_pct >= Decimal::ONE {
            return Err(DecisionError::Config(format!("MIN_CASH_PCT must be within [0, 1), got {}", self.min_cash_pct)));
        }
        if self.min_trade_size < Decimal::ZERO {
            return Err(DecisionError::Config(format!("MIN_TRADE_SIZE must not be negative, got {}", self.min_trade_size)));
        }
        if self.max_drawdown <= Decimal::ZERO || self.max_drawdown > Decimal::ONE {
            return Err(DecisionError::Config(format!("MAX_DRAWDOWN must be within (0, 1], got {}", self.max_drawdown)));
        }
        if self.lookback_bars == 0 {
            return Err(DecisionError::Config("LOOKBACK_BARS must be at least 1".to_string()));
        }
        if self.mode == AgentMode::Loop && self.loop_interval_seconds == 0 {
            return Err(DecisionError::Config("LOOP_INTERVAL must be at least 1 second".to_string()));
        }
        if self.reasoning_regime && self.reasoning_url.is_none() {
            return Err(DecisionError::Config("REASONING_REGIME requires REASONING_URL".to_string()));
        }
        if let (Some(start), Some(end)) = (self.backtest_start, self.backtest_end) {
            if start >= end {
                return Err(DecisionError::Config(format!("BACKTEST_START ({}) must be before BACKTEST_END ({})", start, end)));
            }
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            gate: GateConfig {
                min_conviction: self.min_conviction,
                max_position_pct: self.max_position_pct,
                min_cash_pct: self.min_cash_pct,
                min_trade_size: self.min_trade_size,
            },
            max_drawdown: self.max_drawdown,
        }
    }

    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_secs(self.reasoning_timeout_seconds)
    }

    /// Configured symbols plus the benchmark, deduplicated.
    pub fn tracked_symbols(&self) -> Vec<String> {
        let mut symbols = self.symbols.clone();
        if !symbols.contains(&self.benchmark_symbol) {
            symbols.push(self.benchmark_symbol.clone());
        }
        symbols
    }
}

/// RFC 3339 timestamp or a plain `YYYY-MM-DD` date (midnight UTC).
fn parse_time(key: &str, value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("{} must be RFC 3339 or YYYY-MM-DD, got '{}'", key, value))?;
    Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
}
