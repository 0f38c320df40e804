use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use backtest_engine::{MetricsConfig, SimulationConfig, SimulationReport, Simulator};
use broker_trait::CsvMarketData;
use decision_orchestrator::{Blackboard, DecisionEngine};
use market_regime_detector::RegimeProducer;
use portfolio_ledger::SqliteStore;
use reasoning_client::{ProducerRole, ReasoningBackend, ReasoningClient, ReasoningConfig, ReasoningProducer};
use tokio::signal::unix::SignalKind;
use tokio::time;

mod config;
mod cycle;
mod metrics;

use config::{AgentConfig, AgentMode};
use cycle::LiveAgent;
use metrics::AgentMetrics;

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Trading agent failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // 2. Configuration; a positional argument overrides AGENT_MODE
    let mut config = AgentConfig::from_env()?;
    if let Some(mode) = std::env::args().nth(1) {
        config.mode = mode.parse()?;
        config.validate()?;
    }

    let market = CsvMarketData::new(&config.data_dir);
    if config.symbols.is_empty() {
        config.symbols = market
            .list_symbols()?
            .into_iter()
            .map(|s| s.to_uppercase())
            .filter(|s| *s != config.benchmark_symbol)
            .collect();
    }
    if config.symbols.is_empty() {
        bail!("no symbols configured and no CSV files in {}", config.data_dir.display());
    }

    tracing::info!("Starting trading agent ({:?} mode)", config.mode);
    tracing::info!("  Portfolio: {} (initial cash ${})", config.portfolio_id, config.initial_cash);
    tracing::info!("  Symbols: {} (benchmark {})", config.symbols.join(","), config.benchmark_symbol);
    tracing::info!(
        "  Gate: min conviction {:.2}, max position {}%, min cash {}%, min trade ${}",
        config.min_conviction,
        config.max_position_pct * rust_decimal::Decimal::ONE_HUNDRED,
        config.min_cash_pct * rust_decimal::Decimal::ONE_HUNDRED,
        config.min_trade_size
    );
    tracing::info!("  Max drawdown: {}%", config.max_drawdown * rust_decimal::Decimal::ONE_HUNDRED);

    // 3. Engine and producers
    let engine = build_engine(&config).await?;

    match config.mode {
        AgentMode::Backtest => {
            let report = run_backtest(&config, &market, engine).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        AgentMode::Cycle => {
            let mut agent = live_agent(&config, market, engine).await?;
            let mut metrics = AgentMetrics::new(config.metrics_log_interval_cycles);
            let started = AgentMetrics::start_timer();
            let outcome = agent.run_cycle().await?;
            metrics.record_cycle(&outcome, started);
            metrics.log_metrics();
            Ok(())
        }
        AgentMode::Loop => {
            let agent = live_agent(&config, market, engine).await?;
            run_loop(&config, agent).await
        }
    }
}

/// Regime producer (rule-based unless REASONING_REGIME is set) plus a
/// reasoning-backed trading producer when a backend is configured.
async fn build_engine(config: &AgentConfig) -> Result<DecisionEngine> {
    let mut engine = DecisionEngine::new(config.engine_config(), Arc::new(Blackboard::new()));

    let backend: Option<Arc<dyn ReasoningBackend>> = match &config.reasoning_url {
        Some(url) => {
            let client = ReasoningClient::new(ReasoningConfig {
                base_url: url.trim_end_matches('/').to_string(),
                api_key: config.reasoning_api_key.clone(),
                model: config.reasoning_model.clone(),
                timeout: config.reasoning_timeout(),
            })?;

            // Warn-only: producers fall back per cycle when the backend is down
            match client.health_check().await {
                Ok(true) => tracing::info!("Startup check: reasoning backend OK ({})", url),
                Ok(false) => tracing::warn!("Startup check: reasoning backend unhealthy ({})", url),
                Err(e) => tracing::warn!("Startup check: reasoning backend unreachable ({}): {}", url, e),
            }
            let backend: Arc<dyn ReasoningBackend> = Arc::new(client);
            Some(backend)
        }
        None => None,
    };

    engine = match &backend {
        Some(backend) if config.reasoning_regime => engine.with_regime_producer(Box::new(ReasoningProducer::new(
            "reasoning-regime",
            ProducerRole::Regime,
            config.reasoning_model.clone(),
            Arc::clone(backend),
        ))),
        _ => engine.with_regime_producer(Box::new(RegimeProducer::new(config.benchmark_symbol.clone()))),
    };

    match backend {
        Some(backend) => {
            engine = engine.with_producer(Box::new(ReasoningProducer::new(
                "reasoning-trader",
                ProducerRole::Trading,
                config.reasoning_model.clone(),
                backend,
            )));
        }
        None => {
            tracing::warn!("REASONING_URL not set: no trading producers, only drawdown protection is active");
        }
    }

    tracing::info!("Decision engine ready (producers: {:?})", engine.producer_names());
    Ok(engine)
}

async fn live_agent(config: &AgentConfig, market: CsvMarketData, engine: DecisionEngine) -> Result<LiveAgent> {
    let store = SqliteStore::new(&config.database_url).await?;
    tracing::info!("Store ready ({})", config.database_url);
    LiveAgent::new(config.clone(), Arc::new(market), engine, Arc::new(store)).await
}

async fn run_backtest(
    config: &AgentConfig,
    market: &CsvMarketData,
    mut engine: DecisionEngine,
) -> Result<SimulationReport> {
    let tracked = config.tracked_symbols();
    let mut data = market.load_all().await?;
    data = data
        .into_iter()
        .map(|(symbol, bars)| (symbol.to_uppercase(), bars))
        .filter(|(symbol, _)| tracked.contains(symbol))
        .collect();
    if !data.contains_key(&config.benchmark_symbol) {
        tracing::warn!(
            "No data for benchmark {}: every cycle will use the conservative regime",
            config.benchmark_symbol
        );
    }

    let simulation = SimulationConfig {
        strategy_name: format!("{}-backtest", config.portfolio_id),
        initial_cash: config.initial_cash,
        granularity: config.granularity,
        start: config.backtest_start,
        end: config.backtest_end,
        lookback_bars: config.lookback_bars,
        metrics: MetricsConfig::default(),
    };
    Ok(Simulator::new(simulation).run(&data, &mut engine).await?)
}

async fn run_loop(config: &AgentConfig, mut agent: LiveAgent) -> Result<()> {
    let mut metrics = AgentMetrics::new(config.metrics_log_interval_cycles);

    tracing::info!(
        "Agent is now running. Cycle every {}s. Press Ctrl+C to stop.",
        config.loop_interval_seconds
    );

    // Main loop with graceful shutdown (SIGINT + SIGTERM)
    let mut interval = time::interval(Duration::from_secs(config.loop_interval_seconds));
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let started = AgentMetrics::start_timer();
                match agent.run_cycle().await {
                    Ok(outcome) => metrics.record_cycle(&outcome, started),
                    Err(e) => {
                        tracing::error!("Error in decision cycle: {:#}", e);
                        metrics.finish_cycle(started);
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, exiting gracefully...");
                metrics.log_metrics();
                break;
            }
        }
    }

    tracing::info!("Trading agent shut down.");
    Ok(())
}
