use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use backtest_engine::indicators;
use broker_trait::{BrokerClient, BrokerOrderRequest, MarketData, PaperBroker};
use chrono::{DateTime, Duration, Utc};
use decision_core::{Bar, ContextSnapshot, DecisionError, Proposal, Side};
use decision_orchestrator::{keys, DecisionEngine, FlattenRecord};
use portfolio_ledger::{AuditRecord, DrawdownTracker, Ledger, SharedLedger, TradeStore};
use rust_decimal::Decimal;

use crate::config::AgentConfig;

/// Strategy tag put on every trade the live agent books.
pub const LIVE_STRATEGY: &str = "live";

/// What one live cycle did.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub cycle_id: String,
    pub timestamp: DateTime<Utc>,
    pub signals: usize,
    pub filled: usize,
    pub rejected: usize,
    /// Signals not submitted because the market was closed.
    pub skipped: usize,
    pub producer_failures: usize,
    pub flattened: bool,
    pub portfolio_value: Decimal,
    pub drawdown: Decimal,
}

/// Rebuild the paper ledger by replaying every stored trade of the portfolio.
pub async fn restore_ledger(
    store: &dyn TradeStore,
    portfolio_id: &str,
    initial_cash: Decimal,
) -> Result<Ledger> {
    let trades = store
        .query_trades(portfolio_id, None, DateTime::<Utc>::UNIX_EPOCH, Utc::now() + Duration::days(1))
        .await
        .context("loading stored trades")?;

    let mut ledger = Ledger::new(initial_cash).with_strategy(LIVE_STRATEGY);
    for trade in &trades {
        let replayed = match trade.side {
            Side::Buy => ledger.buy(&trade.symbol, trade.amount, trade.price, trade.timestamp, &trade.reason),
            Side::Sell => ledger.sell(&trade.symbol, trade.quantity, trade.price, trade.timestamp, &trade.reason),
        };
        if let Err(rejection) = replayed {
            bail!(
                "stored {} {} at {} does not replay: {}",
                trade.side,
                trade.symbol,
                trade.timestamp,
                rejection
            );
        }
    }

    if !trades.is_empty() {
        tracing::info!(
            "Restored portfolio {} from {} trades: cash {}, {} positions",
            portfolio_id,
            trades.len(),
            ledger.cash(),
            ledger.positions().len()
        );
    }
    Ok(ledger)
}

/// Live/paper decision loop: market data in, engine in the middle, paper
/// broker and store out.
pub struct LiveAgent {
    config: AgentConfig,
    market: Arc<dyn MarketData>,
    broker: PaperBroker,
    engine: DecisionEngine,
    store: Arc<dyn TradeStore>,
    tracker: DrawdownTracker,
    /// Ledger trades already written to the store.
    persisted_trades: usize,
}

impl LiveAgent {
    pub async fn new(
        config: AgentConfig,
        market: Arc<dyn MarketData>,
        engine: DecisionEngine,
        store: Arc<dyn TradeStore>,
    ) -> Result<Self> {
        let ledger = restore_ledger(store.as_ref(), &config.portfolio_id, config.initial_cash).await?;
        let persisted_trades = ledger.trades().len();
        let broker =
            PaperBroker::new(SharedLedger::new(ledger)).with_always_open(config.ignore_market_hours);

        let stored_peak = store
            .load_peak(&config.portfolio_id)
            .await
            .context("loading stored peak value")?;
        let tracker = DrawdownTracker::new(config.initial_cash.max(stored_peak.unwrap_or_default()));
        if tracker.peak() > config.initial_cash {
            tracing::info!("Restored peak value {} for {}", tracker.peak(), config.portfolio_id);
        }

        Ok(Self {
            config,
            market,
            broker,
            engine,
            store,
            tracker,
            persisted_trades,
        })
    }

    pub fn broker(&self) -> &PaperBroker {
        &self.broker
    }

    fn as_of(&self) -> DateTime<Utc> {
        self.config.as_of.unwrap_or_else(Utc::now)
    }

    /// Recent bars per tracked symbol. A symbol that fails to load is logged
    /// and left out of the cycle.
    async fn load_bars(&self, now: DateTime<Utc>) -> HashMap<String, Vec<Bar>> {
        // Twice the lookback in calendar time covers weekends and holidays
        let window = Duration::minutes(
            self.config.granularity.to_minutes() * self.config.lookback_bars as i64 * 2,
        );
        let start = now - window;

        let mut out = HashMap::new();
        for symbol in self.config.tracked_symbols() {
            match self
                .market
                .get_bars(&symbol, start, now, self.config.granularity)
                .await
            {
                Ok(bars) if bars.is_empty() => {
                    tracing::warn!("No bars for {} up to {}", symbol, now);
                }
                Ok(mut bars) => {
                    let keep = bars.len().saturating_sub(self.config.lookback_bars);
                    bars.drain(..keep);
                    out.insert(symbol, bars);
                }
                Err(e) => {
                    tracing::warn!("Failed to load bars for {}: {:#}", symbol, e);
                }
            }
        }
        out
    }

    async fn build_snapshot(&mut self, now: DateTime<Utc>) -> ContextSnapshot {
        let bars = self.load_bars(now).await;
        let prices: HashMap<String, Decimal> = bars
            .iter()
            .filter_map(|(symbol, bars)| bars.last().map(|b| (symbol.clone(), b.close)))
            .collect();
        let indicator_map = bars
            .iter()
            .map(|(symbol, bars)| (symbol.clone(), indicators::compute(bars)))
            .collect();

        self.broker.update_prices(&prices).await;
        let ledger = self.broker.ledger().snapshot().await;
        let value = ledger.value(&prices);
        let drawdown = self.tracker.update(value);

        ContextSnapshot {
            timestamp: now,
            prices,
            bars,
            indicators: indicator_map,
            cash: ledger.cash(),
            holdings: ledger.holdings(),
            portfolio_value: value,
            drawdown,
            peak_value: self.tracker.peak(),
            risk_budget: 1.0,
            regime: None,
        }
    }

    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let cycle_id = uuid::Uuid::new_v4().to_string();
        let now = self.as_of();
        let snapshot = self.build_snapshot(now).await;
        if snapshot.prices.is_empty() {
            return Err(DecisionError::InvalidData(format!(
                "no market data for any tracked symbol up to {}",
                now
            ))
            .into());
        }

        tracing::info!(
            "Cycle {} at {}: value {}, cash {}, drawdown {:.2}%",
            cycle_id,
            now,
            snapshot.portfolio_value,
            snapshot.cash,
            snapshot.drawdown_f64() * 100.0
        );

        let signals = self.engine.run_cycle(&snapshot).await;

        let mut filled = 0;
        let mut rejected = 0;
        let mut skipped = 0;
        let market_open = self.broker.is_market_open().await?;
        if !market_open && !signals.is_empty() {
            tracing::warn!("Market closed, holding {} signals", signals.len());
            skipped = signals.len();
        } else {
            for signal in &signals {
                let order = self.broker.submit_order(BrokerOrderRequest::from(signal)).await?;
                if order.is_filled() {
                    filled += 1;
                    tracing::info!(
                        "Filled {} {} {} @ {}",
                        signal.side,
                        order.filled_qty.unwrap_or_default(),
                        signal.symbol,
                        order.filled_avg_price.unwrap_or_default()
                    );
                } else {
                    rejected += 1;
                    tracing::warn!(
                        "Order {} {} rejected: {}",
                        signal.side,
                        signal.symbol,
                        order.message.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }

        self.persist(&cycle_id, now).await?;
        let ledger = self.broker.ledger().snapshot().await;

        let blackboard = self.engine.blackboard();
        let producer_failures = blackboard
            .read_as::<HashMap<String, String>>(keys::PRODUCER_ERRORS)
            .map(|errors| errors.len())
            .unwrap_or(0);
        let flattened = blackboard.read_as::<FlattenRecord>(keys::FLATTEN).is_some();

        let value = ledger.value(&snapshot.prices);
        Ok(CycleOutcome {
            cycle_id,
            timestamp: now,
            signals: signals.len(),
            filled,
            rejected,
            skipped,
            producer_failures,
            flattened,
            portfolio_value: value,
            drawdown: self.tracker.drawdown(value),
        })
    }

    /// Store every trade not yet saved, the peak value, this cycle's proposals,
    /// and the blackboard history as audit lines.
    async fn persist(&mut self, cycle_id: &str, now: DateTime<Utc>) -> Result<()> {
        let portfolio_id = self.config.portfolio_id.as_str();
        let ledger = self.broker.ledger().snapshot().await;
        let pending = ledger.trades().len().saturating_sub(self.persisted_trades);
        for trade in ledger.trades().iter().skip(self.persisted_trades) {
            self.store
                .save_trade(portfolio_id, trade)
                .await
                .with_context(|| format!("saving {} {} trade", trade.side, trade.symbol))?;
            self.persisted_trades += 1;
        }
        self.store.save_peak(portfolio_id, self.tracker.peak(), now).await?;

        let blackboard = self.engine.blackboard();
        let proposals: Vec<Proposal> = blackboard.read_as(keys::PROPOSALS).unwrap_or_default();
        for proposal in &proposals {
            self.store.save_proposal(portfolio_id, proposal).await?;
        }

        let history = blackboard.history();
        for entry in &history {
            let record = AuditRecord {
                cycle_id: cycle_id.to_string(),
                timestamp: entry.timestamp,
                key: entry.key.clone(),
                author: entry.author.clone(),
                value: entry.value.clone(),
            };
            self.store.save_audit(portfolio_id, &record).await?;
        }

        tracing::debug!(
            "Cycle {}: stored {} trades, {} proposals, {} audit entries",
            cycle_id,
            pending,
            proposals.len(),
            history.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use decision_core::{ProducerError, ProposalProducer, SignalIntent};
    use decision_orchestrator::Blackboard;
    use portfolio_ledger::{SqliteStore, StoreError, Trade};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Serves the same closes for every symbol, one bar per day ending at `end`.
    struct FixedBars {
        closes: Vec<Decimal>,
        end: DateTime<Utc>,
    }

    #[async_trait]
    impl MarketData for FixedBars {
        async fn get_bars(
            &self,
            _symbol: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            _granularity: decision_core::Granularity,
        ) -> Result<Vec<Bar>> {
            let n = self.closes.len() as i64;
            Ok(self
                .closes
                .iter()
                .enumerate()
                .map(|(i, close)| Bar {
                    timestamp: self.end - Duration::days(n - 1 - i as i64),
                    open: *close,
                    high: *close,
                    low: *close,
                    close: *close,
                    volume: 1000.0,
                })
                .filter(|b| b.timestamp >= start && b.timestamp <= end)
                .collect())
        }
    }

    struct BuyOnce;

    #[async_trait]
    impl ProposalProducer for BuyOnce {
        fn name(&self) -> &str {
            "buy-once"
        }

        async fn analyze(&self, snapshot: &ContextSnapshot) -> Result<Proposal, ProducerError> {
            let mut proposal = Proposal::empty(self.name(), snapshot.timestamp);
            if snapshot.held_symbols().is_empty() {
                proposal.conviction = 0.9;
                proposal.intents.push(SignalIntent::buy_amount("AAA", dec!(500), "entry"));
            }
            Ok(proposal)
        }
    }

    fn test_config(end: DateTime<Utc>) -> AgentConfig {
        let mut config = AgentConfig::from_lookup(|key| match key {
            "SYMBOLS" => Some("AAA".to_string()),
            "BENCHMARK_SYMBOL" => Some("AAA".to_string()),
            "PORTFOLIO_ID" => Some("test".to_string()),
            _ => None,
        })
        .unwrap();
        config.as_of = Some(end);
        config
    }

    fn engine(config: &AgentConfig) -> DecisionEngine {
        DecisionEngine::new(config.engine_config(), Arc::new(Blackboard::new()))
            .with_producer(Box::new(BuyOnce))
    }

    #[tokio::test]
    async fn test_cycle_fills_and_persists() {
        let end = Utc::now();
        let config = test_config(end);
        let market = Arc::new(FixedBars {
            closes: vec![dec!(48), dec!(49), dec!(50)],
            end,
        });
        let store = Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());

        let mut agent = LiveAgent::new(config.clone(), market.clone(), engine(&config), store.clone())
            .await
            .unwrap();
        let outcome = agent.run_cycle().await.unwrap();

        assert_eq!(outcome.signals, 1);
        assert_eq!(outcome.filled, 1);
        assert_eq!(outcome.rejected, 0);
        assert!(!outcome.flattened);
        assert_eq!(agent.broker().ledger().snapshot().await.shares("AAA"), dec!(10));

        let trades = store
            .query_trades("test", Some("AAA"), DateTime::<Utc>::UNIX_EPOCH, Utc::now() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].strategy.as_deref(), Some(LIVE_STRATEGY));

        let audit = store.query_audit("test", &outcome.cycle_id).await.unwrap();
        assert!(audit.iter().any(|r| r.key == keys::SIGNALS));

        // A restarted agent picks the position back up and does not buy again
        let mut restarted = LiveAgent::new(config.clone(), market, engine(&config), store.clone())
            .await
            .unwrap();
        assert_eq!(restarted.broker().ledger().cash().await, dec!(9500));
        let second = restarted.run_cycle().await.unwrap();
        assert_eq!(second.signals, 0);
    }

    #[tokio::test]
    async fn test_cycle_without_data_fails() {
        let end = Utc::now();
        let config = test_config(end);
        let market = Arc::new(FixedBars { closes: vec![], end });
        let store = Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());

        let mut agent = LiveAgent::new(config.clone(), market, engine(&config), store)
            .await
            .unwrap();
        assert!(agent.run_cycle().await.is_err());
    }

    #[tokio::test]
    async fn test_restore_rejects_inconsistent_history() {
        let store = SqliteStore::new("sqlite::memory:").await.unwrap();
        let mut ledger = Ledger::new(dec!(1000));
        let trade = ledger.buy("AAA", dec!(800), dec!(10), Utc::now(), "big").unwrap();
        store.save_trade("p", &trade).await.unwrap();

        assert!(restore_ledger(&store, "p", dec!(500)).await.is_err());
        let restored = restore_ledger(&store, "p", dec!(1000)).await.unwrap();
        assert_eq!(restored.shares("AAA"), dec!(80));
        assert_eq!(restored.cash(), dec!(200));
    }

    /// SQLite store whose trade writes fail while `fail_trades` is set.
    struct FlakyStore {
        inner: SqliteStore,
        fail_trades: AtomicBool,
    }

    #[async_trait]
    impl TradeStore for FlakyStore {
        async fn save_trade(&self, portfolio_id: &str, trade: &Trade) -> Result<i64, StoreError> {
            if self.fail_trades.load(Ordering::SeqCst) {
                return Err(StoreError::Corrupt("disk full".to_string()));
            }
            self.inner.save_trade(portfolio_id, trade).await
        }

        async fn save_proposal(&self, portfolio_id: &str, proposal: &Proposal) -> Result<i64, StoreError> {
            self.inner.save_proposal(portfolio_id, proposal).await
        }

        async fn save_audit(&self, portfolio_id: &str, record: &AuditRecord) -> Result<i64, StoreError> {
            self.inner.save_audit(portfolio_id, record).await
        }

        async fn query_trades(
            &self,
            portfolio_id: &str,
            symbol: Option<&str>,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<Trade>, StoreError> {
            self.inner.query_trades(portfolio_id, symbol, from, to).await
        }

        async fn query_proposals(
            &self,
            portfolio_id: &str,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<Proposal>, StoreError> {
            self.inner.query_proposals(portfolio_id, from, to).await
        }

        async fn query_audit(&self, portfolio_id: &str, cycle_id: &str) -> Result<Vec<AuditRecord>, StoreError> {
            self.inner.query_audit(portfolio_id, cycle_id).await
        }

        async fn save_peak(&self, portfolio_id: &str, peak: Decimal, at: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.save_peak(portfolio_id, peak, at).await
        }

        async fn load_peak(&self, portfolio_id: &str) -> Result<Option<Decimal>, StoreError> {
            self.inner.load_peak(portfolio_id).await
        }
    }

    #[tokio::test]
    async fn test_unsaved_fills_are_retried_next_cycle() {
        let end = Utc::now();
        let config = test_config(end);
        let market = Arc::new(FixedBars {
            closes: vec![dec!(50)],
            end,
        });
        let store = Arc::new(FlakyStore {
            inner: SqliteStore::new("sqlite::memory:").await.unwrap(),
            fail_trades: AtomicBool::new(true),
        });

        let mut agent = LiveAgent::new(config.clone(), market.clone(), engine(&config), store.clone())
            .await
            .unwrap();
        assert!(agent.run_cycle().await.is_err());
        assert_eq!(agent.broker().ledger().snapshot().await.shares("AAA"), dec!(10));
        let window_end = Utc::now() + Duration::days(1);
        assert!(store
            .query_trades("test", None, DateTime::<Utc>::UNIX_EPOCH, window_end)
            .await
            .unwrap()
            .is_empty());

        store.fail_trades.store(false, Ordering::SeqCst);
        let second = agent.run_cycle().await.unwrap();
        assert_eq!(second.signals, 0);
        let trades = store
            .query_trades("test", None, DateTime::<Utc>::UNIX_EPOCH, window_end)
            .await
            .unwrap();
        assert_eq!(trades.len(), 1);

        let third = agent.run_cycle().await.unwrap();
        assert_eq!(third.filled, 0);
        let restarted = LiveAgent::new(config.clone(), market, engine(&config), store.clone())
            .await
            .unwrap();
        assert_eq!(restarted.broker().ledger().cash().await, dec!(9500));
        assert_eq!(
            store
                .query_trades("test", None, DateTime::<Utc>::UNIX_EPOCH, window_end)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_peak_survives_restart() {
        let end = Utc::now();
        let config = test_config(end);
        let store = Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());
        let at_price = |close: Decimal| Arc::new(FixedBars { closes: vec![close], end });

        // 10 AAA at 50, then the price runs to 200: 9500 + 2000
        let mut first = LiveAgent::new(config.clone(), at_price(dec!(50)), engine(&config), store.clone())
            .await
            .unwrap();
        assert_eq!(first.run_cycle().await.unwrap().filled, 1);
        let mut second = LiveAgent::new(config.clone(), at_price(dec!(200)), engine(&config), store.clone())
            .await
            .unwrap();
        let high = second.run_cycle().await.unwrap();
        assert_eq!(high.portfolio_value, dec!(11500));
        assert_eq!(high.drawdown, Decimal::ZERO);

        let mut third = LiveAgent::new(config.clone(), at_price(dec!(100)), engine(&config), store.clone())
            .await
            .unwrap();
        let low = third.run_cycle().await.unwrap();
        assert_eq!(low.portfolio_value, dec!(10500));
        assert_eq!(low.drawdown, dec!(1000) / dec!(11500));
        assert_eq!(store.load_peak("test").await.unwrap(), Some(dec!(11500)));
    }
}
