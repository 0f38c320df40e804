use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use decision_core::{Bar, ContextSnapshot, Side, Signal, SignalSource, Sizing};
use portfolio_ledger::{DrawdownTracker, Ledger, Rejection, Trade};
use rust_decimal::Decimal;

use crate::indicators;
use crate::metrics::compute_metrics;
use crate::models::*;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("no bars to simulate")]
    NoData,

    #[error("invalid simulation config: {0}")]
    InvalidConfig(String),
}

/// Wraps a plain function as a [`SignalSource`].
pub struct StrategyFn<F>(pub F);

#[async_trait]
impl<F> SignalSource for StrategyFn<F>
where
    F: FnMut(&ContextSnapshot) -> Vec<Signal> + Send,
{
    async fn signals(&mut self, snapshot: &ContextSnapshot) -> Vec<Signal> {
        (self.0)(snapshot)
    }
}

/// Replays historical bars through a signal source and books the resulting
/// signals on a fresh [`Ledger`].
///
/// At each step every series is cut at the step's timestamp, so the source
/// never sees a bar from the future. A signal only fills if its symbol has a
/// bar inside the current cadence bucket; the fill price is that bar's close.
pub struct Simulator {
    config: SimulationConfig,
}

/// Per-symbol cursor: `bars[..end]` is what has been seen so far.
struct Series<'a> {
    bars: &'a [Bar],
    end: usize,
}

impl<'a> Series<'a> {
    fn advance_to(&mut self, now: DateTime<Utc>) {
        while self.end < self.bars.len() && self.bars[self.end].timestamp <= now {
            self.end += 1;
        }
    }

    fn visible(&self) -> &'a [Bar] {
        &self.bars[..self.end]
    }

    fn last(&self) -> Option<&'a Bar> {
        self.visible().last()
    }
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// One step per cadence bucket, stamped with the last bar timestamp inside it.
    fn timeline(&self, data: &HashMap<String, Vec<Bar>>) -> Vec<DateTime<Utc>> {
        let mut steps: BTreeMap<DateTime<Utc>, DateTime<Utc>> = BTreeMap::new();
        for bar in data.values().flatten() {
            if self.config.start.is_some_and(|s| bar.timestamp < s)
                || self.config.end.is_some_and(|e| bar.timestamp > e)
            {
                continue;
            }
            let bucket = self.config.granularity.bucket_start(bar.timestamp);
            let latest = steps.entry(bucket).or_insert(bar.timestamp);
            if bar.timestamp > *latest {
                *latest = bar.timestamp;
            }
        }
        steps.into_values().collect()
    }

    pub async fn run<S>(
        &self,
        data: &HashMap<String, Vec<Bar>>,
        source: &mut S,
    ) -> Result<SimulationReport, SimulationError>
    where
        S: SignalSource + ?Sized,
    {
        if self.config.initial_cash <= Decimal::ZERO {
            return Err(SimulationError::InvalidConfig(format!(
                "initial cash must be positive, got {}",
                self.config.initial_cash
            )));
        }

        let timeline = self.timeline(data);
        let (first, last) = match (timeline.first(), timeline.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return Err(SimulationError::NoData),
        };

        let mut sorted: HashMap<&str, Vec<Bar>> = HashMap::new();
        for (symbol, bars) in data {
            let mut bars = bars.clone();
            bars.sort_by_key(|b| b.timestamp);
            sorted.insert(symbol.as_str(), bars);
        }
        let mut series: Vec<(&str, Series)> = sorted
            .iter()
            .map(|(symbol, bars)| (*symbol, Series { bars, end: 0 }))
            .collect();
        series.sort_by(|a, b| a.0.cmp(b.0));

        let mut ledger = Ledger::new(self.config.initial_cash).with_strategy(self.config.strategy_name.clone());
        let mut tracker = DrawdownTracker::new(self.config.initial_cash);
        let mut equity_curve = Vec::with_capacity(timeline.len());
        let mut rejected = 0usize;
        let mut unpriced = 0usize;

        tracing::info!(
            "Simulating {} over {} steps ({} to {}), {} symbols",
            self.config.strategy_name,
            timeline.len(),
            first,
            last,
            series.len()
        );

        for now in &timeline {
            let bucket = self.config.granularity.bucket_start(*now);
            let mut prices = HashMap::new();
            let mut exec_prices = HashMap::new();
            let mut bars = HashMap::new();
            let mut indicator_map = HashMap::new();

            for (symbol, s) in series.iter_mut() {
                s.advance_to(*now);
                let Some(latest) = s.last() else { continue };
                prices.insert(symbol.to_string(), latest.close);
                if self.config.granularity.bucket_start(latest.timestamp) == bucket {
                    exec_prices.insert(symbol.to_string(), latest.close);
                }
                let visible = s.visible();
                let window = &visible[visible.len().saturating_sub(self.config.lookback_bars)..];
                indicator_map.insert(symbol.to_string(), indicators::compute(window));
                bars.insert(symbol.to_string(), window.to_vec());
            }

            let value = ledger.value(&prices);
            let drawdown = tracker.update(value);
            let snapshot = ContextSnapshot {
                timestamp: *now,
                prices: prices.clone(),
                bars,
                indicators: indicator_map,
                cash: ledger.cash(),
                holdings: ledger.holdings(),
                portfolio_value: value,
                drawdown,
                peak_value: tracker.peak(),
                risk_budget: 1.0,
                regime: None,
            };

            for signal in source.signals(&snapshot).await {
                let Some(price) = exec_prices.get(&signal.symbol).copied() else {
                    tracing::debug!("{}: no bar for {} in this bucket, skipping {}", now, signal.symbol, signal.side);
                    unpriced += 1;
                    continue;
                };
                if let Err(rejection) = apply_signal(&mut ledger, &signal, price, *now) {
                    tracing::debug!("{}: {} {} rejected: {}", now, signal.side, signal.symbol, rejection);
                    rejected += 1;
                }
            }

            let value = ledger.value(&prices);
            let drawdown = tracker.update(value);
            equity_curve.push(EquityPoint {
                timestamp: *now,
                value,
                drawdown,
            });
        }

        // Final valuation at the last known price of every symbol
        let final_prices: HashMap<String, Decimal> = series
            .iter()
            .filter_map(|(symbol, s)| s.last().map(|b| (symbol.to_string(), b.close)))
            .collect();
        let final_value = ledger.value(&final_prices);

        let daily = daily_values(&equity_curve);
        let metrics = compute_metrics(
            self.config.initial_cash,
            final_value,
            &daily,
            ledger.trades(),
            first,
            last,
            &self.config.metrics,
        );

        tracing::info!(
            "Simulation {} finished: final value {}, return {}, {} trades",
            self.config.strategy_name,
            final_value,
            metrics.total_return,
            ledger.trades().len()
        );

        Ok(SimulationReport {
            strategy_name: self.config.strategy_name.clone(),
            start: first,
            end: last,
            initial_cash: self.config.initial_cash,
            final_value,
            final_cash: ledger.cash(),
            steps: timeline.len(),
            equity_curve,
            trades: ledger.trades().to_vec(),
            rejected_signals: rejected,
            unpriced_signals: unpriced,
            metrics,
        })
    }
}

/// Book one signal at `price`. Sells are clamped to the shares held.
fn apply_signal(
    ledger: &mut Ledger,
    signal: &Signal,
    price: Decimal,
    now: DateTime<Utc>,
) -> Result<Trade, Rejection> {
    match (signal.side, signal.sizing) {
        (Side::Buy, Sizing::Amount(amount)) => ledger.buy(&signal.symbol, amount, price, now, &signal.reason),
        (Side::Buy, Sizing::Quantity(qty)) => {
            let amount = qty.checked_mul(price).ok_or(Rejection::Overflow("order notional"))?;
            ledger.buy(&signal.symbol, amount, price, now, &signal.reason)
        }
        (Side::Sell, sizing) => {
            let held = ledger.shares(&signal.symbol);
            if held.is_zero() {
                return Err(Rejection::NotHeld(signal.symbol.clone()));
            }
            let wanted = match sizing {
                Sizing::Quantity(qty) => qty,
                Sizing::Amount(amount) if price > Decimal::ZERO => {
                    amount.checked_div(price).ok_or(Rejection::Overflow("share count"))?
                }
                Sizing::Amount(_) => return Err(Rejection::NonPositivePrice(price)),
            };
            ledger.sell(&signal.symbol, wanted.min(held), price, now, &signal.reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signal(side: Side, sizing: Sizing) -> Signal {
        Signal {
            symbol: "X".to_string(),
            side,
            sizing,
            reason: "test".to_string(),
            confidence: 0.9,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_overflowing_sizes_are_rejections() {
        let mut ledger = Ledger::new(dec!(10000));
        let now = Utc::now();

        let buy = signal(Side::Buy, Sizing::Quantity(Decimal::MAX));
        assert_eq!(
            apply_signal(&mut ledger, &buy, dec!(2), now),
            Err(Rejection::Overflow("order notional"))
        );

        ledger.buy("X", dec!(100), dec!(10), now, "entry").unwrap();
        let sell = signal(Side::Sell, Sizing::Amount(Decimal::MAX));
        assert_eq!(
            apply_signal(&mut ledger, &sell, dec!(0.5), now),
            Err(Rejection::Overflow("share count"))
        );
        assert_eq!(ledger.shares("X"), dec!(10));
        assert_eq!(ledger.cash(), dec!(9900));
    }
}
