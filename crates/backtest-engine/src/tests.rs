use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use decision_core::{
    Bar, ContextSnapshot, Granularity, ProducerError, Proposal, ProposalProducer, Side, Signal,
    SignalIntent, Sizing,
};
use decision_orchestrator::{Blackboard, DecisionEngine, EngineConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::*;

fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 21, 0, 0).unwrap() + Duration::days(n)
}

/// Helper: a bar whose OHLC all equal `close`.
fn bar(ts: DateTime<Utc>, close: Decimal) -> Bar {
    Bar {
        timestamp: ts,
        open: close,
        high: close,
        low: close,
        close,
        volume: 1000.0,
    }
}

fn daily_series(closes: &[Decimal]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| bar(day(i as i64), *c))
        .collect()
}

fn signal(symbol: &str, side: Side, sizing: Sizing, ts: DateTime<Utc>) -> Signal {
    Signal {
        symbol: symbol.to_string(),
        side,
        sizing,
        reason: "test".to_string(),
        confidence: 1.0,
        timestamp: ts,
    }
}

fn config() -> SimulationConfig {
    SimulationConfig {
        strategy_name: "test".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_buy_then_sell_round_trip() {
    let mut data = HashMap::new();
    data.insert("X".to_string(), daily_series(&[dec!(50), dec!(55), dec!(60), dec!(55)]));

    let mut step = 0;
    let mut strategy = StrategyFn(move |snap: &ContextSnapshot| {
        step += 1;
        match step {
            1 => vec![signal("X", Side::Buy, Sizing::Amount(dec!(500)), snap.timestamp)],
            3 => vec![signal("X", Side::Sell, Sizing::Quantity(dec!(4)), snap.timestamp)],
            _ => vec![],
        }
    });

    let report = Simulator::new(config()).run(&data, &mut strategy).await.unwrap();

    assert_eq!(report.steps, 4);
    assert_eq!(report.trades.len(), 2);
    assert_eq!(report.trades[0].quantity, dec!(10));
    assert_eq!(report.trades[1].realized_pnl, Some(dec!(40)));
    // 9500 + 240 cash, 6 shares at 55
    assert_eq!(report.final_cash, dec!(9740));
    assert_eq!(report.final_value, dec!(9740) + dec!(6) * dec!(55));
    assert_eq!(report.metrics.trades.net_holdings["X"], dec!(6));
    assert_eq!(report.metrics.win_rate, Some(1.0));
}

#[tokio::test]
async fn test_snapshots_never_see_future_bars() {
    let mut data = HashMap::new();
    data.insert("X".to_string(), daily_series(&[dec!(10), dec!(11), dec!(12), dec!(13), dec!(14)]));
    data.insert("Y".to_string(), daily_series(&[dec!(20), dec!(21), dec!(22)]));

    let mut violations = 0;
    let mut seen = 0;
    let mut strategy = StrategyFn(|snap: &ContextSnapshot| {
        seen += 1;
        for bars in snap.bars.values() {
            if bars.iter().any(|b| b.timestamp > snap.timestamp) {
                violations += 1;
            }
        }
        if snap.price("X") != snap.bars["X"].last().map(|b| b.close) {
            violations += 1;
        }
        vec![]
    });

    Simulator::new(config()).run(&data, &mut strategy).await.unwrap();
    assert_eq!(seen, 5);
    assert_eq!(violations, 0);
}

#[tokio::test]
async fn test_signal_without_bar_in_bucket_is_skipped() {
    let mut data = HashMap::new();
    data.insert("X".to_string(), daily_series(&[dec!(10), dec!(11), dec!(12)]));
    // Y trades only on the first day
    data.insert("Y".to_string(), vec![bar(day(0), dec!(20))]);

    let mut strategy = StrategyFn(|snap: &ContextSnapshot| {
        if snap.timestamp == day(2) {
            vec![signal("Y", Side::Buy, Sizing::Amount(dec!(100)), snap.timestamp)]
        } else {
            vec![]
        }
    });

    let report = Simulator::new(config()).run(&data, &mut strategy).await.unwrap();
    assert!(report.trades.is_empty());
    assert_eq!(report.unpriced_signals, 1);
}

#[tokio::test]
async fn test_intraday_bars_collapse_to_daily_steps() {
    let base = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
    let bars: Vec<Bar> = (0..3)
        .flat_map(|d| {
            (0..4).map(move |m| bar(base + Duration::days(d) + Duration::minutes(15 * m), dec!(100) + Decimal::from(m)))
        })
        .collect();
    let mut data = HashMap::new();
    data.insert("X".to_string(), bars);

    let mut timestamps = Vec::new();
    let mut strategy = StrategyFn(|snap: &ContextSnapshot| {
        timestamps.push(snap.timestamp);
        vec![]
    });
    let report = Simulator::new(config()).run(&data, &mut strategy).await.unwrap();
    assert_eq!(report.steps, 3);
    assert_eq!(timestamps[0], base + Duration::minutes(45));

    let intraday = SimulationConfig {
        granularity: Granularity::Minute15,
        ..config()
    };
    let mut count = 0;
    let mut strategy = StrategyFn(|_: &ContextSnapshot| {
        count += 1;
        vec![]
    });
    Simulator::new(intraday).run(&data, &mut strategy).await.unwrap();
    assert_eq!(count, 12);
}

#[tokio::test]
async fn test_oversized_sell_is_clamped_and_rejections_counted() {
    let mut data = HashMap::new();
    data.insert("X".to_string(), daily_series(&[dec!(10), dec!(10), dec!(10)]));

    let mut step = 0;
    let mut strategy = StrategyFn(move |snap: &ContextSnapshot| {
        step += 1;
        match step {
            1 => vec![
                signal("X", Side::Buy, Sizing::Amount(dec!(100)), snap.timestamp),
                signal("X", Side::Buy, Sizing::Amount(dec!(50000)), snap.timestamp),
            ],
            2 => vec![signal("X", Side::Sell, Sizing::Quantity(dec!(1000)), snap.timestamp)],
            _ => vec![signal("X", Side::Sell, Sizing::Quantity(dec!(1)), snap.timestamp)],
        }
    });

    let report = Simulator::new(config()).run(&data, &mut strategy).await.unwrap();
    assert_eq!(report.trades.len(), 2);
    assert_eq!(report.trades[1].quantity, dec!(10));
    assert_eq!(report.rejected_signals, 2);
    assert_eq!(report.final_value, dec!(10000));
}

#[tokio::test]
async fn test_indicators_attached_once_history_allows() {
    let closes: Vec<Decimal> = (0..25).map(|i| Decimal::from(100 + i)).collect();
    let mut data = HashMap::new();
    data.insert("X".to_string(), daily_series(&closes));

    let mut last_seen = None;
    let mut strategy = StrategyFn(|snap: &ContextSnapshot| {
        last_seen = Some(snap.indicators["X"].clone());
        vec![]
    });
    Simulator::new(config()).run(&data, &mut strategy).await.unwrap();

    let ind = last_seen.unwrap();
    approx::assert_relative_eq!(ind[indicators::SMA_20], 114.5);
    approx::assert_relative_eq!(ind[indicators::RSI_14], 100.0);
    assert!(ind.contains_key(indicators::RETURN_1));
}

/// Buys $1,000 of X whenever the portfolio is flat.
struct BuyWhenFlat;

#[async_trait::async_trait]
impl ProposalProducer for BuyWhenFlat {
    fn name(&self) -> &str {
        "buy-when-flat"
    }

    async fn analyze(&self, snapshot: &ContextSnapshot) -> Result<Proposal, ProducerError> {
        let mut proposal = Proposal::empty(self.name(), snapshot.timestamp);
        if snapshot.held_symbols().is_empty() {
            proposal.conviction = 0.8;
            proposal.intents.push(SignalIntent::buy_amount("X", dec!(1000), "flat"));
        }
        Ok(proposal)
    }
}

#[tokio::test]
async fn test_engine_drives_simulation_and_flattens_on_drawdown() {
    let mut data = HashMap::new();
    data.insert(
        "X".to_string(),
        daily_series(&[dec!(100), dec!(100), dec!(40), dec!(40), dec!(40)]),
    );

    let mut engine = DecisionEngine::new(
        EngineConfig {
            max_drawdown: dec!(0.05),
            ..Default::default()
        },
        Arc::new(Blackboard::new()),
    )
    .with_producer(Box::new(BuyWhenFlat));

    let report = Simulator::new(config()).run(&data, &mut engine).await.unwrap();

    // Entry at 100, then 9000 + 10 * 40 = 9400 is a 6% drawdown: sell everything, stay out
    assert_eq!(report.trades.len(), 2);
    assert_eq!(report.trades[0].side, Side::Buy);
    assert_eq!(report.trades[0].amount, dec!(1000));
    assert_eq!(report.trades[1].side, Side::Sell);
    assert_eq!(report.trades[1].quantity, dec!(10));
    assert_eq!(report.final_value, dec!(9400));
    assert_eq!(report.metrics.max_drawdown, Some(dec!(0.06)));
}

#[test]
fn test_reference_metrics_series() {
    let values = [dec!(100), dec!(110), dec!(90), dec!(120)];
    let start = day(0);
    let end = day(3);
    let metrics = compute_metrics(dec!(100), dec!(120), &values, &[], start, end, &MetricsConfig::default());
    assert_eq!(metrics.total_return, dec!(0.2));
    let dd = metrics.max_drawdown.unwrap();
    assert!((dd - dec!(0.1818)).abs() < dec!(0.0001));
    assert!(metrics.sharpe_ratio.is_some());
    assert!(metrics.win_rate.is_none());
}

#[tokio::test]
async fn test_empty_data_is_an_error() {
    let data: HashMap<String, Vec<Bar>> = HashMap::new();
    let mut strategy = StrategyFn(|_: &ContextSnapshot| vec![]);
    assert!(matches!(
        Simulator::new(config()).run(&data, &mut strategy).await,
        Err(SimulationError::NoData)
    ));

    let bad = SimulationConfig {
        initial_cash: Decimal::ZERO,
        ..config()
    };
    let mut data = HashMap::new();
    data.insert("X".to_string(), daily_series(&[dec!(1)]));
    assert!(matches!(
        Simulator::new(bad).run(&data, &mut strategy).await,
        Err(SimulationError::InvalidConfig(_))
    ));
}
