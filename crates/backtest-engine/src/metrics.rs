use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use portfolio_ledger::Trade;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Annual risk-free rate, e.g. 0.02 for 2%.
    pub risk_free_rate: f64,
    /// Return periods per year used to annualize Sharpe.
    pub periods_per_year: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.02,
            periods_per_year: 252.0,
        }
    }
}

/// Buy/sell aggregates replayed from a trade list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub buy_count: usize,
    pub sell_count: usize,
    pub total_invested: Decimal,
    pub realized_pnl: Decimal,
    /// Net shares per symbol; symbols at or below zero are dropped.
    pub net_holdings: BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: Decimal,
    pub cagr: Option<f64>,
    pub max_drawdown: Option<Decimal>,
    pub sharpe_ratio: Option<f64>,
    pub win_rate: Option<f64>,
    #[serde(flatten)]
    pub trades: TradeStats,
}

/// `(final - initial) / initial`, zero when there was no initial capital.
pub fn total_return(initial: Decimal, final_value: Decimal) -> Decimal {
    if initial <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (final_value - initial) / initial
}

/// Compound annual growth rate over the calendar span `start..end`.
pub fn cagr(initial: Decimal, final_value: Decimal, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<f64> {
    let years = (end - start).num_seconds() as f64 / (365.25 * 86_400.0);
    if years <= 0.0 || initial <= Decimal::ZERO || final_value < Decimal::ZERO {
        return None;
    }
    let ratio = (final_value / initial).to_f64()?;
    Some(ratio.powf(1.0 / years) - 1.0)
}

/// Largest peak-to-trough decline, as a fraction of the running peak.
pub fn max_drawdown(values: &[Decimal]) -> Option<Decimal> {
    if values.len() < 2 {
        return None;
    }

    let mut peak = values[0];
    let mut worst = Decimal::ZERO;
    for &value in values {
        if value > peak {
            peak = value;
        }
        if peak > Decimal::ZERO {
            let dd = (peak - value) / peak;
            if dd > worst {
                worst = dd;
            }
        }
    }
    Some(worst)
}

/// Period-over-period simple returns.
pub fn period_returns(values: &[Decimal]) -> Vec<f64> {
    values
        .windows(2)
        .filter_map(|w| {
            let v0 = w[0].to_f64()?;
            let v1 = w[1].to_f64()?;
            if v0 == 0.0 {
                None
            } else {
                Some(v1 / v0 - 1.0)
            }
        })
        .collect()
}

/// Annualized Sharpe ratio of a daily value series using the sample
/// standard deviation. None with fewer than two returns or no variance.
pub fn sharpe_ratio(values: &[Decimal], config: &MetricsConfig) -> Option<f64> {
    let returns = period_returns(values);
    if returns.len() < 2 {
        return None;
    }

    let mean = returns.iter().mean();
    let std_dev = returns.iter().std_dev();
    if !std_dev.is_finite() || std_dev <= f64::EPSILON {
        return None;
    }

    let rf_period = config.risk_free_rate / config.periods_per_year;
    Some((mean - rf_period) / std_dev * config.periods_per_year.sqrt())
}

/// Share of sells that realized a profit. None without sells.
pub fn win_rate(trades: &[Trade]) -> Option<f64> {
    let sells: Vec<&Trade> = trades.iter().filter(|t| !t.is_buy()).collect();
    if sells.is_empty() {
        return None;
    }
    let wins = sells
        .iter()
        .filter(|t| t.realized_pnl.map(|p| p > Decimal::ZERO).unwrap_or(false))
        .count();
    Some(wins as f64 / sells.len() as f64)
}

pub fn trade_stats(trades: &[Trade]) -> TradeStats {
    let mut stats = TradeStats::default();
    let mut net: BTreeMap<String, Decimal> = BTreeMap::new();

    for trade in trades {
        let entry = net.entry(trade.symbol.clone()).or_insert(Decimal::ZERO);
        if trade.is_buy() {
            stats.buy_count += 1;
            stats.total_invested += trade.amount;
            *entry += trade.quantity;
        } else {
            stats.sell_count += 1;
            stats.realized_pnl += trade.realized_pnl.unwrap_or(Decimal::ZERO);
            *entry -= trade.quantity;
        }
    }

    net.retain(|_, qty| *qty > Decimal::ZERO);
    stats.net_holdings = net;
    stats
}

/// Everything in [`PerformanceMetrics`] from one run's outputs.
pub fn compute_metrics(
    initial: Decimal,
    final_value: Decimal,
    daily_values: &[Decimal],
    trades: &[Trade],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    config: &MetricsConfig,
) -> PerformanceMetrics {
    PerformanceMetrics {
        total_return: total_return(initial, final_value),
        cagr: cagr(initial, final_value, start, end),
        max_drawdown: max_drawdown(daily_values),
        sharpe_ratio: sharpe_ratio(daily_values, config),
        win_rate: win_rate(trades),
        trades: trade_stats(trades),
    }
}
