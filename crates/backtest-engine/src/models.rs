use chrono::{DateTime, Utc};
use decision_core::Granularity;
use portfolio_ledger::Trade;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::metrics::{MetricsConfig, PerformanceMetrics};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub strategy_name: String,
    pub initial_cash: Decimal,
    /// Decision cadence. Several bars inside one bucket produce one step.
    pub granularity: Granularity,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Most recent bars per symbol placed on each snapshot.
    pub lookback_bars: usize,
    pub metrics: MetricsConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            strategy_name: "simulation".to_string(),
            initial_cash: Decimal::new(10_000, 0),
            granularity: Granularity::Day1,
            start: None,
            end: None,
            lookback_bars: 250,
            metrics: MetricsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Decimal,
    pub drawdown: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub strategy_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_cash: Decimal,
    pub final_value: Decimal,
    pub final_cash: Decimal,
    pub steps: usize,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    /// Signals the ledger refused.
    pub rejected_signals: usize,
    /// Signals with no bar for their symbol in the current bucket.
    pub unpriced_signals: usize,
    pub metrics: PerformanceMetrics,
}

impl SimulationReport {
    /// Last equity value per calendar day.
    pub fn daily_values(&self) -> Vec<Decimal> {
        daily_values(&self.equity_curve)
    }
}

pub(crate) fn daily_values(curve: &[EquityPoint]) -> Vec<Decimal> {
    let mut out: Vec<(chrono::NaiveDate, Decimal)> = Vec::new();
    for point in curve {
        let day = point.timestamp.date_naive();
        match out.last_mut() {
            Some((d, v)) if *d == day => *v = point.value,
            _ => out.push((day, point.value)),
        }
    }
    out.into_iter().map(|(_, v)| v).collect()
}
