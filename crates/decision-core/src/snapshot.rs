use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Bar;

/// Named indicator values for one symbol (e.g. "sma_20", "rsi_14").
pub type Indicators = BTreeMap<String, f64>;

/// Market regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketRegime {
    Bull,
    Bear,
    Sideways,
    Volatile,
}

impl MarketRegime {
    pub fn name(&self) -> &'static str {
        match self {
            MarketRegime::Bull => "bull",
            MarketRegime::Bear => "bear",
            MarketRegime::Sideways => "sideways",
            MarketRegime::Volatile => "volatile",
        }
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for MarketRegime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bull" | "bullish" | "trending_bullish" => Ok(MarketRegime::Bull),
            "bear" | "bearish" | "trending_bearish" => Ok(MarketRegime::Bear),
            "sideways" | "ranging" | "neutral" => Ok(MarketRegime::Sideways),
            "volatile" | "high_volatility" => Ok(MarketRegime::Volatile),
            other => Err(format!("unknown regime '{}'", other)),
        }
    }
}

/// Output of the regime classifier consumed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeAssessment {
    pub regime: MarketRegime,
    pub confidence: f64,
    /// Recommended risk posture in [0, 1].
    pub risk_posture: f64,
}

impl RegimeAssessment {
    /// Fallback used whenever the regime producer cannot answer.
    pub fn conservative() -> Self {
        Self {
            regime: MarketRegime::Sideways,
            confidence: 0.0,
            risk_posture: 0.3,
        }
    }
}

/// Read-only view of market and portfolio state handed to every producer.
///
/// A snapshot is immutable for the duration of a cycle; the orchestrator
/// derives a new one (see [`ContextSnapshot::with_regime`]) once the regime
/// and risk budget are known.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub timestamp: DateTime<Utc>,
    pub prices: HashMap<String, Decimal>,
    pub bars: HashMap<String, Vec<Bar>>,
    pub indicators: HashMap<String, Indicators>,
    pub cash: Decimal,
    /// Share count per held symbol.
    pub holdings: HashMap<String, Decimal>,
    pub portfolio_value: Decimal,
    /// Fractional drawdown from peak, e.g. 0.12 for 12%.
    pub drawdown: Decimal,
    pub peak_value: Decimal,
    /// Risk budget fraction in [0, 1].
    pub risk_budget: f64,
    pub regime: Option<RegimeAssessment>,
}

impl ContextSnapshot {
    pub fn new(timestamp: DateTime<Utc>, cash: Decimal) -> Self {
        Self {
            timestamp,
            cash,
            portfolio_value: cash,
            peak_value: cash,
            risk_budget: 1.0,
            ..Default::default()
        }
    }

    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }

    pub fn shares(&self, symbol: &str) -> Decimal {
        self.holdings.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn drawdown_f64(&self) -> f64 {
        self.drawdown.to_f64().unwrap_or(0.0)
    }

    /// Symbols with a strictly positive share count, sorted for stable output.
    pub fn held_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .holdings
            .iter()
            .filter(|(_, qty)| **qty > Decimal::ZERO)
            .map(|(s, _)| s.clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// Derive the snapshot trading producers see: same market and portfolio
    /// state, plus the classified regime and the derived risk budget.
    pub fn with_regime(&self, assessment: RegimeAssessment, risk_budget: f64) -> Self {
        Self {
            regime: Some(assessment),
            risk_budget: risk_budget.clamp(0.0, 1.0),
            ..self.clone()
        }
    }
}
