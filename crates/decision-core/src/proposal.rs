use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::snapshot::RegimeAssessment;

/// Raw action proposed by a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

/// How a signal is sized: a dollar amount or a share quantity, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sizing {
    Amount(Decimal),
    Quantity(Decimal),
}

/// One candidate trade inside a [`Proposal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalIntent {
    pub symbol: String,
    pub action: Action,
    pub sizing: Option<Sizing>,
    pub reason: String,
}

impl SignalIntent {
    pub fn buy_amount(symbol: impl Into<String>, amount: Decimal, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            action: Action::Buy,
            sizing: Some(Sizing::Amount(amount)),
            reason: reason.into(),
        }
    }

    pub fn buy_quantity(symbol: impl Into<String>, quantity: Decimal, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            action: Action::Buy,
            sizing: Some(Sizing::Quantity(quantity)),
            reason: reason.into(),
        }
    }

    pub fn sell_quantity(symbol: impl Into<String>, quantity: Decimal, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            action: Action::Sell,
            sizing: Some(Sizing::Quantity(quantity)),
            reason: reason.into(),
        }
    }

    pub fn sell_amount(symbol: impl Into<String>, amount: Decimal, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            action: Action::Sell,
            sizing: Some(Sizing::Amount(amount)),
            reason: reason.into(),
        }
    }

    pub fn hold(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            action: Action::Hold,
            sizing: None,
            reason: reason.into(),
        }
    }
}

/// Free-form notes attached by a trade idea producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeIdeaNotes {
    pub watchlist: Vec<String>,
    pub horizon: Option<String>,
}

/// Producer-specific payload. The regime classifier answers with
/// [`ProposalExtra::Regime`]; trading producers may attach notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalExtra {
    Regime(RegimeAssessment),
    TradeIdeas(TradeIdeaNotes),
}

/// Everything a producer returns for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub producer: String,
    pub timestamp: DateTime<Utc>,
    pub intents: Vec<SignalIntent>,
    /// Overall conviction in [0, 1].
    pub conviction: f64,
    /// Risk score in [0, 1].
    pub risk_score: f64,
    pub rationale: String,
    #[serde(default)]
    pub extra: Option<ProposalExtra>,
}

impl Proposal {
    /// A proposal with no opportunities. Producers return this instead of an
    /// error when nothing is worth trading.
    pub fn empty(producer: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            producer: producer.into(),
            timestamp,
            intents: Vec::new(),
            conviction: 0.0,
            risk_score: 0.0,
            rationale: String::new(),
            extra: None,
        }
    }

    pub fn regime(&self) -> Option<&RegimeAssessment> {
        match &self.extra {
            Some(ProposalExtra::Regime(assessment)) => Some(assessment),
            _ => None,
        }
    }
}
