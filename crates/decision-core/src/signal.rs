use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::proposal::{Action, Sizing};

/// Executable side of a final signal. There is no hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_action(action: Action) -> Option<Self> {
        match action {
            Action::Buy => Some(Side::Buy),
            Action::Sell => Some(Side::Sell),
            Action::Hold => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A gated, executable trade instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    pub sizing: Sizing,
    pub reason: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn amount(&self) -> Option<Decimal> {
        match self.sizing {
            Sizing::Amount(a) => Some(a),
            Sizing::Quantity(_) => None,
        }
    }

    pub fn quantity(&self) -> Option<Decimal> {
        match self.sizing {
            Sizing::Quantity(q) => Some(q),
            Sizing::Amount(_) => None,
        }
    }
}
