use chrono::{DateTime, Utc};
use decision_core::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
}

impl Position {
    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.avg_cost
    }

    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.market_value(price) - self.cost_basis()
    }
}

/// Immutable record of an executed buy or sell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    /// Dollars spent (buy) or received (sell).
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub strategy: Option<String>,
    /// `quantity * (price - avg_cost)` captured at sell time; None for buys.
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,
}

impl Trade {
    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }
}

/// Why the ledger refused a buy or sell. A rejection never mutates state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),

    #[error("price must be positive, got {0}")]
    NonPositivePrice(Decimal),

    #[error("insufficient cash: requested {requested}, available {available}")]
    InsufficientCash { requested: Decimal, available: Decimal },

    #[error("no position in {0}")]
    NotHeld(String),

    #[error("insufficient shares of {symbol}: requested {requested}, held {held}")]
    InsufficientShares {
        symbol: String,
        requested: Decimal,
        held: Decimal,
    },

    #[error("{0} overflows decimal range")]
    Overflow(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionWithPnL {
    #[serde(flatten)]
    pub position: Position,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub cash: Decimal,
    pub total_value: Decimal,
    pub total_cost: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub positions: Vec<PositionWithPnL>,
}
