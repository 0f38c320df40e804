use std::collections::HashMap;

use chrono::{DateTime, Utc};
use decision_core::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::*;

/// Cash, positions and the append-only trade list for one portfolio.
///
/// Every mutating call either succeeds completely or returns a [`Rejection`]
/// with the ledger untouched. Cash never goes negative and no position is
/// ever oversold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    cash: Decimal,
    positions: HashMap<String, Position>,
    trades: Vec<Trade>,
    strategy: Option<String>,
}

impl Ledger {
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            cash: initial_cash.max(Decimal::ZERO),
            positions: HashMap::new(),
            trades: Vec::new(),
            strategy: None,
        }
    }

    /// Tag every trade recorded by this ledger with a strategy identifier.
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn shares(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Share count per held symbol.
    pub fn holdings(&self) -> HashMap<String, Decimal> {
        self.positions
            .iter()
            .map(|(s, p)| (s.clone(), p.quantity))
            .collect()
    }

    /// Spend `amount` dollars on `symbol` at `price`.
    pub fn buy(
        &mut self,
        symbol: &str,
        amount: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<Trade, Rejection> {
        if amount <= Decimal::ZERO {
            return Err(Rejection::NonPositiveAmount(amount));
        }
        if price <= Decimal::ZERO {
            return Err(Rejection::NonPositivePrice(price));
        }
        if amount > self.cash {
            return Err(Rejection::InsufficientCash {
                requested: amount,
                available: self.cash,
            });
        }

        let shares = amount.checked_div(price).ok_or(Rejection::Overflow("share count"))?;
        let (held, held_cost) = self
            .positions
            .get(symbol)
            .map(|p| (p.quantity, p.avg_cost))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));

        // Quantity-weighted blend of the old cost and the new fill.
        let new_quantity = held.checked_add(shares).ok_or(Rejection::Overflow("position size"))?;
        let avg_cost = held
            .checked_mul(held_cost)
            .and_then(|basis| basis.checked_add(amount))
            .and_then(|basis| basis.checked_div(new_quantity))
            .ok_or(Rejection::Overflow("average cost"))?;

        self.positions.insert(
            symbol.to_string(),
            Position {
                symbol: symbol.to_string(),
                quantity: new_quantity,
                avg_cost,
            },
        );
        self.cash -= amount;

        let trade = Trade {
            symbol: symbol.to_string(),
            side: Side::Buy,
            quantity: shares,
            price,
            amount,
            timestamp,
            reason: reason.to_string(),
            strategy: self.strategy.clone(),
            realized_pnl: None,
        };
        self.trades.push(trade.clone());
        Ok(trade)
    }

    /// Sell `quantity` shares of `symbol` at `price`.
    pub fn sell(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<Trade, Rejection> {
        if quantity <= Decimal::ZERO {
            return Err(Rejection::NonPositiveQuantity(quantity));
        }
        if price <= Decimal::ZERO {
            return Err(Rejection::NonPositivePrice(price));
        }
        let held = match self.positions.get(symbol) {
            Some(p) => p.quantity,
            None => return Err(Rejection::NotHeld(symbol.to_string())),
        };
        if quantity > held {
            return Err(Rejection::InsufficientShares {
                symbol: symbol.to_string(),
                requested: quantity,
                held,
            });
        }

        let proceeds = quantity.checked_mul(price).ok_or(Rejection::Overflow("sale proceeds"))?;
        let cash = self.cash.checked_add(proceeds).ok_or(Rejection::Overflow("cash balance"))?;
        let remaining = held - quantity;
        // avg_cost is unchanged by a sell
        let avg_cost = self.positions.get(symbol).map(|p| p.avg_cost).unwrap_or(Decimal::ZERO);
        let realized = price
            .checked_sub(avg_cost)
            .and_then(|gain| gain.checked_mul(quantity))
            .ok_or(Rejection::Overflow("realized pnl"))?;

        if remaining.is_zero() {
            self.positions.remove(symbol);
        } else if let Some(position) = self.positions.get_mut(symbol) {
            position.quantity = remaining;
        }
        self.cash = cash;

        let trade = Trade {
            symbol: symbol.to_string(),
            side: Side::Sell,
            quantity,
            price,
            amount: proceeds,
            timestamp,
            reason: reason.to_string(),
            strategy: self.strategy.clone(),
            realized_pnl: Some(realized),
        };
        self.trades.push(trade.clone());
        Ok(trade)
    }

    /// Cash plus every position marked at `prices`; a missing price counts as zero.
    pub fn value(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        let positions_value: Decimal = self
            .positions
            .values()
            .map(|p| p.market_value(prices.get(&p.symbol).copied().unwrap_or(Decimal::ZERO)))
            .sum();
        self.cash + positions_value
    }

    /// Sum over positions with a known price of `shares * price - shares * avg_cost`.
    pub fn unrealized_pnl(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        self.positions
            .values()
            .filter_map(|p| prices.get(&p.symbol).map(|&price| p.unrealized_pnl(price)))
            .sum()
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.trades.iter().filter_map(|t| t.realized_pnl).sum()
    }

    pub fn summary(&self, prices: &HashMap<String, Decimal>) -> PortfolioSummary {
        let mut positions: Vec<PositionWithPnL> = self
            .positions
            .values()
            .map(|p| {
                let current_price = prices.get(&p.symbol).copied().unwrap_or(Decimal::ZERO);
                PositionWithPnL {
                    position: p.clone(),
                    current_price,
                    market_value: p.market_value(current_price),
                    cost_basis: p.cost_basis(),
                    unrealized_pnl: p.unrealized_pnl(current_price),
                }
            })
            .collect();
        positions.sort_by(|a, b| a.position.symbol.cmp(&b.position.symbol));

        let total_cost = positions.iter().map(|p| p.cost_basis).sum();
        PortfolioSummary {
            cash: self.cash,
            total_value: self.value(prices),
            total_cost,
            unrealized_pnl: positions.iter().map(|p| p.unrealized_pnl).sum(),
            realized_pnl: self.realized_pnl(),
            positions,
        }
    }
}
