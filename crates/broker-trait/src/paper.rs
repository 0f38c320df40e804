use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use portfolio_ledger::{Rejection, SharedLedger, Trade};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::{
    AccountTotals, BrokerClient, BrokerOrder, BrokerOrderRequest, BrokerOrderSide, BrokerPosition,
    OrderSize, OrderStatus,
};

/// Simulated broker that fills market orders at the last price it was told
/// about, booking them on a [`SharedLedger`].
pub struct PaperBroker {
    ledger: SharedLedger,
    prices: RwLock<HashMap<String, Decimal>>,
    always_open: bool,
    next_id: AtomicU64,
}

impl PaperBroker {
    pub fn new(ledger: SharedLedger) -> Self {
        Self {
            ledger,
            prices: RwLock::new(HashMap::new()),
            always_open: false,
            next_id: AtomicU64::new(1),
        }
    }

    /// Ignore the regular-session clock (useful for replay and tests).
    pub fn with_always_open(mut self, always_open: bool) -> Self {
        self.always_open = always_open;
        self
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub async fn update_prices(&self, prices: &HashMap<String, Decimal>) {
        let mut current = self.prices.write().await;
        for (symbol, price) in prices {
            current.insert(symbol.clone(), *price);
        }
    }

    pub async fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.read().await.get(symbol).copied()
    }

    fn order_id(&self) -> String {
        format!("paper-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn filled(&self, trade: &Trade, side: BrokerOrderSide) -> BrokerOrder {
        BrokerOrder {
            id: self.order_id(),
            created_at: trade.timestamp,
            filled_at: Some(trade.timestamp),
            symbol: trade.symbol.clone(),
            side,
            filled_qty: Some(trade.quantity),
            filled_avg_price: Some(trade.price),
            status: OrderStatus::Filled,
            message: None,
        }
    }

    fn rejected(&self, order: &BrokerOrderRequest, now: DateTime<Utc>, message: String) -> BrokerOrder {
        tracing::debug!("Paper order {:?} {} rejected: {}", order.side, order.symbol, message);
        BrokerOrder {
            id: self.order_id(),
            created_at: now,
            filled_at: None,
            symbol: order.symbol.clone(),
            side: order.side,
            filled_qty: None,
            filled_avg_price: None,
            status: OrderStatus::Rejected,
            message: Some(message),
        }
    }
}

/// Regular US equity session, 14:30-21:00 UTC on weekdays.
fn in_regular_session(now: DateTime<Utc>) -> bool {
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let minutes = now.hour() * 60 + now.minute();
    (14 * 60 + 30..21 * 60).contains(&minutes)
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn get_account(&self) -> Result<AccountTotals> {
        let prices = self.prices.read().await.clone();
        let cash = self.ledger.cash().await;
        Ok(AccountTotals {
            cash,
            equity: self.ledger.value(&prices).await,
            buying_power: cash,
        })
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        let ledger = self.ledger.snapshot().await;
        let prices = self.prices.read().await;
        let mut positions: Vec<BrokerPosition> = ledger
            .positions()
            .values()
            .map(|p| BrokerPosition {
                symbol: p.symbol.clone(),
                qty: p.quantity,
                avg_entry_price: p.avg_cost,
                current_price: prices.get(&p.symbol).copied(),
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>> {
        Ok(self
            .get_positions()
            .await?
            .into_iter()
            .find(|p| p.symbol == symbol))
    }

    async fn submit_order(&self, order: BrokerOrderRequest) -> Result<BrokerOrder> {
        let now = Utc::now();
        let price = match self.last_price(&order.symbol).await {
            Some(p) => p,
            None => return Ok(self.rejected(&order, now, format!("no price for {}", order.symbol))),
        };

        let result: Result<Trade, Rejection> = match (order.side, order.size) {
            (BrokerOrderSide::Buy, OrderSize::Notional(amount)) => {
                self.ledger.buy(&order.symbol, amount, price, now, &order.reason).await
            }
            (BrokerOrderSide::Buy, OrderSize::Qty(qty)) => match qty.checked_mul(price) {
                Some(amount) => self.ledger.buy(&order.symbol, amount, price, now, &order.reason).await,
                None => Err(Rejection::Overflow("order notional")),
            },
            (BrokerOrderSide::Sell, OrderSize::Qty(qty)) => {
                self.ledger.sell(&order.symbol, qty, price, now, &order.reason).await
            }
            (BrokerOrderSide::Sell, OrderSize::Notional(amount)) => {
                let symbol = order.symbol.clone();
                let reason = order.reason.clone();
                self.ledger
                    .with_write(|ledger| {
                        match amount.checked_div(price) {
                            Some(qty) => ledger.sell(&symbol, qty.min(ledger.shares(&symbol)), price, now, &reason),
                            None => Err(Rejection::Overflow("share count")),
                        }
                    })
                    .await
            }
        };

        Ok(match result {
            Ok(trade) => self.filled(&trade, order.side),
            Err(rejection) => self.rejected(&order, now, rejection.to_string()),
        })
    }

    async fn is_market_open(&self) -> Result<bool> {
        Ok(self.always_open || in_regular_session(Utc::now()))
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn broker_name(&self) -> &str {
        "paper"
    }
}
