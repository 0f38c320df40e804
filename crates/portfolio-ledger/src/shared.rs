use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::ledger::Ledger;
use crate::models::{Rejection, Trade};

/// A [`Ledger`] shared between tasks (e.g. a trading loop and a supervisor).
///
/// All mutation goes through the single write lock. Read-then-decide
/// sequences such as "look up shares, then sell them" run inside one write
/// guard so no other writer can interleave.
#[derive(Clone)]
pub struct SharedLedger {
    inner: Arc<RwLock<Ledger>>,
}

impl SharedLedger {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ledger)),
        }
    }

    pub async fn buy(
        &self,
        symbol: &str,
        amount: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<Trade, Rejection> {
        self.inner.write().await.buy(symbol, amount, price, timestamp, reason)
    }

    pub async fn sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<Trade, Rejection> {
        self.inner.write().await.sell(symbol, quantity, price, timestamp, reason)
    }

    /// Sell whatever is held of `symbol` under one write guard.
    pub async fn sell_all(
        &self,
        symbol: &str,
        price: Decimal,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<Trade, Rejection> {
        let mut ledger = self.inner.write().await;
        let held = ledger.shares(symbol);
        if held.is_zero() {
            return Err(Rejection::NotHeld(symbol.to_string()));
        }
        ledger.sell(symbol, held, price, timestamp, reason)
    }

    pub async fn value(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        self.inner.read().await.value(prices)
    }

    pub async fn cash(&self) -> Decimal {
        self.inner.read().await.cash()
    }

    pub async fn holdings(&self) -> HashMap<String, Decimal> {
        self.inner.read().await.holdings()
    }

    /// Point-in-time copy of the whole ledger.
    pub async fn snapshot(&self) -> Ledger {
        self.inner.read().await.clone()
    }

    /// Run `f` with exclusive access.
    pub async fn with_write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Ledger) -> R,
    {
        let mut ledger = self.inner.write().await;
        f(&mut ledger)
    }
}
