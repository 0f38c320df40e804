use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use decision_core::{Bar, Granularity, Side, Signal, Sizing};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod csv_feed;
pub mod paper;

pub use csv_feed::CsvMarketData;
pub use paper::PaperBroker;

// ---------------------------------------------------------------------------
// Unified broker types (broker-agnostic)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountTotals {
    pub cash: Decimal,
    pub equity: Decimal,
    pub buying_power: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub current_price: Option<Decimal>,
}

impl BrokerPosition {
    pub fn market_value(&self) -> Option<Decimal> {
        self.current_price.map(|p| p * self.qty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerOrderSide {
    Buy,
    Sell,
}

impl From<Side> for BrokerOrderSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => BrokerOrderSide::Buy,
            Side::Sell => BrokerOrderSide::Sell,
        }
    }
}

/// Order size: dollars (notional) or shares.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSize {
    Notional(Decimal),
    Qty(Decimal),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrderRequest {
    pub symbol: String,
    pub side: BrokerOrderSide,
    pub size: OrderSize,
    pub reason: String,
}

impl BrokerOrderRequest {
    pub fn buy_notional(symbol: impl Into<String>, amount: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side: BrokerOrderSide::Buy,
            size: OrderSize::Notional(amount),
            reason: String::new(),
        }
    }

    pub fn sell(symbol: impl Into<String>, qty: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side: BrokerOrderSide::Sell,
            size: OrderSize::Qty(qty),
            reason: String::new(),
        }
    }
}

impl From<&Signal> for BrokerOrderRequest {
    fn from(signal: &Signal) -> Self {
        Self {
            symbol: signal.symbol.clone(),
            side: signal.side.into(),
            size: match signal.sizing {
                Sizing::Amount(a) => OrderSize::Notional(a),
                Sizing::Quantity(q) => OrderSize::Qty(q),
            },
            reason: signal.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Filled,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub symbol: String,
    pub side: BrokerOrderSide,
    pub filled_qty: Option<Decimal>,
    pub filled_avg_price: Option<Decimal>,
    pub status: OrderStatus,
    /// Why the order was rejected, if it was.
    pub message: Option<String>,
}

impl BrokerOrder {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Historical and recent price bars.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Bars for `symbol` with `start <= timestamp <= end`, oldest first,
    /// at the requested granularity.
    async fn get_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<Bar>>;
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Cash, equity and buying power
    async fn get_account(&self) -> Result<AccountTotals>;

    /// Get all open positions
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>>;

    /// Get a specific position by symbol (None if no position)
    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>>;

    /// Submit a market order. A broker-side refusal is a `Rejected` order,
    /// not an error.
    async fn submit_order(&self, order: BrokerOrderRequest) -> Result<BrokerOrder>;

    async fn is_market_open(&self) -> Result<bool>;

    /// Whether this is a paper/simulated account
    fn is_paper(&self) -> bool;

    /// Broker name for logging
    fn broker_name(&self) -> &str;
}
