use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use decision_core::{Proposal, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::models::Trade;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// One audit line from a decision cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub cycle_id: String,
    pub timestamp: DateTime<Utc>,
    pub key: String,
    pub author: String,
    pub value: serde_json::Value,
}

/// Append-only storage for trades, proposals and cycle audit logs, keyed by
/// portfolio id.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn save_trade(&self, portfolio_id: &str, trade: &Trade) -> Result<i64, StoreError>;

    async fn save_proposal(&self, portfolio_id: &str, proposal: &Proposal) -> Result<i64, StoreError>;

    async fn save_audit(&self, portfolio_id: &str, record: &AuditRecord) -> Result<i64, StoreError>;

    /// Trades in `[from, to]`, optionally restricted to one symbol, oldest first.
    async fn query_trades(
        &self,
        portfolio_id: &str,
        symbol: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Trade>, StoreError>;

    async fn query_proposals(
        &self,
        portfolio_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Proposal>, StoreError>;

    async fn query_audit(&self, portfolio_id: &str, cycle_id: &str) -> Result<Vec<AuditRecord>, StoreError>;

    /// Record the portfolio's high-water mark. A lower value than the stored
    /// one leaves it unchanged.
    async fn save_peak(&self, portfolio_id: &str, peak: Decimal, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn load_peak(&self, portfolio_id: &str) -> Result<Option<Decimal>, StoreError>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    portfolio_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity TEXT NOT NULL,
    price TEXT NOT NULL,
    amount TEXT NOT NULL,
    realized_pnl TEXT,
    reason TEXT NOT NULL,
    strategy TEXT,
    executed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trades_portfolio_symbol ON trades (portfolio_id, symbol, executed_at);
CREATE TABLE IF NOT EXISTS proposals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    portfolio_id TEXT NOT NULL,
    producer TEXT NOT NULL,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS cycle_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    portfolio_id TEXT NOT NULL,
    cycle_id TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    author TEXT NOT NULL,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS portfolio_peaks (
    portfolio_id TEXT PRIMARY KEY,
    peak_value TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

fn ts_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", text, e)))
}

fn parse_decimal(text: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(text).map_err(|e| StoreError::Corrupt(format!("decimal '{}': {}", text, e)))
}

/// SQLite-backed [`TradeStore`]. Money is stored as decimal text so values
/// round-trip exactly.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database and make sure the schema exists.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // A single connection keeps `sqlite::memory:` databases coherent.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        // sqlx runs one statement per query
        for statement in SCHEMA.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_trade(row: &sqlx::sqlite::SqliteRow) -> Result<Trade, StoreError> {
        let side = match row.try_get::<String, _>("side")?.as_str() {
            "buy" => Side::Buy,
            "sell" => Side::Sell,
            other => return Err(StoreError::Corrupt(format!("side '{}'", other))),
        };
        let realized_pnl = row
            .try_get::<Option<String>, _>("realized_pnl")?
            .map(|s| parse_decimal(&s))
            .transpose()?;

        Ok(Trade {
            symbol: row.try_get("symbol")?,
            side,
            quantity: parse_decimal(&row.try_get::<String, _>("quantity")?)?,
            price: parse_decimal(&row.try_get::<String, _>("price")?)?,
            amount: parse_decimal(&row.try_get::<String, _>("amount")?)?,
            timestamp: parse_ts(&row.try_get::<String, _>("executed_at")?)?,
            reason: row.try_get("reason")?,
            strategy: row.try_get("strategy")?,
            realized_pnl,
        })
    }
}

#[async_trait]
impl TradeStore for SqliteStore {
    async fn save_trade(&self, portfolio_id: &str, trade: &Trade) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (portfolio_id, symbol, side, quantity, price, amount, realized_pnl, reason, strategy, executed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(portfolio_id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.quantity.to_string())
        .bind(trade.price.to_string())
        .bind(trade.amount.to_string())
        .bind(trade.realized_pnl.map(|d| d.to_string()))
        .bind(&trade.reason)
        .bind(&trade.strategy)
        .bind(ts_text(&trade.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn save_proposal(&self, portfolio_id: &str, proposal: &Proposal) -> Result<i64, StoreError> {
        let body = serde_json::to_string(proposal)?;
        let result = sqlx::query(
            "INSERT INTO proposals (portfolio_id, producer, created_at, body) VALUES (?, ?, ?, ?)",
        )
        .bind(portfolio_id)
        .bind(&proposal.producer)
        .bind(ts_text(&proposal.timestamp))
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn save_audit(&self, portfolio_id: &str, record: &AuditRecord) -> Result<i64, StoreError> {
        let value = serde_json::to_string(&record.value)?;
        let result = sqlx::query(
            r#"
            INSERT INTO cycle_audit (portfolio_id, cycle_id, recorded_at, entry_key, author, value)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(portfolio_id)
        .bind(&record.cycle_id)
        .bind(ts_text(&record.timestamp))
        .bind(&record.key)
        .bind(&record.author)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn query_trades(
        &self,
        portfolio_id: &str,
        symbol: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Trade>, StoreError> {
        let rows = match symbol {
            Some(symbol) => {
                sqlx::query(
                    "SELECT * FROM trades WHERE portfolio_id = ? AND symbol = ? AND executed_at >= ? AND executed_at <= ? ORDER BY executed_at, id",
                )
                .bind(portfolio_id)
                .bind(symbol)
                .bind(ts_text(&from))
                .bind(ts_text(&to))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM trades WHERE portfolio_id = ? AND executed_at >= ? AND executed_at <= ? ORDER BY executed_at, id",
                )
                .bind(portfolio_id)
                .bind(ts_text(&from))
                .bind(ts_text(&to))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::row_to_trade).collect()
    }

    async fn query_proposals(
        &self,
        portfolio_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Proposal>, StoreError> {
        let rows = sqlx::query(
            "SELECT body FROM proposals WHERE portfolio_id = ? AND created_at >= ? AND created_at <= ? ORDER BY created_at, id",
        )
        .bind(portfolio_id)
        .bind(ts_text(&from))
        .bind(ts_text(&to))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Proposal, StoreError> {
                let body: String = row.try_get("body")?;
                Ok(serde_json::from_str(&body)?)
            })
            .collect()
    }

    async fn query_audit(&self, portfolio_id: &str, cycle_id: &str) -> Result<Vec<AuditRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM cycle_audit WHERE portfolio_id = ? AND cycle_id = ? ORDER BY id",
        )
        .bind(portfolio_id)
        .bind(cycle_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AuditRecord, StoreError> {
                let value: String = row.try_get("value")?;
                Ok(AuditRecord {
                    cycle_id: row.try_get("cycle_id")?,
                    timestamp: parse_ts(&row.try_get::<String, _>("recorded_at")?)?,
                    key: row.try_get("entry_key")?,
                    author: row.try_get("author")?,
                    value: serde_json::from_str(&value)?,
                })
            })
            .collect()
    }

    async fn save_peak(&self, portfolio_id: &str, peak: Decimal, at: DateTime<Utc>) -> Result<(), StoreError> {
        // Decimal text does not compare numerically in SQL
        if let Some(stored) = self.load_peak(portfolio_id).await? {
            if stored >= peak {
                return Ok(());
            }
        }
        sqlx::query(
            r#"
            INSERT INTO portfolio_peaks (portfolio_id, peak_value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(portfolio_id) DO UPDATE SET peak_value = excluded.peak_value, updated_at = excluded.updated_at
            "#,
        )
        .bind(portfolio_id)
        .bind(peak.to_string())
        .bind(ts_text(&at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_peak(&self, portfolio_id: &str) -> Result<Option<Decimal>, StoreError> {
        let row = sqlx::query("SELECT peak_value FROM portfolio_peaks WHERE portfolio_id = ?")
            .bind(portfolio_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<Decimal, StoreError> {
            parse_decimal(&row.try_get::<String, _>("peak_value")?)
        })
        .transpose()
    }
}
