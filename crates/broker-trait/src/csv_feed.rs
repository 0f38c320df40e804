use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use decision_core::{Bar, Granularity};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::MarketData;

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    #[serde(default)]
    volume: f64,
}

/// Historical bars read from `<dir>/<SYMBOL>.csv` files with a
/// `timestamp,open,high,low,close,volume` header.
///
/// Timestamps may be RFC 3339 or plain `YYYY-MM-DD` dates (midnight UTC).
pub struct CsvMarketData {
    base_path: PathBuf,
}

impl CsvMarketData {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol))
    }

    /// Symbols with a CSV file in the directory, sorted.
    pub fn list_symbols(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.base_path)
            .with_context(|| format!("failed to read directory {}", self.base_path.display()))?;

        let mut symbols = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("csv") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    symbols.push(stem.to_string());
                }
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    /// Every bar in the symbol's file, sorted by timestamp.
    pub async fn load_symbol(&self, symbol: &str) -> Result<Vec<Bar>> {
        let path = self.csv_path(symbol);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        parse_bars(&content).with_context(|| format!("bad CSV in {}", path.display()))
    }

    /// Load every symbol in the directory.
    pub async fn load_all(&self) -> Result<HashMap<String, Vec<Bar>>> {
        let mut all = HashMap::new();
        for symbol in self.list_symbols()? {
            let bars = self.load_symbol(&symbol).await?;
            tracing::debug!("Loaded {} bars for {} from {}", bars.len(), symbol, self.base_path.display());
            all.insert(symbol, bars);
        }
        Ok(all)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid timestamp '{}'", raw))?;
    match date.and_hms_opt(0, 0, 0) {
        Some(dt) => Ok(dt.and_utc()),
        None => bail!("invalid date '{}'", raw),
    }
}

pub(crate) fn parse_bars(content: &str) -> Result<Vec<Bar>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut bars = Vec::new();
    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.with_context(|| format!("CSV parse error on data row {}", line + 1))?;
        if row.close <= Decimal::ZERO {
            bail!("non-positive close on data row {}", line + 1);
        }
        bars.push(Bar {
            timestamp: parse_timestamp(&row.timestamp)?,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

/// Merge consecutive bars that fall in the same `granularity` bucket.
///
/// open = first open, high = max high, low = min low, close = last close,
/// volume = sum. The merged bar carries the last member's timestamp.
pub fn resample(bars: &[Bar], granularity: Granularity) -> Vec<Bar> {
    let mut out: Vec<Bar> = Vec::new();
    let mut current_bucket = None;

    for bar in bars {
        let bucket = granularity.bucket_start(bar.timestamp);
        match out.last_mut() {
            Some(last) if current_bucket == Some(bucket) => {
                last.high = last.high.max(bar.high);
                last.low = last.low.min(bar.low);
                last.close = bar.close;
                last.volume += bar.volume;
                last.timestamp = bar.timestamp;
            }
            _ => {
                out.push(bar.clone());
                current_bucket = Some(bucket);
            }
        }
    }
    out
}

/// Shortest spacing between consecutive bars, in minutes.
fn native_minutes(bars: &[Bar]) -> Option<i64> {
    bars.windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_minutes())
        .filter(|m| *m > 0)
        .min()
}

#[async_trait]
impl MarketData for CsvMarketData {
    async fn get_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<Bar>> {
        let bars: Vec<Bar> = self
            .load_symbol(symbol)
            .await?
            .into_iter()
            .filter(|b| b.timestamp >= start && b.timestamp <= end)
            .collect();

        match native_minutes(&bars) {
            Some(native) if native < granularity.to_minutes() => Ok(resample(&bars, granularity)),
            _ => Ok(bars),
        }
    }
}
