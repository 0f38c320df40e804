use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV bar data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: f64,
}

impl Bar {
    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0)
    }

    pub fn high_f64(&self) -> f64 {
        self.high.to_f64().unwrap_or(0.0)
    }

    pub fn low_f64(&self) -> f64 {
        self.low.to_f64().unwrap_or(0.0)
    }
}

/// Bar granularity requested from a market data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute1,
    Minute5,
    Minute15,
    Hour1,
    Day1,
}

impl Granularity {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Granularity::Minute1 => 1,
            Granularity::Minute5 => 5,
            Granularity::Minute15 => 15,
            Granularity::Hour1 => 60,
            Granularity::Day1 => 1440,
        }
    }

    pub fn is_intraday(&self) -> bool {
        !matches!(self, Granularity::Day1)
    }

    /// Start of the bucket containing `ts`, aligned to the Unix epoch in UTC.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.to_minutes() * 60;
        let secs = ts.timestamp();
        DateTime::from_timestamp(secs - secs.rem_euclid(width), 0).unwrap_or(ts)
    }
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1min" | "minute1" => Ok(Granularity::Minute1),
            "5min" | "minute5" => Ok(Granularity::Minute5),
            "15min" | "minute15" => Ok(Granularity::Minute15),
            "1hour" | "hour1" => Ok(Granularity::Hour1),
            "daily" | "1day" | "day1" => Ok(Granularity::Day1),
            other => Err(format!("unknown granularity '{}'", other)),
        }
    }
}
