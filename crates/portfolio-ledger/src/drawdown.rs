use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Running peak of portfolio value, used to report peak-to-trough drawdown.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DrawdownTracker {
    peak: Decimal,
}

impl DrawdownTracker {
    pub fn new(initial_value: Decimal) -> Self {
        Self {
            peak: initial_value.max(Decimal::ZERO),
        }
    }

    pub fn peak(&self) -> Decimal {
        self.peak
    }

    /// Record a new observation and return the drawdown it represents.
    pub fn update(&mut self, value: Decimal) -> Decimal {
        if value > self.peak {
            self.peak = value;
        }
        self.drawdown(value)
    }

    /// `(peak - value) / peak`, zero while at or above the peak.
    pub fn drawdown(&self, value: Decimal) -> Decimal {
        if self.peak <= Decimal::ZERO || value >= self.peak {
            return Decimal::ZERO;
        }
        (self.peak - value) / self.peak
    }
}
