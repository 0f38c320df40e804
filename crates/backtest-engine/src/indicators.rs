use decision_core::{Bar, Indicators};

pub const SMA_20: &str = "sma_20";
pub const RSI_14: &str = "rsi_14";
pub const RETURN_1: &str = "return_1";

/// Simple moving average of the last `period` values.
pub fn sma(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period {
        return None;
    }
    Some(data[data.len() - period..].iter().sum::<f64>() / period as f64)
}

/// Relative Strength Index with Wilder smoothing, evaluated at the last value.
pub fn rsi(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = data.windows(2).map(|w| w[1] - w[0]).collect();
    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / period as f64;

    for change in &changes[period..] {
        avg_gain = (avg_gain * (period - 1) as f64 + change.max(0.0)) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + (-change).max(0.0)) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// Fractional change of the last value over the one before it.
pub fn last_return(data: &[f64]) -> Option<f64> {
    match data {
        [.., prev, last] if *prev != 0.0 => Some(last / prev - 1.0),
        _ => None,
    }
}

/// The indicator set attached to every snapshot. Indicators without enough
/// history are left out.
pub fn compute(bars: &[Bar]) -> Indicators {
    let closes: Vec<f64> = bars.iter().map(|b| b.close_f64()).collect();
    let mut out = Indicators::new();
    if let Some(v) = sma(&closes, 20) {
        out.insert(SMA_20.to_string(), v);
    }
    if let Some(v) = rsi(&closes, 14) {
        out.insert(RSI_14.to_string(), v);
    }
    if let Some(v) = last_return(&closes) {
        out.insert(RETURN_1.to_string(), v);
    }
    out
}
