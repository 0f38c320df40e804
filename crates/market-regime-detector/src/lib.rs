use async_trait::async_trait;
use chrono::{DateTime, Utc};
use decision_core::{
    Bar, ContextSnapshot, MarketRegime, ProducerError, Proposal, ProposalExtra, ProposalProducer,
    RegimeAssessment,
};
use serde::{Deserialize, Serialize};

/// Risk posture the orchestrator should take in each regime (1.0 = full risk).
pub fn risk_posture(regime: MarketRegime) -> f64 {
    match regime {
        MarketRegime::Bull => 0.9,
        MarketRegime::Sideways => 0.6,
        MarketRegime::Volatile => 0.4,
        MarketRegime::Bear => 0.3,
    }
}

/// Regime detection result with confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeDetectionResult {
    pub regime: MarketRegime,
    pub confidence: f64,
    pub metrics: RegimeMetrics,
    pub detected_at: DateTime<Utc>,
    pub reasoning: String,
}

impl RegimeDetectionResult {
    pub fn assessment(&self) -> RegimeAssessment {
        RegimeAssessment {
            regime: self.regime,
            confidence: self.confidence,
            risk_posture: risk_posture(self.regime),
        }
    }
}

/// Market regime metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegimeMetrics {
    /// Average True Range (ATR) as percentage
    pub atr_percent: f64,

    /// Regression slope of the last 20 closes over their mean; negative = bearish
    pub trend_strength: f64,

    /// Volatility (standard deviation of returns)
    pub volatility: f64,

    /// Range efficiency (directional movement / total movement)
    pub range_efficiency: f64,

    /// Number of bars analyzed
    pub sample_size: usize,
}

/// Rule-based market regime detector
pub struct MarketRegimeDetector {
    /// Minimum bars required for analysis
    min_bars: usize,
}

impl MarketRegimeDetector {
    pub fn new() -> Self {
        Self { min_bars: 50 }
    }

    pub fn with_min_bars(min_bars: usize) -> Self {
        Self {
            min_bars: min_bars.max(20),
        }
    }

    pub fn min_bars(&self) -> usize {
        self.min_bars
    }

    /// Classify the regime of `bars`, or `None` when there are too few.
    pub fn detect_regime(&self, bars: &[Bar]) -> Option<RegimeDetectionResult> {
        if bars.len() < self.min_bars {
            return None;
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close_f64()).collect();
        if closes.iter().any(|c| *c <= 0.0 || !c.is_finite()) {
            return None;
        }

        let metrics = self.calculate_metrics(bars, &closes);
        let (regime, confidence, reasoning) = self.classify_regime(&metrics);

        Some(RegimeDetectionResult {
            regime,
            confidence,
            metrics,
            detected_at: bars.last().map(|b| b.timestamp).unwrap_or_else(Utc::now),
            reasoning,
        })
    }

    fn calculate_metrics(&self, bars: &[Bar], closes: &[f64]) -> RegimeMetrics {
        RegimeMetrics {
            atr_percent: self.calculate_atr_percent(bars),
            trend_strength: self.calculate_trend_strength(closes),
            volatility: self.calculate_volatility(closes),
            range_efficiency: self.calculate_range_efficiency(closes),
            sample_size: bars.len(),
        }
    }

    /// Calculate Average True Range as percentage of price
    fn calculate_atr_percent(&self, bars: &[Bar]) -> f64 {
        if bars.len() < 14 {
            return 0.0;
        }

        let true_ranges: Vec<f64> = bars
            .windows(2)
            .map(|w| {
                let high = w[1].high_f64();
                let low = w[1].low_f64();
                let prev_close = w[0].close_f64();
                (high - low)
                    .max((high - prev_close).abs())
                    .max((low - prev_close).abs())
            })
            .collect();

        // Average the last 14 true ranges
        let recent = &true_ranges[true_ranges.len().saturating_sub(14)..];
        let atr = recent.iter().sum::<f64>() / recent.len() as f64;
        let current_price = bars.last().map(|b| b.close_f64()).unwrap_or(0.0);
        if current_price <= 0.0 {
            return 0.0;
        }

        (atr / current_price) * 100.0
    }

    /// Linear regression slope of the last 20 closes, normalized by their mean
    fn calculate_trend_strength(&self, closes: &[f64]) -> f64 {
        if closes.len() < 20 {
            return 0.0;
        }

        let recent = &closes[closes.len() - 20..];
        let n = recent.len() as f64;
        let sum_x: f64 = (0..recent.len()).map(|i| i as f64).sum();
        let sum_y: f64 = recent.iter().sum();
        let sum_xy: f64 = recent.iter().enumerate().map(|(i, c)| i as f64 * c).sum();
        let sum_x2: f64 = (0..recent.len()).map(|i| (i * i) as f64).sum();

        let slope = (n * sum_xy - sum_x * sum_y) / (n * sum_x2 - sum_x * sum_x);
        slope / (sum_y / n)
    }

    /// Calculate volatility (standard deviation of returns)
    fn calculate_volatility(&self, closes: &[f64]) -> f64 {
        if closes.len() < 2 {
            return 0.0;
        }

        let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;

        variance.sqrt()
    }

    /// Net movement over total movement; 1.0 is a straight line
    fn calculate_range_efficiency(&self, closes: &[f64]) -> f64 {
        let (first, last) = match (closes.first(), closes.last()) {
            (Some(f), Some(l)) if closes.len() >= 2 => (*f, *l),
            _ => return 0.0,
        };

        let total_movement: f64 = closes.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
        if total_movement == 0.0 {
            return 0.0;
        }

        (last - first).abs() / total_movement
    }

    /// Score each regime from the metrics and pick the best
    fn classify_regime(&self, metrics: &RegimeMetrics) -> (MarketRegime, f64, String) {
        let mut bull = 0.0;
        let mut bear = 0.0;
        let mut sideways = 0.0;
        let mut volatile = 0.0;

        if metrics.volatility > 0.03 {
            volatile += 40.0;
        }
        // Quiet tape counts toward sideways
        if metrics.volatility < 0.01 {
            sideways += 30.0;
        }
        if metrics.trend_strength > 0.01 && metrics.range_efficiency > 0.5 {
            bull += 50.0;
        }
        if metrics.trend_strength < -0.01 && metrics.range_efficiency > 0.5 {
            bear += 50.0;
        }
        if metrics.range_efficiency < 0.3 && metrics.volatility < 0.025 {
            sideways += 40.0;
        }
        if metrics.atr_percent > 3.0 {
            volatile += 20.0;
        } else if metrics.atr_percent < 1.0 {
            sideways += 20.0;
        }

        // Ties resolve toward the more cautious regime
        let candidates = [
            (MarketRegime::Bear, bear),
            (MarketRegime::Volatile, volatile),
            (MarketRegime::Sideways, sideways),
            (MarketRegime::Bull, bull),
        ];
        let (regime, score) = candidates
            .iter()
            .copied()
            .fold((MarketRegime::Sideways, 0.0), |best, c| if c.1 > best.1 { c } else { best });

        let confidence = f64::min(score / 100.0, 1.0);
        let reasoning = format!(
            "{} (trend: {:.3}, volatility: {:.2}%, efficiency: {:.2}, ATR: {:.2}%)",
            regime,
            metrics.trend_strength,
            metrics.volatility * 100.0,
            metrics.range_efficiency,
            metrics.atr_percent
        );

        (regime, confidence, reasoning)
    }
}

impl Default for MarketRegimeDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Regime producer that classifies a benchmark symbol's bars from the snapshot.
pub struct RegimeProducer {
    detector: MarketRegimeDetector,
    benchmark: String,
}

impl RegimeProducer {
    pub fn new(benchmark: impl Into<String>) -> Self {
        Self {
            detector: MarketRegimeDetector::new(),
            benchmark: benchmark.into(),
        }
    }

    pub fn with_detector(mut self, detector: MarketRegimeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn benchmark(&self) -> &str {
        &self.benchmark
    }
}

#[async_trait]
impl ProposalProducer for RegimeProducer {
    fn name(&self) -> &str {
        "regime-detector"
    }

    async fn analyze(&self, snapshot: &ContextSnapshot) -> Result<Proposal, ProducerError> {
        let bars = snapshot.bars.get(&self.benchmark).map(Vec::as_slice).unwrap_or(&[]);
        let result = self.detector.detect_regime(bars).ok_or_else(|| {
            ProducerError::InsufficientData(format!(
                "{} has {} usable bars, need {}",
                self.benchmark,
                bars.len(),
                self.detector.min_bars()
            ))
        })?;

        tracing::debug!("Regime for {}: {}", self.benchmark, result.reasoning);

        let assessment = result.assessment();
        Ok(Proposal {
            producer: self.name().to_string(),
            timestamp: snapshot.timestamp,
            intents: Vec::new(),
            conviction: assessment.confidence,
            risk_score: 1.0 - assessment.risk_posture,
            rationale: result.reasoning,
            extra: Some(ProposalExtra::Regime(assessment)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn dec(x: f64) -> Decimal {
        Decimal::from_f64_retain(x).unwrap().round_dp(6)
    }

    fn bars_from(closes: &[f64], band: f64) -> Vec<Bar> {
        let start = Utc::now() - Duration::days(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar {
                timestamp: start + Duration::days(i as i64),
                open: dec(*c),
                high: dec(c * (1.0 + band)),
                low: dec(c * (1.0 - band)),
                close: dec(*c),
                volume: 1000.0,
            })
            .collect()
    }

    fn geometric(count: usize, growth: f64) -> Vec<f64> {
        (0..count).map(|i| 100.0 * growth.powi(i as i32)).collect()
    }

    fn alternating(count: usize, swing: f64) -> Vec<f64> {
        (0..count)
            .map(|i| if i % 2 == 0 { 100.0 } else { 100.0 * (1.0 + swing) })
            .collect()
    }

    #[test]
    fn test_uptrend_detection() {
        let detector = MarketRegimeDetector::new();
        let result = detector.detect_regime(&bars_from(&geometric(100, 1.015), 0.01)).unwrap();

        assert_eq!(result.regime, MarketRegime::Bull);
        assert!(result.metrics.trend_strength > 0.01);
    }

    #[test]
    fn test_downtrend_detection() {
        let detector = MarketRegimeDetector::new();
        let result = detector.detect_regime(&bars_from(&geometric(100, 0.985), 0.01)).unwrap();

        assert_eq!(result.regime, MarketRegime::Bear);
        assert!(result.metrics.trend_strength < -0.01);
    }

    #[test]
    fn test_choppy_market_is_volatile() {
        let detector = MarketRegimeDetector::new();
        let result = detector.detect_regime(&bars_from(&alternating(80, 0.06), 0.02)).unwrap();

        assert_eq!(result.regime, MarketRegime::Volatile);
        assert!(result.metrics.volatility > 0.03);
    }

    #[test]
    fn test_quiet_range_is_sideways() {
        let detector = MarketRegimeDetector::new();
        let result = detector.detect_regime(&bars_from(&alternating(80, 0.002), 0.001)).unwrap();

        assert_eq!(result.regime, MarketRegime::Sideways);
        approx::assert_relative_eq!(result.confidence, 0.9);
    }

    #[test]
    fn test_insufficient_data() {
        let detector = MarketRegimeDetector::new();
        assert!(detector.detect_regime(&bars_from(&geometric(10, 1.0), 0.01)).is_none());
    }

    #[test]
    fn test_posture_ordering() {
        assert!(risk_posture(MarketRegime::Bull) > risk_posture(MarketRegime::Sideways));
        assert!(risk_posture(MarketRegime::Sideways) > risk_posture(MarketRegime::Volatile));
        assert!(risk_posture(MarketRegime::Volatile) > risk_posture(MarketRegime::Bear));
    }

    #[tokio::test]
    async fn test_producer_returns_regime_payload() {
        let mut snapshot = ContextSnapshot::new(Utc::now(), Decimal::new(10_000, 0));
        snapshot.bars.insert("SPY".to_string(), bars_from(&geometric(60, 1.015), 0.01));

        let producer = RegimeProducer::new("SPY");
        let proposal = producer.analyze(&snapshot).await.unwrap();
        let assessment = proposal.regime().unwrap();
        assert_eq!(assessment.regime, MarketRegime::Bull);
        assert_eq!(assessment.risk_posture, 0.9);
        assert!(proposal.intents.is_empty());
    }

    #[tokio::test]
    async fn test_producer_without_benchmark_bars_errors() {
        let snapshot = ContextSnapshot::new(Utc::now(), Decimal::new(10_000, 0));
        let err = RegimeProducer::new("SPY").analyze(&snapshot).await.unwrap_err();
        assert!(matches!(err, ProducerError::InsufficientData(_)));
    }
}
