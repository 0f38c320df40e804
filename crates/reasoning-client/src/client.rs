use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use decision_core::{ContextSnapshot, Indicators, RegimeAssessment};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ReasoningError, ReasoningResult};

/// Connection settings for the reasoning backend.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8005".to_string(),
            api_key: None,
            model: "default".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// The parts of a [`ContextSnapshot`] sent to the backend. Raw bar history
/// stays local; indicators summarize it.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotView<'a> {
    pub timestamp: DateTime<Utc>,
    pub prices: &'a HashMap<String, Decimal>,
    pub indicators: &'a HashMap<String, Indicators>,
    pub cash: Decimal,
    pub holdings: &'a HashMap<String, Decimal>,
    pub portfolio_value: Decimal,
    pub drawdown: Decimal,
    pub risk_budget: f64,
    pub regime: Option<&'a RegimeAssessment>,
}

impl<'a> From<&'a ContextSnapshot> for SnapshotView<'a> {
    fn from(s: &'a ContextSnapshot) -> Self {
        Self {
            timestamp: s.timestamp,
            prices: &s.prices,
            indicators: &s.indicators,
            cash: s.cash,
            holdings: &s.holdings,
            portfolio_value: s.portfolio_value,
            drawdown: s.drawdown,
            risk_budget: s.risk_budget,
            regime: s.regime.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasoningRequest<'a> {
    pub model: &'a str,
    pub producer: &'a str,
    pub system_prompt: &'a str,
    pub snapshot: SnapshotView<'a>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentDto {
    pub symbol: String,
    pub action: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeDto {
    pub regime: String,
    pub confidence: f64,
    pub risk_posture: f64,
}

/// Structured answer expected from the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResponse {
    #[serde(default)]
    pub intents: Vec<IntentDto>,
    #[serde(default)]
    pub conviction: f64,
    #[serde(default)]
    pub risk_score: f64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub regime: Option<RegimeDto>,
    #[serde(default)]
    pub watchlist: Vec<String>,
    #[serde(default)]
    pub horizon: Option<String>,
}

/// Anything that can answer a [`ReasoningRequest`]: the HTTP client, or a
/// local stand-in.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn complete(&self, request: &ReasoningRequest<'_>) -> ReasoningResult<ReasoningResponse>;
}

#[derive(Clone)]
pub struct ReasoningClient {
    client: reqwest::Client,
    config: ReasoningConfig,
}

impl ReasoningClient {
    pub fn new(config: ReasoningConfig) -> ReasoningResult<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    fn timeout_ms(&self) -> u64 {
        self.config.timeout.as_millis() as u64
    }

    /// Check if the backend is up
    pub async fn health_check(&self) -> ReasoningResult<bool> {
        let response = self
            .client
            .get(format!("{}/health", self.config.base_url))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn post_decide(&self, request: &ReasoningRequest<'_>) -> ReasoningResult<ReasoningResponse> {
        let mut builder = self
            .client
            .post(format!("{}/v1/decide", self.config.base_url))
            .json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ReasoningError::Timeout(self.timeout_ms())
            } else {
                ReasoningError::RequestFailed(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(ReasoningError::ServiceUnavailable(format!(
                "Status: {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let parsed = serde_json::from_str::<ReasoningResponse>(&body)
            .map_err(|e| ReasoningError::InvalidResponse(format!("{}: {}", e, truncate(&body, 200))))?;
        Ok(parsed)
    }
}

#[async_trait]
impl ReasoningBackend for ReasoningClient {
    async fn complete(&self, request: &ReasoningRequest<'_>) -> ReasoningResult<ReasoningResponse> {
        match tokio::time::timeout(self.config.timeout, self.post_decide(request)).await {
            Ok(result) => result,
            Err(_) => Err(ReasoningError::Timeout(self.timeout_ms())),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
