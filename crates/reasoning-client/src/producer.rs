use std::sync::Arc;

use async_trait::async_trait;
use decision_core::{
    Action, ContextSnapshot, MarketRegime, ProducerError, Proposal, ProposalExtra, ProposalProducer,
    RegimeAssessment, SignalIntent, Sizing, TradeIdeaNotes,
};
use rust_decimal::Decimal;

use crate::client::{IntentDto, ReasoningBackend, ReasoningRequest, ReasoningResponse, SnapshotView};

pub const REGIME_PROMPT: &str = "You classify the current market regime. Answer with JSON containing \
\"regime\": {\"regime\": one of bull|bear|sideways|volatile, \"confidence\": 0-1, \
\"risk_posture\": 0-1}, plus \"rationale\". Do not propose trades.";

pub const TRADING_PROMPT: &str = "You are a portfolio manager working inside the given risk budget. \
Answer with JSON containing \"intents\" (each with symbol, action buy|sell|hold, exactly one of \
amount in dollars or quantity in shares, and reason), \"conviction\" 0-1, \"risk_score\" 0-1 and \
\"rationale\". An empty intents list means no opportunity.";

/// What the producer is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerRole {
    Regime,
    Trading,
}

/// A [`ProposalProducer`] that delegates the decision to a reasoning backend.
pub struct ReasoningProducer {
    name: String,
    role: ProducerRole,
    model: String,
    system_prompt: String,
    backend: Arc<dyn ReasoningBackend>,
}

impl ReasoningProducer {
    pub fn new(
        name: impl Into<String>,
        role: ProducerRole,
        model: impl Into<String>,
        backend: Arc<dyn ReasoningBackend>,
    ) -> Self {
        let system_prompt = match role {
            ProducerRole::Regime => REGIME_PROMPT,
            ProducerRole::Trading => TRADING_PROMPT,
        };
        Self {
            name: name.into(),
            role,
            model: model.into(),
            system_prompt: system_prompt.to_string(),
            backend,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn role(&self) -> ProducerRole {
        self.role
    }

    fn into_proposal(
        &self,
        snapshot: &ContextSnapshot,
        response: ReasoningResponse,
    ) -> Result<Proposal, ProducerError> {
        let extra = match self.role {
            ProducerRole::Regime => {
                let dto = response.regime.ok_or_else(|| {
                    ProducerError::InvalidResponse("regime answer without a regime".to_string())
                })?;
                let regime: MarketRegime = dto.regime.parse().map_err(ProducerError::InvalidResponse)?;
                Some(ProposalExtra::Regime(RegimeAssessment {
                    regime,
                    confidence: clamp_unit(dto.confidence),
                    risk_posture: clamp_unit(dto.risk_posture),
                }))
            }
            ProducerRole::Trading if !response.watchlist.is_empty() || response.horizon.is_some() => {
                Some(ProposalExtra::TradeIdeas(TradeIdeaNotes {
                    watchlist: response.watchlist,
                    horizon: response.horizon,
                }))
            }
            ProducerRole::Trading => None,
        };

        let intents = match self.role {
            ProducerRole::Regime => Vec::new(),
            ProducerRole::Trading => response
                .intents
                .into_iter()
                .filter_map(|dto| match parse_intent(dto) {
                    Ok(intent) => Some(intent),
                    Err(reason) => {
                        tracing::warn!("{}: discarding intent: {}", self.name, reason);
                        None
                    }
                })
                .collect(),
        };

        Ok(Proposal {
            producer: self.name.clone(),
            timestamp: snapshot.timestamp,
            intents,
            conviction: clamp_unit(response.conviction),
            risk_score: clamp_unit(response.risk_score),
            rationale: response.rationale,
            extra,
        })
    }
}

fn clamp_unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Validate one backend intent: known action, and for buy/sell exactly one
/// positive size.
fn parse_intent(dto: IntentDto) -> Result<SignalIntent, String> {
    let symbol = dto.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err("empty symbol".to_string());
    }
    let action = match dto.action.trim().to_ascii_lowercase().as_str() {
        "buy" => Action::Buy,
        "sell" => Action::Sell,
        "hold" => Action::Hold,
        other => return Err(format!("unknown action '{}' for {}", other, symbol)),
    };

    let sizing = match (dto.amount, dto.quantity) {
        (Some(_), Some(_)) => return Err(format!("{} has both amount and quantity", symbol)),
        (Some(a), None) if a > Decimal::ZERO => Some(Sizing::Amount(a)),
        (None, Some(q)) if q > Decimal::ZERO => Some(Sizing::Quantity(q)),
        (None, None) => None,
        _ => return Err(format!("{} has a non-positive size", symbol)),
    };
    if action != Action::Hold && sizing.is_none() {
        return Err(format!("{} {:?} without a size", symbol, action));
    }

    Ok(SignalIntent {
        symbol,
        action,
        sizing: if action == Action::Hold { None } else { sizing },
        reason: dto.reason,
    })
}

#[async_trait]
impl ProposalProducer for ReasoningProducer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, snapshot: &ContextSnapshot) -> Result<Proposal, ProducerError> {
        let request = ReasoningRequest {
            model: &self.model,
            producer: &self.name,
            system_prompt: &self.system_prompt,
            snapshot: SnapshotView::from(snapshot),
        };
        let response = self.backend.complete(&request).await?;
        self.into_proposal(snapshot, response)
    }

    fn system_prompt(&self) -> Option<&str> {
        Some(&self.system_prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RegimeDto;
    use crate::error::{ReasoningError, ReasoningResult};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Returns a fixed response and remembers the prompt it was sent.
    struct StubBackend {
        response: Option<ReasoningResponse>,
        seen_prompt: Mutex<Option<String>>,
    }

    impl StubBackend {
        fn answering(response: ReasoningResponse) -> Arc<Self> {
            Arc::new(Self {
                response: Some(response),
                seen_prompt: Mutex::new(None),
            })
        }

        fn down() -> Arc<Self> {
            Arc::new(Self {
                response: None,
                seen_prompt: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl ReasoningBackend for StubBackend {
        async fn complete(&self, request: &ReasoningRequest<'_>) -> ReasoningResult<ReasoningResponse> {
            *self.seen_prompt.lock().unwrap() = Some(request.system_prompt.to_string());
            self.response
                .clone()
                .ok_or_else(|| ReasoningError::ServiceUnavailable("Status: 503".to_string()))
        }
    }

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot::new(Utc::now(), dec!(10000))
    }

    #[tokio::test]
    async fn test_trading_producer_keeps_valid_intents_only() {
        let backend = StubBackend::answering(ReasoningResponse {
            intents: vec![
                IntentDto {
                    symbol: "aapl".to_string(),
                    action: "buy".to_string(),
                    amount: Some(dec!(500)),
                    reason: "momentum".to_string(),
                    ..Default::default()
                },
                IntentDto {
                    symbol: "MSFT".to_string(),
                    action: "sell".to_string(),
                    amount: Some(dec!(100)),
                    quantity: Some(dec!(2)),
                    ..Default::default()
                },
                IntentDto {
                    symbol: "TSLA".to_string(),
                    action: "short".to_string(),
                    quantity: Some(dec!(1)),
                    ..Default::default()
                },
            ],
            conviction: 1.4,
            ..Default::default()
        });
        let producer = ReasoningProducer::new("llm-trader", ProducerRole::Trading, "m", backend.clone());

        let proposal = producer.analyze(&snapshot()).await.unwrap();
        assert_eq!(proposal.intents.len(), 1);
        assert_eq!(proposal.intents[0].symbol, "AAPL");
        assert_eq!(proposal.intents[0].sizing, Some(Sizing::Amount(dec!(500))));
        assert_eq!(proposal.conviction, 1.0);
        assert_eq!(backend.seen_prompt.lock().unwrap().as_deref(), Some(TRADING_PROMPT));
    }

    #[tokio::test]
    async fn test_regime_producer_builds_typed_payload() {
        let backend = StubBackend::answering(ReasoningResponse {
            regime: Some(RegimeDto {
                regime: "bearish".to_string(),
                confidence: 0.8,
                risk_posture: 0.25,
            }),
            ..Default::default()
        });
        let producer = ReasoningProducer::new("llm-regime", ProducerRole::Regime, "m", backend);
        assert_eq!(producer.system_prompt(), Some(REGIME_PROMPT));

        let proposal = producer.analyze(&snapshot()).await.unwrap();
        let assessment = proposal.regime().unwrap();
        assert_eq!(assessment.regime, MarketRegime::Bear);
        assert_eq!(assessment.risk_posture, 0.25);
    }

    #[tokio::test]
    async fn test_regime_answer_without_regime_is_invalid() {
        let backend = StubBackend::answering(ReasoningResponse::default());
        let producer = ReasoningProducer::new("llm-regime", ProducerRole::Regime, "m", backend);
        let err = producer.analyze(&snapshot()).await.unwrap_err();
        assert!(matches!(err, ProducerError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_backend_outage_maps_to_producer_error() {
        let producer = ReasoningProducer::new("llm-trader", ProducerRole::Trading, "m", StubBackend::down());
        let err = producer.analyze(&snapshot()).await.unwrap_err();
        assert!(matches!(err, ProducerError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_watchlist_becomes_trade_ideas() {
        let backend = StubBackend::answering(ReasoningResponse {
            watchlist: vec!["NVDA".to_string()],
            horizon: Some("2w".to_string()),
            ..Default::default()
        });
        let producer = ReasoningProducer::new("llm-trader", ProducerRole::Trading, "m", backend)
            .with_system_prompt("custom");
        let proposal = producer.analyze(&snapshot()).await.unwrap();
        assert!(proposal.intents.is_empty());
        assert!(matches!(proposal.extra, Some(ProposalExtra::TradeIdeas(ref n)) if n.watchlist == ["NVDA"]));
    }
}
