use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use decision_core::{
    ContextSnapshot, Proposal, ProposalProducer, RegimeAssessment, Side, Signal, SignalSource, Sizing,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::blackboard::Blackboard;
use crate::gate::{aggregate, gate, materialize, GateConfig};
use crate::risk_budget::risk_budget;

/// Blackboard keys written by each step of a cycle.
pub mod keys {
    pub const REGIME: &str = "regime";
    pub const RISK_BUDGET: &str = "risk_budget";
    pub const PROPOSALS: &str = "proposals";
    pub const PRODUCER_ERRORS: &str = "producer_errors";
    pub const AGGREGATED: &str = "aggregated";
    pub const GATED: &str = "gated";
    pub const SIGNALS: &str = "signals";
    pub const FLATTEN: &str = "flatten";
}

const AUTHOR: &str = "decision-engine";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gate: GateConfig,
    /// Drawdown at which the engine stops asking producers and sells
    /// everything. Inclusive: a drawdown equal to this value flattens.
    pub max_drawdown: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            max_drawdown: Decimal::new(25, 2),
        }
    }
}

/// What the flatten step decided, as recorded on the blackboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlattenRecord {
    pub drawdown: Decimal,
    pub limit: Decimal,
    pub ordered: Vec<String>,
    pub still_pending: Vec<String>,
}

/// Runs one decision cycle at a time: regime, risk budget, producers,
/// aggregation, gating, signals.
///
/// Producers are awaited one after the other. A failing producer is logged
/// and left out; the cycle itself never fails.
pub struct DecisionEngine {
    config: EngineConfig,
    regime_producer: Option<Box<dyn ProposalProducer>>,
    producers: Vec<Box<dyn ProposalProducer>>,
    blackboard: Arc<Blackboard>,
    /// Symbols already ordered flat whose position has not disappeared yet.
    pending_flatten: HashSet<String>,
}

impl DecisionEngine {
    pub fn new(config: EngineConfig, blackboard: Arc<Blackboard>) -> Self {
        Self {
            config,
            regime_producer: None,
            producers: Vec::new(),
            blackboard,
            pending_flatten: HashSet::new(),
        }
    }

    pub fn with_regime_producer(mut self, producer: Box<dyn ProposalProducer>) -> Self {
        self.regime_producer = Some(producer);
        self
    }

    pub fn with_producer(mut self, producer: Box<dyn ProposalProducer>) -> Self {
        self.producers.push(producer);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn blackboard(&self) -> Arc<Blackboard> {
        Arc::clone(&self.blackboard)
    }

    pub fn producer_names(&self) -> Vec<String> {
        self.producers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Ask the regime producer for an assessment, falling back to the
    /// conservative default on error or when no regime payload comes back.
    pub async fn classify_regime(&self, snapshot: &ContextSnapshot) -> RegimeAssessment {
        let producer = match &self.regime_producer {
            Some(p) => p,
            None => return RegimeAssessment::conservative(),
        };

        match producer.analyze(snapshot).await {
            Ok(proposal) => match proposal.regime() {
                Some(assessment) => {
                    let mut assessment = assessment.clone();
                    assessment.risk_posture = assessment.risk_posture.clamp(0.0, 1.0);
                    assessment.confidence = assessment.confidence.clamp(0.0, 1.0);
                    assessment
                }
                None => {
                    tracing::warn!(
                        "Regime producer {} returned no regime payload, using conservative default",
                        producer.name()
                    );
                    RegimeAssessment::conservative()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Regime producer {} failed: {}, using conservative default",
                    producer.name(),
                    e
                );
                RegimeAssessment::conservative()
            }
        }
    }

    /// Run one full cycle against `snapshot` and return the signals to execute.
    pub async fn run_cycle(&mut self, snapshot: &ContextSnapshot) -> Vec<Signal> {
        self.blackboard.clear();

        if snapshot.drawdown >= self.config.max_drawdown {
            return self.flatten(snapshot);
        }
        self.pending_flatten.clear();

        let assessment = self.classify_regime(snapshot).await;
        self.blackboard.write(keys::REGIME, AUTHOR, &assessment);

        let budget = risk_budget(snapshot.drawdown_f64(), assessment.risk_posture);
        self.blackboard.write(keys::RISK_BUDGET, AUTHOR, &budget);
        tracing::info!(
            "Cycle {}: regime {} (confidence {:.2}), drawdown {:.2}%, risk budget {:.2}",
            snapshot.timestamp,
            assessment.regime,
            assessment.confidence,
            snapshot.drawdown_f64() * 100.0,
            budget
        );

        let cycle_snapshot = snapshot.with_regime(assessment, budget);
        let mut proposals: Vec<Proposal> = Vec::with_capacity(self.producers.len());
        let mut failures: BTreeMap<String, String> = BTreeMap::new();
        for producer in &self.producers {
            match producer.analyze(&cycle_snapshot).await {
                Ok(proposal) => proposals.push(proposal),
                Err(e) => {
                    tracing::warn!("Producer {} failed: {}", producer.name(), e);
                    failures.insert(producer.name().to_string(), e.to_string());
                }
            }
        }
        self.blackboard.write(keys::PROPOSALS, AUTHOR, &proposals);
        if !failures.is_empty() {
            self.blackboard.write(keys::PRODUCER_ERRORS, AUTHOR, &failures);
        }

        let aggregated = aggregate(&proposals);
        self.blackboard.write(keys::AGGREGATED, AUTHOR, &aggregated);

        let gated = gate(aggregated, &cycle_snapshot, &self.config.gate);
        self.blackboard.write(keys::GATED, AUTHOR, &gated);

        let signals = materialize(&gated, snapshot.timestamp);
        self.blackboard.write(keys::SIGNALS, AUTHOR, &signals);

        if !signals.is_empty() {
            tracing::info!(
                "Cycle {}: {} proposals, {} signals",
                snapshot.timestamp,
                proposals.len(),
                signals.len()
            );
        }
        signals
    }

    /// Sell every held position not already ordered flat.
    fn flatten(&mut self, snapshot: &ContextSnapshot) -> Vec<Signal> {
        let held = snapshot.held_symbols();
        self.pending_flatten.retain(|s| held.contains(s));

        let signals: Vec<Signal> = held
            .iter()
            .filter(|s| !self.pending_flatten.contains(*s))
            .map(|symbol| Signal {
                symbol: symbol.clone(),
                side: Side::Sell,
                sizing: Sizing::Quantity(snapshot.shares(symbol)),
                reason: format!(
                    "drawdown {:.2}% breached limit {:.2}%",
                    snapshot.drawdown * Decimal::ONE_HUNDRED,
                    self.config.max_drawdown * Decimal::ONE_HUNDRED
                ),
                confidence: 1.0,
                timestamp: snapshot.timestamp,
            })
            .collect();

        for signal in &signals {
            self.pending_flatten.insert(signal.symbol.clone());
        }
        if !signals.is_empty() {
            tracing::warn!(
                "Drawdown {} >= limit {}, flattening {} positions",
                snapshot.drawdown,
                self.config.max_drawdown,
                signals.len()
            );
        }

        let mut still_pending: Vec<String> = self.pending_flatten.iter().cloned().collect();
        still_pending.sort();
        self.blackboard.write(
            keys::FLATTEN,
            AUTHOR,
            &FlattenRecord {
                drawdown: snapshot.drawdown,
                limit: self.config.max_drawdown,
                ordered: signals.iter().map(|s| s.symbol.clone()).collect(),
                still_pending,
            },
        );
        self.blackboard.write(keys::SIGNALS, AUTHOR, &signals);
        signals
    }
}

#[async_trait]
impl SignalSource for DecisionEngine {
    async fn signals(&mut self, snapshot: &ContextSnapshot) -> Vec<Signal> {
        self.run_cycle(snapshot).await
    }
}
