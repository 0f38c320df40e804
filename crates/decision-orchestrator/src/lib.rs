//! Per-cycle decision orchestration: regime classification, risk budget,
//! producer fan-in, gating and signal materialization, with every step
//! recorded on a shared [`Blackboard`].

pub mod blackboard;
pub mod engine;
pub mod gate;
pub mod risk_budget;

pub use blackboard::{Blackboard, BlackboardEntry};
pub use engine::{keys, DecisionEngine, EngineConfig, FlattenRecord};
pub use gate::{aggregate, gate, materialize, AggregatedIntent, GateConfig};
pub use risk_budget::{drawdown_multiplier, risk_budget};
