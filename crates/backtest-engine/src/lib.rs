pub mod engine;
pub mod indicators;
pub mod metrics;
pub mod models;

pub use engine::{SimulationError, Simulator, StrategyFn};
pub use metrics::{compute_metrics, MetricsConfig, PerformanceMetrics, TradeStats};
pub use models::*;

#[cfg(test)]
mod tests;
