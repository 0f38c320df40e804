pub mod client;
pub mod error;
pub mod producer;

pub use client::{
    IntentDto, ReasoningBackend, ReasoningClient, ReasoningConfig, ReasoningRequest, ReasoningResponse,
    RegimeDto, SnapshotView,
};
pub use error::{ReasoningError, ReasoningResult};
pub use producer::{ProducerRole, ReasoningProducer, REGIME_PROMPT, TRADING_PROMPT};
