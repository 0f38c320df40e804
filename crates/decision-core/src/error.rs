use thiserror::Error;

/// Failure raised by a proposal producer. The orchestrator catches every
/// variant and substitutes a safe default; none of them abort a cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProducerError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Producer error: {0}")]
    Other(String),
}

/// Setup or infrastructure failures that must reach the caller.
#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}
