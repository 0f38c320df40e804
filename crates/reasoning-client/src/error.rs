use decision_core::ProducerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),
}

pub type ReasoningResult<T> = Result<T, ReasoningError>;

impl From<ReasoningError> for ProducerError {
    fn from(err: ReasoningError) -> Self {
        match err {
            ReasoningError::Timeout(ms) => ProducerError::Timeout(ms),
            ReasoningError::RequestFailed(e) => ProducerError::BackendUnavailable(e.to_string()),
            ReasoningError::ServiceUnavailable(msg) => ProducerError::BackendUnavailable(msg),
            ReasoningError::InvalidResponse(msg) => ProducerError::InvalidResponse(msg),
        }
    }
}
