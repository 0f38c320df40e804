use async_trait::async_trait;

use crate::{ContextSnapshot, Proposal, ProducerError, Signal};

/// Trait for anything that turns a snapshot into a proposal: rule-based
/// classifiers, reasoning-backed agents, test doubles.
///
/// "Nothing to do" is an empty [`Proposal`], not an error. Errors are for
/// infrastructure failures, and any timeout is the producer's own concern.
#[async_trait]
pub trait ProposalProducer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, snapshot: &ContextSnapshot) -> Result<Proposal, ProducerError>;

    /// Instructions sent to a reasoning backend, for producers that use one.
    fn system_prompt(&self) -> Option<&str> {
        None
    }
}

/// Anything the simulation driver or live loop can ask for signals: the
/// decision engine, or a plain strategy function.
#[async_trait]
pub trait SignalSource: Send {
    async fn signals(&mut self, snapshot: &ContextSnapshot) -> Vec<Signal>;
}
