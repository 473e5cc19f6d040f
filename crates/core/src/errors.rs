use thiserror::Error;

use crate::domain::conversation::ConversationStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid conversation transition from {from:?} to {to:?}")]
    InvalidConversationTransition { from: ConversationStatus, to: ConversationStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
