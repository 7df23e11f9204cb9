//! Engine errors

use crate::domain::{ChainError, TransitionError};
use crate::infrastructure::{CollaboratorError, StoreError};
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Account {0} has no armed hedge entry")]
    NotArmed(String),

    #[error("Transfer of {amount} {asset} from {from} to {to} was refused")]
    TransferRefused {
        from: String,
        to: String,
        asset: String,
        amount: f64,
    },
}
