//! Domain errors
//!
//! Errors raised by the lifecycle state machine and the account chain.
//! Both indicate a violated invariant and are never retried.

use super::account::AccountStatus;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("Illegal transition for account {account_id}: {from} -> {to}")]
    Illegal {
        account_id: String,
        from: AccountStatus,
        to: AccountStatus,
    },

    #[error("Account {0} has no entry data")]
    MissingEntryData(String),

    #[error("Entry data already recorded for account {0}")]
    EntryAlreadySet(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Account {0} already exists in the chain")]
    DuplicateAccount(String),

    #[error("Account {0} cannot point to itself")]
    SelfLink(String),

    #[error("Account {from} already points to {existing}")]
    AlreadyLinked { from: String, existing: String },

    #[error("Account {to} already has predecessor {existing}")]
    DuplicatePredecessor { to: String, existing: String },

    #[error("Linking {from} -> {to} would create a cycle")]
    Cycle { from: String, to: String },
}
