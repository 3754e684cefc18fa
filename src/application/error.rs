use thiserror::Error;

use crate::domain::{AccountId, Amount};
use crate::storage::StaleWrite;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Account not found: {0}")]
    NotFound(AccountId),

    #[error(
        "Insufficient funds in account {account_id}: balance {balance}, requested {requested}"
    )]
    InsufficientFunds {
        account_id: AccountId,
        balance: Amount,
        requested: Amount,
    },

    /// The account's lock could not be taken in time, or another engine
    /// wrote the account between our read and our write.
    #[error("Account {account_id} is busy, try again")]
    Conflict { account_id: AccountId },

    /// A transfer could be neither completed nor rolled back. The store
    /// holds a half-applied transfer that needs operator attention.
    #[error("Transfer of {amount} from account {from} to account {to} is half-applied: {reason}")]
    Fatal {
        from: AccountId,
        to: AccountId,
        amount: Amount,
        reason: String,
    },

    #[error("Database error: {0:#}")]
    Store(#[source] anyhow::Error),
}

impl From<anyhow::Error> for LedgerError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<StaleWrite>() {
            Some(stale) => LedgerError::Conflict {
                account_id: stale.account_id,
            },
            None => LedgerError::Store(err),
        }
    }
}

/// Coarse error category, for callers mapping failures to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientFunds,
    Conflict,
    Fatal,
    Store,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::Conflict { .. } => ErrorKind::Conflict,
            LedgerError::Fatal { .. } => ErrorKind::Fatal,
            LedgerError::Store(_) => ErrorKind::Store,
        }
    }

    /// True when repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::Fatal { .. })
    }
}
