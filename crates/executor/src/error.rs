use crate::store::StoreError;
use core_types::CoreError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("Invalid trade request: {0}")]
    Validation(String),

    #[error("Insufficient funds. Required: {required}, Available: {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Crypto asset not found in portfolio: {0}")]
    HoldingNotFound(String),

    #[error("Insufficient {symbol} balance. Requested: {requested}, Available: {available}")]
    InsufficientHoldings {
        symbol: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Portfolio was modified concurrently; gave up after {attempts} attempt(s)")]
    ConcurrencyConflict { attempts: u32 },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

impl ExecutorError {
    /// Only lost optimistic-lock races are worth retrying as a whole.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutorError::ConcurrencyConflict { .. })
    }

    /// The HTTP status an API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ExecutorError::Validation(_)
            | ExecutorError::InsufficientFunds { .. }
            | ExecutorError::InsufficientHoldings { .. } => 400,
            ExecutorError::HoldingNotFound(_) => 404,
            ExecutorError::ConcurrencyConflict { .. } => 409,
            ExecutorError::PersistenceFailure(_) => 500,
        }
    }
}

impl From<CoreError> for ExecutorError {
    fn from(err: CoreError) -> Self {
        ExecutorError::Validation(err.to_string())
    }
}

impl From<StoreError> for ExecutorError {
    fn from(err: StoreError) -> Self {
        match err {
            // A clashing transaction id is resolved the same way: retry with a fresh one.
            StoreError::Conflict | StoreError::DuplicateTransaction(_) => {
                ExecutorError::ConcurrencyConflict { attempts: 1 }
            }
            StoreError::Unavailable(_) | StoreError::Backend(_) => {
                ExecutorError::PersistenceFailure(err.to_string())
            }
        }
    }
}
