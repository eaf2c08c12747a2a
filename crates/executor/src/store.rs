use crate::portfolio::Portfolio;
use async_trait::async_trait;
use core_types::{Trade, TradePage, TradeQuery};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("The portfolio was modified by another writer")]
    Conflict,

    #[error("Transaction id {0} already exists")]
    DuplicateTransaction(String),

    #[error("The store is unavailable: {0}")]
    Unavailable(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// The persistence port of the ledger.
///
/// Implementations must make `commit_trade` all-or-nothing: the portfolio write and the
/// trade insert either both become visible or neither does. Writes are guarded by the
/// portfolio's `version`; a stale version must fail with [`StoreError::Conflict`]
/// without writing anything.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load_portfolio(&self, user_id: &str) -> Result<Option<Portfolio>, StoreError>;

    /// Inserts the portfolio unless one already exists for the user, and returns
    /// whichever is stored afterwards.
    async fn create_portfolio(&self, portfolio: &Portfolio) -> Result<Portfolio, StoreError>;

    /// Atomically writes `portfolio` and appends `trade`. A portfolio with version 0 is
    /// inserted; otherwise the stored version must match. Returns the new version.
    async fn commit_trade(&self, portfolio: &Portfolio, trade: &Trade) -> Result<i64, StoreError>;

    /// Version-guarded write of the portfolio alone. Returns the new version.
    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<i64, StoreError>;

    /// One page of a user's trades, newest first.
    async fn list_trades(&self, query: &TradeQuery) -> Result<TradePage, StoreError>;
}
