use crate::portfolio::Portfolio;
use crate::store::{LedgerStore, StoreError};
use async_trait::async_trait;
use core_types::{Trade, TradePage, TradeQuery};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;

/// Failures the in-memory store can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The next trade insert fails after the portfolio write has been staged.
    FailNextTradeInsert,
    /// The next `n` version-guarded writes report a conflict.
    ConflictNextCommits(u32),
    /// Every operation fails until faults are cleared.
    Unavailable,
}

#[derive(Debug, Default)]
struct State {
    portfolios: HashMap<String, Portfolio>,
    trades: Vec<Trade>,
    transaction_ids: HashSet<String>,
    portfolio_writes: u64,
    fail_next_trade_insert: bool,
    forced_conflicts: u32,
    unavailable: bool,
}

impl State {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }

    /// Validates the optimistic-lock token and returns the version to store.
    fn next_version(&mut self, portfolio: &Portfolio) -> Result<i64, StoreError> {
        if self.forced_conflicts > 0 {
            self.forced_conflicts -= 1;
            return Err(StoreError::Conflict);
        }
        let stored = self.portfolios.get(portfolio.user_id()).map(Portfolio::version);
        match (stored, portfolio.version()) {
            (None, 0) => Ok(1),
            (Some(current), expected) if current == expected => Ok(current + 1),
            _ => Err(StoreError::Conflict),
        }
    }
}

/// A `LedgerStore` held entirely in memory.
///
/// Each write runs under one exclusive lock, which gives it the same all-or-nothing
/// behavior as a database transaction. Used by the tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    read_latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every portfolio read, widening the window between load and commit.
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = Some(latency);
        self
    }

    pub async fn inject(&self, fault: Fault) {
        let mut state = self.state.write().await;
        match fault {
            Fault::FailNextTradeInsert => state.fail_next_trade_insert = true,
            Fault::ConflictNextCommits(n) => state.forced_conflicts = n,
            Fault::Unavailable => state.unavailable = true,
        }
    }

    pub async fn clear_faults(&self) {
        let mut state = self.state.write().await;
        state.fail_next_trade_insert = false;
        state.forced_conflicts = 0;
        state.unavailable = false;
    }

    /// Number of successful portfolio writes (inserts and updates).
    pub async fn portfolio_writes(&self) -> u64 {
        self.state.read().await.portfolio_writes
    }

    pub async fn trades_for(&self, user_id: &str) -> Vec<Trade> {
        let state = self.state.read().await;
        state
            .trades
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load_portfolio(&self, user_id: &str) -> Result<Option<Portfolio>, StoreError> {
        let portfolio = {
            let state = self.state.read().await;
            state.check_available()?;
            state.portfolios.get(user_id).cloned()
        };
        if let Some(latency) = self.read_latency {
            tokio::time::sleep(latency).await;
        }
        Ok(portfolio)
    }

    async fn create_portfolio(&self, portfolio: &Portfolio) -> Result<Portfolio, StoreError> {
        let mut state = self.state.write().await;
        state.check_available()?;
        if let Some(existing) = state.portfolios.get(portfolio.user_id()) {
            return Ok(existing.clone());
        }

        let mut stored = portfolio.clone();
        stored.set_version(1);
        state
            .portfolios
            .insert(stored.user_id().to_string(), stored.clone());
        state.portfolio_writes += 1;
        Ok(stored)
    }

    async fn commit_trade(&self, portfolio: &Portfolio, trade: &Trade) -> Result<i64, StoreError> {
        let mut state = self.state.write().await;
        state.check_available()?;
        let version = state.next_version(portfolio)?;

        // Stage the portfolio write; nothing is applied until the trade insert succeeds.
        let mut staged = portfolio.clone();
        staged.set_version(version);

        if state.fail_next_trade_insert {
            state.fail_next_trade_insert = false;
            return Err(StoreError::Backend("injected trade insert failure".to_string()));
        }
        if state.transaction_ids.contains(&trade.transaction_id) {
            return Err(StoreError::DuplicateTransaction(trade.transaction_id.clone()));
        }

        state.transaction_ids.insert(trade.transaction_id.clone());
        state.trades.push(trade.clone());
        state.portfolios.insert(staged.user_id().to_string(), staged);
        state.portfolio_writes += 1;
        Ok(version)
    }

    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<i64, StoreError> {
        let mut state = self.state.write().await;
        state.check_available()?;
        let version = state.next_version(portfolio)?;

        let mut stored = portfolio.clone();
        stored.set_version(version);
        state.portfolios.insert(stored.user_id().to_string(), stored);
        state.portfolio_writes += 1;
        Ok(version)
    }

    async fn list_trades(&self, query: &TradeQuery) -> Result<TradePage, StoreError> {
        let state = self.state.read().await;
        state.check_available()?;

        // Trades are appended in commit order, so reverse iteration is newest first.
        let matching: Vec<&Trade> = state
            .trades
            .iter()
            .rev()
            .filter(|t| t.user_id == query.user_id)
            .filter(|t| query.trade_type.is_none_or(|kind| t.trade_type == kind))
            .collect();

        let total_items = matching.len() as u64;
        let trades = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .cloned()
            .collect();

        Ok(TradePage::new(trades, query, total_items))
    }
}
