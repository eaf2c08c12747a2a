//! # Ledger Executor Crate
//!
//! This crate owns the simulated trading ledger: the `Portfolio` aggregate, the
//! persistence port it is stored through, and `PortfolioService`, the engine that
//! executes buy and sell requests against it.
//!
//! ## Architectural Principles
//!
//! - **Single Writer:** Only `PortfolioService` mutates a portfolio. The state
//!   transitions on `Portfolio` are crate-private; callers receive read-only snapshots.
//! - **Atomic Units of Work:** A trade is computed on a fresh copy of the portfolio and
//!   committed together with its `Trade` record through `LedgerStore::commit_trade`.
//!   A failure at any step leaves the stored state unchanged.
//! - **Optimistic Concurrency:** Every stored portfolio carries a version. A commit
//!   against a stale version is rejected by the store and the engine retries from a
//!   fresh read, so two concurrent trades can never spend the same balance.
//! - **Storage Abstraction:** `LedgerStore` is injected at construction. `MemoryStore`
//!   ships here for tests; the `database` crate provides PostgreSQL.
//!
//! ## Public API
//!
//! - `PortfolioService`: trade execution, portfolio reads, price refresh, history.
//! - `Portfolio`, `PortfolioSummary`: the aggregate and its valuation.
//! - `LedgerStore`, `StoreError`: the persistence port.
//! - `MemoryStore`, `Fault`: in-memory store with fault injection.
//! - `ExecutorError`: the typed failures callers map to user-facing responses.

// Declare the modules that constitute this crate.
pub mod error;
pub mod memory;
pub mod portfolio;
pub mod service;
pub mod store;

// Re-export the key components to provide a clean, public-facing API.
pub use error::ExecutorError;
pub use memory::{Fault, MemoryStore};
pub use portfolio::{Portfolio, PortfolioSnapshot, PortfolioSummary};
pub use service::{PortfolioOverview, PortfolioService, TradeOutcome};
pub use store::{LedgerStore, StoreError};
