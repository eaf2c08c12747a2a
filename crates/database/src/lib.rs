//! # Ledger Database Crate
//!
//! PostgreSQL persistence for the ledger. It is the system's permanent archive of
//! portfolios and the append-only trade log.
//!
//! ## Architectural Principles
//!
//! - **Adapter:** `PgLedgerStore` implements the executor's `LedgerStore` port and
//!   hides all SQL from the rest of the application.
//! - **One Transaction per Trade:** the portfolio write and the trade insert share a
//!   single `sqlx` transaction. It is only committed when both succeed; dropping it
//!   (error, timeout, cancellation) rolls everything back.
//! - **Optimistic Locking:** portfolio updates are guarded by `version`, so a writer
//!   holding a stale snapshot fails with a conflict instead of overwriting newer state.
//!
//! ## Public API
//!
//! - `connect`: builds the connection pool from `DatabaseSettings`.
//! - `run_migrations`: applies the embedded schema migrations.
//! - `PgLedgerStore`: the `LedgerStore` implementation.
//! - `DbError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod repository;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use repository::PgLedgerStore;
