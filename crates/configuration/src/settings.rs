use crate::error::ConfigError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Parameters for the trade execution engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// The virtual balance every new portfolio is provisioned with.
    pub starting_balance: Decimal,
    /// Upper bound on `amount * price_per_unit` for a single trade.
    pub max_trade_value: Decimal,
    /// How many times a trade is re-attempted after losing an optimistic-lock race.
    pub max_conflict_retries: u32,
    /// Deadline for one load-mutate-commit round trip, in milliseconds.
    pub operation_timeout_ms: u64,
}

/// Connection settings for the PostgreSQL store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Falls back to the `DATABASE_URL` environment variable when unset.
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// When set, logs go to a daily rolling file in this directory instead of stdout.
    pub directory: Option<PathBuf>,
}

// --- Default Implementations ---
// These let a deployment omit any section (or the whole file) and still start.

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            starting_balance: dec!(10000),
            max_trade_value: dec!(1000000),
            max_conflict_retries: 3,
            operation_timeout_ms: 5_000,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

impl LedgerSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl DatabaseSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl Config {
    /// Rejects settings the ledger cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.starting_balance.is_sign_negative() {
            return Err(ConfigError::ValidationError(
                "ledger.starting_balance must not be negative".to_string(),
            ));
        }
        if self.ledger.max_trade_value <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "ledger.max_trade_value must be greater than 0".to_string(),
            ));
        }
        if self.ledger.operation_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "ledger.operation_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
