use crate::error::ConfigError;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{Config, DatabaseSettings, LedgerSettings, LoggingSettings};

/// Loads the application configuration from `ledger.toml` and the environment.
///
/// The file is optional. Environment variables prefixed with `LEDGER__` override it,
/// using `__` between nesting levels (e.g. `LEDGER__LEDGER__STARTING_BALANCE=5000`).
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from("ledger")
}

/// Same as [`load_config`], reading `<path>.toml` (or any format `config` recognizes).
pub fn load_config_from(path: &str) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("LEDGER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    // Attempt to deserialize the entire configuration into our `Config` struct
    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize::<Config>()
            .unwrap()
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse("");
        assert_eq!(config.ledger.starting_balance, dec!(10000));
        assert_eq!(config.ledger.max_trade_value, dec!(1000000));
        assert_eq!(config.ledger.max_conflict_retries, 3);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = parse(
            r#"
            [ledger]
            starting_balance = "2500.50"
            max_conflict_retries = 1

            [database]
            url = "postgres://localhost/ledger"
            "#,
        );
        assert_eq!(config.ledger.starting_balance, dec!(2500.50));
        assert_eq!(config.ledger.max_conflict_retries, 1);
        assert_eq!(config.ledger.operation_timeout_ms, 5_000);
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/ledger"));
    }

    #[test]
    fn negative_starting_balance_is_rejected() {
        let config = parse("[ledger]\nstarting_balance = \"-1\"");
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = load_config_from("definitely-not-a-ledger-config").unwrap();
        assert!(config.ledger.starting_balance > rust_decimal::Decimal::ZERO);
    }
}
