use executor::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to load environment variables for database connection: {0}")]
    ConnectionConfigError(String),

    #[error("Failed to connect to the database: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("The stored portfolio version no longer matches.")]
    StaleVersion,

    #[error("Transaction id {0} already exists.")]
    DuplicateTransaction(String),

    #[error("A stored row could not be decoded: {0}")]
    CorruptRow(String),
}

/// Translates database failures into the ledger's storage taxonomy.
impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::StaleVersion => StoreError::Conflict,
            DbError::DuplicateTransaction(id) => StoreError::DuplicateTransaction(id),
            DbError::ConnectionError(ref e) => match e {
                sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::Io(_)
                | sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
                // Serialization failures and deadlocks are transient conflicts.
                sqlx::Error::Database(db)
                    if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) =>
                {
                    StoreError::Conflict
                }
                _ => StoreError::Backend(err.to_string()),
            },
            DbError::ConnectionConfigError(_) => StoreError::Unavailable(err.to_string()),
            DbError::MigrationError(_) | DbError::JsonError(_) | DbError::CorruptRow(_) => {
                StoreError::Backend(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_versions_become_conflicts() {
        assert_eq!(StoreError::from(DbError::StaleVersion), StoreError::Conflict);
        assert_eq!(
            StoreError::from(DbError::DuplicateTransaction("TXN1".into())),
            StoreError::DuplicateTransaction("TXN1".into())
        );
    }

    #[test]
    fn pool_exhaustion_is_an_outage() {
        assert!(matches!(
            StoreError::from(DbError::ConnectionError(sqlx::Error::PoolTimedOut)),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from(DbError::ConnectionError(sqlx::Error::RowNotFound)),
            StoreError::Backend(_)
        ));
    }
}
