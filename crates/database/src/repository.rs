use crate::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Holding, Trade, TradePage, TradeQuery, TradeStatus, TradeType};
use executor::{LedgerStore, Portfolio, PortfolioSnapshot, StoreError};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::types::Json;
use sqlx::{FromRow, Transaction};
use std::str::FromStr;
use uuid::Uuid;

/// The `PgLedgerStore` is the PostgreSQL implementation of the ledger's `LedgerStore`.
/// It encapsulates all SQL queries and data access logic for portfolios and trades.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

/// A row from the `portfolios` table.
#[derive(Debug, FromRow)]
struct PortfolioRow {
    user_id: String,
    account_balance: Decimal,
    total_invested: Decimal,
    total_returns: Decimal,
    holdings: Json<Vec<Holding>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PortfolioRow {
    fn into_portfolio(self) -> Result<Portfolio, DbError> {
        Portfolio::restore(PortfolioSnapshot {
            user_id: self.user_id,
            account_balance: self.account_balance,
            total_invested: self.total_invested,
            total_returns: self.total_returns,
            holdings: self.holdings.0,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
        .map_err(|e| DbError::CorruptRow(e.to_string()))
    }
}

/// A row from the `trades` table.
#[derive(Debug, FromRow)]
struct TradeRow {
    id: Uuid,
    user_id: String,
    trade_type: String,
    crypto_symbol: String,
    amount: Decimal,
    price_per_unit: Decimal,
    total_value: Decimal,
    status: String,
    transaction_id: String,
    created_at: DateTime<Utc>,
}

impl TradeRow {
    fn into_trade(self) -> Result<Trade, DbError> {
        let trade_type = TradeType::from_str(&self.trade_type)
            .map_err(|e| DbError::CorruptRow(e.to_string()))?;
        let status = TradeStatus::from_str(&self.status)
            .map_err(|e| DbError::CorruptRow(e.to_string()))?;
        Ok(Trade {
            id: self.id,
            user_id: self.user_id,
            trade_type,
            crypto_symbol: self.crypto_symbol,
            amount: self.amount,
            price_per_unit: self.price_per_unit,
            total_value: self.total_value,
            status,
            transaction_id: self.transaction_id,
            created_at: self.created_at,
        })
    }
}

const SELECT_PORTFOLIO: &str = r#"
    SELECT user_id, account_balance, total_invested, total_returns, holdings, version, created_at, updated_at
    FROM portfolios
    WHERE user_id = $1
"#;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn holdings_json(portfolio: &Portfolio) -> Json<Vec<&Holding>> {
    Json(portfolio.holdings().collect())
}

impl PgLedgerStore {
    /// Creates a new `PgLedgerStore` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_portfolio(&self, user_id: &str) -> Result<Option<Portfolio>, DbError> {
        let row = sqlx::query_as::<_, PortfolioRow>(SELECT_PORTFOLIO)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PortfolioRow::into_portfolio).transpose()
    }

    /// Inserts a never-persisted portfolio or updates a stored one if its version
    /// still matches. Returns the version now stored.
    async fn write_portfolio(
        tx: &mut Transaction<'_, Postgres>,
        portfolio: &Portfolio,
    ) -> Result<i64, DbError> {
        if portfolio.version() == 0 {
            sqlx::query(
                r#"
                INSERT INTO portfolios
                    (user_id, account_balance, total_invested, total_returns, holdings, version, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, 1, $6, $7)
                "#,
            )
            .bind(portfolio.user_id())
            .bind(portfolio.account_balance())
            .bind(portfolio.total_invested())
            .bind(portfolio.total_returns())
            .bind(holdings_json(portfolio))
            .bind(portfolio.created_at())
            .bind(portfolio.updated_at())
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                // Someone else provisioned this user between our read and write.
                if is_unique_violation(&e) {
                    DbError::StaleVersion
                } else {
                    e.into()
                }
            })?;
            return Ok(1);
        }

        let version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE portfolios
            SET account_balance = $2,
                total_invested = $3,
                total_returns = $4,
                holdings = $5,
                updated_at = $6,
                version = version + 1
            WHERE user_id = $1 AND version = $7
            RETURNING version
            "#,
        )
        .bind(portfolio.user_id())
        .bind(portfolio.account_balance())
        .bind(portfolio.total_invested())
        .bind(portfolio.total_returns())
        .bind(holdings_json(portfolio))
        .bind(portfolio.updated_at())
        .bind(portfolio.version())
        .fetch_optional(&mut **tx)
        .await?;

        version.ok_or(DbError::StaleVersion)
    }

    async fn insert_trade(tx: &mut Transaction<'_, Postgres>, trade: &Trade) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO trades
                (id, user_id, trade_type, crypto_symbol, amount, price_per_unit, total_value, status, transaction_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(trade.id)
        .bind(&trade.user_id)
        .bind(trade.trade_type.as_str())
        .bind(&trade.crypto_symbol)
        .bind(trade.amount)
        .bind(trade.price_per_unit)
        .bind(trade.total_value)
        .bind(trade.status.as_str())
        .bind(&trade.transaction_id)
        .bind(trade.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DbError::DuplicateTransaction(trade.transaction_id.clone())
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn commit_trade_tx(&self, portfolio: &Portfolio, trade: &Trade) -> Result<i64, DbError> {
        let mut tx: Transaction<Postgres> = self.pool.begin().await?;
        let version = Self::write_portfolio(&mut tx, portfolio).await?;
        Self::insert_trade(&mut tx, trade).await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn save_portfolio_tx(&self, portfolio: &Portfolio) -> Result<i64, DbError> {
        let mut tx: Transaction<Postgres> = self.pool.begin().await?;
        let version = Self::write_portfolio(&mut tx, portfolio).await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn create_portfolio_if_absent(&self, portfolio: &Portfolio) -> Result<Portfolio, DbError> {
        sqlx::query(
            r#"
            INSERT INTO portfolios
                (user_id, account_balance, total_invested, total_returns, holdings, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 1, $6, $7)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(portfolio.user_id())
        .bind(portfolio.account_balance())
        .bind(portfolio.total_invested())
        .bind(portfolio.total_returns())
        .bind(holdings_json(portfolio))
        .bind(portfolio.created_at())
        .bind(portfolio.updated_at())
        .execute(&self.pool)
        .await?;

        self.fetch_portfolio(portfolio.user_id())
            .await?
            .ok_or_else(|| DbError::CorruptRow(format!("portfolio {} vanished after insert", portfolio.user_id())))
    }

    async fn fetch_trades(&self, query: &TradeQuery) -> Result<TradePage, DbError> {
        let trade_type = query.trade_type.map(|t| t.as_str());

        let total_items: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM trades WHERE user_id = $1 AND ($2::TEXT IS NULL OR trade_type = $2)",
        )
        .bind(&query.user_id)
        .bind(trade_type)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, TradeRow>(
            r#"
            SELECT id, user_id, trade_type, crypto_symbol, amount, price_per_unit, total_value, status, transaction_id, created_at
            FROM trades
            WHERE user_id = $1 AND ($2::TEXT IS NULL OR trade_type = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(&query.user_id)
        .bind(trade_type)
        .bind(i64::from(query.limit))
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let trades = rows
            .into_iter()
            .map(TradeRow::into_trade)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TradePage::new(trades, query, total_items.max(0) as u64))
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn load_portfolio(&self, user_id: &str) -> Result<Option<Portfolio>, StoreError> {
        Ok(self.fetch_portfolio(user_id).await?)
    }

    async fn create_portfolio(&self, portfolio: &Portfolio) -> Result<Portfolio, StoreError> {
        Ok(self.create_portfolio_if_absent(portfolio).await?)
    }

    async fn commit_trade(&self, portfolio: &Portfolio, trade: &Trade) -> Result<i64, StoreError> {
        self.commit_trade_tx(portfolio, trade).await.map_err(|e| {
            if !matches!(e, DbError::StaleVersion | DbError::DuplicateTransaction(_)) {
                tracing::error!(error = ?e, user_id = portfolio.user_id(), "Trade commit rolled back.");
            }
            StoreError::from(e)
        })
    }

    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<i64, StoreError> {
        Ok(self.save_portfolio_tx(portfolio).await?)
    }

    async fn list_trades(&self, query: &TradeQuery) -> Result<TradePage, StoreError> {
        Ok(self.fetch_trades(query).await?)
    }
}
