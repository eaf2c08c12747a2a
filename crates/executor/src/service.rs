use crate::error::ExecutorError;
use crate::portfolio::{Portfolio, PortfolioSummary};
use crate::store::LedgerStore;
use configuration::LedgerSettings;
use core_types::{Trade, TradePage, TradeQuery, TradeRequest, TradeType};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Number of trades included in an overview.
const RECENT_TRADES: u32 = 10;

/// The result of a committed trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeOutcome {
    pub trade: Trade,
    pub portfolio: Portfolio,
}

/// A portfolio together with its valuation and latest activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioOverview {
    pub portfolio: Portfolio,
    pub summary: PortfolioSummary,
    pub recent_trades: Vec<Trade>,
}

/// The trade execution engine.
///
/// `PortfolioService` is the only component that writes portfolios. Each operation is a
/// load-mutate-commit cycle against the injected `LedgerStore`; losing an
/// optimistic-lock race restarts the cycle from a fresh read, up to
/// `max_conflict_retries` times.
pub struct PortfolioService {
    store: Arc<dyn LedgerStore>,
    settings: LedgerSettings,
}

impl PortfolioService {
    pub fn new(store: Arc<dyn LedgerStore>, settings: LedgerSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Executes a buy or sell for `user_id` at the caller-supplied price.
    ///
    /// The user's portfolio is provisioned with the starting balance on first use.
    /// On any error nothing is persisted.
    #[tracing::instrument(
        name = "execute_trade",
        skip_all,
        fields(user_id = %user_id, trade_type = %request.trade_type, symbol = %request.crypto_symbol)
    )]
    pub async fn execute_trade(
        &self,
        user_id: &str,
        request: TradeRequest,
    ) -> Result<TradeOutcome, ExecutorError> {
        let user_id = validate_user_id(user_id)?;
        let request = request.validated(self.settings.max_trade_value)?;
        let total_value = request.total_value()?;

        let outcome = self
            .with_retries("execute_trade", || {
                self.try_execute(user_id, &request, total_value)
            })
            .await
            .inspect_err(|e| match e {
                ExecutorError::PersistenceFailure(_) | ExecutorError::ConcurrencyConflict { .. } => {
                    tracing::error!(error = %e, "Trade execution failed.")
                }
                _ => tracing::info!(error = %e, "Trade rejected."),
            })?;

        tracing::info!(
            transaction_id = %outcome.trade.transaction_id,
            amount = %outcome.trade.amount,
            total_value = %outcome.trade.total_value,
            balance = %outcome.portfolio.account_balance(),
            "Trade executed successfully."
        );
        Ok(outcome)
    }

    async fn try_execute(
        &self,
        user_id: &str,
        request: &TradeRequest,
        total_value: Decimal,
    ) -> Result<TradeOutcome, ExecutorError> {
        let mut portfolio = match self.store.load_portfolio(user_id).await? {
            Some(portfolio) => portfolio,
            None => Portfolio::new(user_id, self.settings.starting_balance),
        };

        match request.trade_type {
            TradeType::Buy => portfolio.apply_buy(request, total_value)?,
            TradeType::Sell => {
                let realized = portfolio.apply_sell(request, total_value)?;
                tracing::debug!(realized = %realized, "Realized profit booked.");
            }
        }

        let trade = Trade::completed(user_id, request, total_value);
        let version = self.store.commit_trade(&portfolio, &trade).await?;
        portfolio.set_version(version);

        Ok(TradeOutcome { trade, portfolio })
    }

    /// Returns the user's portfolio, creating it with the starting balance if needed.
    pub async fn get_portfolio(&self, user_id: &str) -> Result<Portfolio, ExecutorError> {
        let user_id = validate_user_id(user_id)?;
        self.with_deadline("get_portfolio", self.load_or_create(user_id))
            .await
    }

    async fn load_or_create(&self, user_id: &str) -> Result<Portfolio, ExecutorError> {
        if let Some(portfolio) = self.store.load_portfolio(user_id).await? {
            return Ok(portfolio);
        }
        let created = self
            .store
            .create_portfolio(&Portfolio::new(user_id, self.settings.starting_balance))
            .await?;
        tracing::info!(user_id, balance = %created.account_balance(), "Provisioned new portfolio.");
        Ok(created)
    }

    /// Marks the user's holdings to `prices` and persists only if something changed.
    ///
    /// Returns `None` for a user who has never traded; no portfolio is created.
    pub async fn update_holding_prices(
        &self,
        user_id: &str,
        prices: &HashMap<String, Decimal>,
    ) -> Result<Option<Portfolio>, ExecutorError> {
        let user_id = validate_user_id(user_id)?;
        self.with_retries("update_holding_prices", || self.try_reprice(user_id, prices))
            .await
    }

    async fn try_reprice(
        &self,
        user_id: &str,
        prices: &HashMap<String, Decimal>,
    ) -> Result<Option<Portfolio>, ExecutorError> {
        let Some(mut portfolio) = self.store.load_portfolio(user_id).await? else {
            return Ok(None);
        };

        if !portfolio.reprice(prices)? {
            tracing::debug!(user_id, "Prices unchanged, skipping write.");
            return Ok(Some(portfolio));
        }

        let version = self.store.save_portfolio(&portfolio).await?;
        portfolio.set_version(version);
        Ok(Some(portfolio))
    }

    /// One page of the user's trade log, newest first.
    pub async fn trade_history(&self, query: &TradeQuery) -> Result<TradePage, ExecutorError> {
        validate_user_id(&query.user_id)?;
        self.with_deadline("trade_history", async {
            self.store.list_trades(query).await.map_err(ExecutorError::from)
        })
        .await
    }

    /// The portfolio (created if needed), its valuation and the latest trades.
    pub async fn overview(&self, user_id: &str) -> Result<PortfolioOverview, ExecutorError> {
        let user_id = validate_user_id(user_id)?;
        let portfolio = self.get_portfolio(user_id).await?;
        let summary = portfolio.summary()?;
        let recent = self
            .trade_history(&TradeQuery::new(user_id).with_limit(RECENT_TRADES))
            .await?;

        Ok(PortfolioOverview {
            portfolio,
            summary,
            recent_trades: recent.trades,
        })
    }

    /// Runs `attempt` under the operation deadline, restarting it on conflicts.
    async fn with_retries<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, ExecutorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExecutorError>>,
    {
        let max_attempts = self.settings.max_conflict_retries.saturating_add(1);
        let mut attempts = 1;
        loop {
            match self.with_deadline(operation, attempt()).await {
                Err(ExecutorError::ConcurrencyConflict { .. }) if attempts < max_attempts => {
                    tracing::warn!(operation, attempt = attempts, "Concurrent modification detected, retrying.");
                    attempts += 1;
                }
                Err(ExecutorError::ConcurrencyConflict { .. }) => {
                    return Err(ExecutorError::ConcurrencyConflict { attempts });
                }
                other => return other,
            }
        }
    }

    /// Bounds one unit of work. An abandoned attempt never commits, since stores only
    /// publish writes at commit.
    async fn with_deadline<T>(
        &self,
        operation: &'static str,
        work: impl Future<Output = Result<T, ExecutorError>>,
    ) -> Result<T, ExecutorError> {
        let timeout = self.settings.operation_timeout();
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::PersistenceFailure(format!(
                "{} timed out after {:?}",
                operation, timeout
            ))),
        }
    }
}

fn validate_user_id(user_id: &str) -> Result<&str, ExecutorError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(ExecutorError::Validation("user id must not be empty".to_string()));
    }
    Ok(user_id)
}
