use crate::error::ExecutorError;
use chrono::{DateTime, Utc};
use core_types::{CoreError, Holding, TradeRequest, money};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};

/// A user's virtual account: cash balance, cumulative counters and open holdings.
///
/// Only the trade execution engine mutates a portfolio. Every transition is computed
/// on a private copy and either fully applied or discarded, so a rejected trade leaves
/// the value exactly as it was.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    user_id: String,
    account_balance: Decimal,
    total_invested: Decimal,
    total_returns: Decimal,
    #[serde(serialize_with = "holdings_as_list")]
    holdings: BTreeMap<String, Holding>,
    /// Optimistic-concurrency token. Zero means the portfolio was never persisted.
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Stored state handed to [`Portfolio::restore`] by persistence backends.
#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    pub user_id: String,
    pub account_balance: Decimal,
    pub total_invested: Decimal,
    pub total_returns: Decimal,
    pub holdings: Vec<Holding>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate valuation used by dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub account_balance: Decimal,
    pub holdings_value: Decimal,
    pub total_portfolio_value: Decimal,
    pub total_invested: Decimal,
    pub total_returns: Decimal,
    pub total_holdings: usize,
}

fn holdings_as_list<S: Serializer>(
    holdings: &BTreeMap<String, Holding>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(holdings.values())
}

impl Portfolio {
    /// Creates an unsaved portfolio with the given starting capital.
    pub fn new(user_id: &str, starting_balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            account_balance: starting_balance,
            total_invested: Decimal::ZERO,
            total_returns: Decimal::ZERO,
            holdings: BTreeMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds a portfolio from storage, re-checking its invariants.
    pub fn restore(snapshot: PortfolioSnapshot) -> Result<Self, CoreError> {
        if snapshot.account_balance < Decimal::ZERO {
            return Err(CoreError::InvalidInput(
                "accountBalance".to_string(),
                "must not be negative".to_string(),
            ));
        }

        let mut holdings = BTreeMap::new();
        for holding in snapshot.holdings {
            let symbol = holding.crypto_symbol().to_string();
            if holdings.insert(symbol.clone(), holding).is_some() {
                return Err(CoreError::InvalidInput(
                    "holdings".to_string(),
                    format!("duplicate holding for {}", symbol),
                ));
            }
        }

        Ok(Self {
            user_id: snapshot.user_id,
            account_balance: snapshot.account_balance,
            total_invested: snapshot.total_invested,
            total_returns: snapshot.total_returns,
            holdings,
            version: snapshot.version,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn account_balance(&self) -> Decimal {
        self.account_balance
    }

    pub fn total_invested(&self) -> Decimal {
        self.total_invested
    }

    pub fn total_returns(&self) -> Decimal {
        self.total_returns
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Holdings ordered by symbol.
    pub fn holdings(&self) -> impl Iterator<Item = &Holding> {
        self.holdings.values()
    }

    pub fn holding(&self, symbol: &str) -> Option<&Holding> {
        self.holdings.get(symbol)
    }

    pub(crate) fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    /// Cash plus the marked value of every holding.
    pub fn summary(&self) -> Result<PortfolioSummary, CoreError> {
        let holdings_value = self
            .holdings
            .values()
            .try_fold(Decimal::ZERO, |acc, h| money::add(acc, h.total_value()))?;

        Ok(PortfolioSummary {
            account_balance: self.account_balance,
            holdings_value,
            total_portfolio_value: money::add(self.account_balance, holdings_value)?,
            total_invested: self.total_invested,
            total_returns: self.total_returns,
            total_holdings: self.holdings.len(),
        })
    }

    /// Debits `total_value` and folds the purchase into the symbol's holding.
    ///
    /// `request` must already be validated and `total_value` must equal
    /// `amount * price_per_unit`.
    pub(crate) fn apply_buy(
        &mut self,
        request: &TradeRequest,
        total_value: Decimal,
    ) -> Result<(), ExecutorError> {
        if money::cmp(self.account_balance, total_value).is_lt() {
            return Err(ExecutorError::InsufficientFunds {
                required: total_value,
                available: self.account_balance,
            });
        }

        // Compute everything before touching `self` so an overflow cannot leave half an update.
        let account_balance = money::sub(self.account_balance, total_value)?;
        let total_invested = money::add(self.total_invested, total_value)?;
        let holding = match self.holdings.get(&request.crypto_symbol) {
            Some(existing) => {
                let mut holding = existing.clone();
                holding.accumulate(request.amount, request.price_per_unit)?;
                holding
            }
            None => Holding::open(&request.crypto_symbol, request.amount, request.price_per_unit)?,
        };

        self.account_balance = account_balance;
        self.total_invested = total_invested;
        self.holdings.insert(request.crypto_symbol.clone(), holding);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Credits `total_value`, shrinks or removes the holding and books the realized
    /// profit against the average buy price in effect before the sale.
    ///
    /// Returns the realized profit (negative for a loss).
    pub(crate) fn apply_sell(
        &mut self,
        request: &TradeRequest,
        total_value: Decimal,
    ) -> Result<Decimal, ExecutorError> {
        let symbol = &request.crypto_symbol;
        let existing = self
            .holdings
            .get(symbol)
            .ok_or_else(|| ExecutorError::HoldingNotFound(symbol.clone()))?;

        if money::cmp(existing.amount(), request.amount).is_lt() {
            return Err(ExecutorError::InsufficientHoldings {
                symbol: symbol.clone(),
                requested: request.amount,
                available: existing.amount(),
            });
        }

        let cost_of_sold = money::mul(existing.average_buy_price(), request.amount)?;
        let realized = money::sub(total_value, cost_of_sold)?;
        let account_balance = money::add(self.account_balance, total_value)?;
        let total_returns = money::add(self.total_returns, realized)?;
        let remaining = existing
            .clone()
            .reduce(request.amount, request.price_per_unit)?;

        self.account_balance = account_balance;
        self.total_returns = total_returns;
        match remaining {
            Some(holding) => {
                self.holdings.insert(symbol.clone(), holding);
            }
            None => {
                self.holdings.remove(symbol);
            }
        }
        self.updated_at = Utc::now();
        Ok(realized)
    }

    /// Marks holdings to the supplied prices.
    ///
    /// Prices are looked up per held symbol; keys matching nothing held (blank ones
    /// included) are ignored, as are non-positive and unchanged prices.
    /// Returns whether any holding changed.
    pub(crate) fn reprice(&mut self, prices: &HashMap<String, Decimal>) -> Result<bool, CoreError> {
        let mut repriced = self.holdings.clone();
        let mut changed = false;
        for holding in repriced.values_mut() {
            let Some(price) = price_for(prices, holding.crypto_symbol()) else {
                continue;
            };
            if price <= Decimal::ZERO || price == holding.current_price() {
                continue;
            }
            holding.revalue(price)?;
            changed = true;
        }

        if changed {
            self.holdings = repriced;
            self.updated_at = Utc::now();
        }
        Ok(changed)
    }
}

/// The quote for `symbol`. An exact key wins; otherwise keys equal to it after trimming
/// and ignoring case are considered, and the lexicographically smallest one is used.
fn price_for(prices: &HashMap<String, Decimal>, symbol: &str) -> Option<Decimal> {
    if let Some(price) = prices.get(symbol) {
        return Some(*price);
    }
    prices
        .iter()
        .filter(|(key, _)| key.trim().eq_ignore_ascii_case(symbol))
        .min_by(|a, b| a.0.cmp(b.0))
        .map(|(_, price)| *price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn validated(request: TradeRequest) -> (TradeRequest, Decimal) {
        let request = request.validated(dec!(1000000)).unwrap();
        let total = request.total_value().unwrap();
        (request, total)
    }

    fn buy(portfolio: &mut Portfolio, symbol: &str, amount: Decimal, price: Decimal) -> Result<(), ExecutorError> {
        let (request, total) = validated(TradeRequest::buy(symbol, amount, price));
        portfolio.apply_buy(&request, total)
    }

    fn sell(portfolio: &mut Portfolio, symbol: &str, amount: Decimal, price: Decimal) -> Result<Decimal, ExecutorError> {
        let (request, total) = validated(TradeRequest::sell(symbol, amount, price));
        portfolio.apply_sell(&request, total)
    }

    #[test]
    fn buy_then_partial_sell() {
        let mut portfolio = Portfolio::new("alice", dec!(10000));

        buy(&mut portfolio, "BTC", dec!(1), dec!(100)).unwrap();
        assert_eq!(portfolio.account_balance(), dec!(9900));
        assert_eq!(portfolio.total_invested(), dec!(100));
        let holding = portfolio.holding("BTC").unwrap();
        assert_eq!(holding.amount(), dec!(1));
        assert_eq!(holding.average_buy_price(), dec!(100));

        let realized = sell(&mut portfolio, "BTC", dec!(0.4), dec!(150)).unwrap();
        assert_eq!(realized, dec!(20));
        assert_eq!(portfolio.account_balance(), dec!(9960));
        assert_eq!(portfolio.total_returns(), dec!(20));
        let holding = portfolio.holding("BTC").unwrap();
        assert_eq!(holding.amount(), dec!(0.6));
        assert_eq!(holding.average_buy_price(), dec!(100));
        assert_eq!(holding.current_price(), dec!(150));
        assert_eq!(holding.total_value(), dec!(90));
        assert_eq!(holding.gain_loss(), dec!(30));
        assert_eq!(holding.gain_loss_percent(), dec!(50));
    }

    #[test]
    fn insufficient_funds_leaves_state_untouched() {
        let mut portfolio = Portfolio::new("bob", dec!(50));
        let before = portfolio.clone();

        let err = buy(&mut portfolio, "BTC", dec!(1), dec!(100)).unwrap_err();
        assert_eq!(
            err,
            ExecutorError::InsufficientFunds { required: dec!(100), available: dec!(50) }
        );
        assert_eq!(portfolio, before);
    }

    #[test]
    fn buying_the_entire_balance_is_allowed() {
        let mut portfolio = Portfolio::new("bob", dec!(100));
        buy(&mut portfolio, "ETH", dec!(2), dec!(50)).unwrap();
        assert_eq!(portfolio.account_balance(), Decimal::ZERO);
    }

    #[test]
    fn full_sell_removes_the_holding() {
        let mut portfolio = Portfolio::new("carol", dec!(1000));
        buy(&mut portfolio, "SOL", dec!(1), dec!(10)).unwrap();

        let realized = sell(&mut portfolio, "SOL", dec!(1), dec!(7)).unwrap();
        assert_eq!(realized, dec!(-3));
        assert!(portfolio.holding("SOL").is_none());
        assert_eq!(portfolio.holdings().count(), 0);
        assert_eq!(portfolio.total_returns(), dec!(-3));
    }

    #[test]
    fn weighted_average_is_exact() {
        let mut portfolio = Portfolio::new("dave", dec!(100000));
        buy(&mut portfolio, "BTC", dec!(0.3), dec!(20000)).unwrap();
        buy(&mut portfolio, "BTC", dec!(0.2), dec!(25000)).unwrap();

        let expected = (dec!(0.3) * dec!(20000) + dec!(0.2) * dec!(25000)) / (dec!(0.3) + dec!(0.2));
        let holding = portfolio.holding("BTC").unwrap();
        assert_eq!(holding.average_buy_price(), expected);
        assert_eq!(holding.average_buy_price(), dec!(22000));
        assert_eq!(holding.amount(), dec!(0.5));
        assert_eq!(portfolio.total_invested(), dec!(11000));
    }

    #[test]
    fn sell_errors_distinguish_missing_and_short_holdings() {
        let mut portfolio = Portfolio::new("erin", dec!(1000));
        assert_eq!(
            sell(&mut portfolio, "DOGE", dec!(1), dec!(1)).unwrap_err(),
            ExecutorError::HoldingNotFound("DOGE".to_string())
        );

        buy(&mut portfolio, "DOGE", dec!(10), dec!(1)).unwrap();
        let before = portfolio.clone();
        assert_eq!(
            sell(&mut portfolio, "DOGE", dec!(10.5), dec!(1)).unwrap_err(),
            ExecutorError::InsufficientHoldings {
                symbol: "DOGE".to_string(),
                requested: dec!(10.5),
                available: dec!(10),
            }
        );
        assert_eq!(portfolio, before);
    }

    #[test]
    fn sells_do_not_change_total_invested() {
        let mut portfolio = Portfolio::new("frank", dec!(1000));
        buy(&mut portfolio, "ADA", dec!(100), dec!(2)).unwrap();
        sell(&mut portfolio, "ADA", dec!(50), dec!(3)).unwrap();
        assert_eq!(portfolio.total_invested(), dec!(200));
        assert_eq!(portfolio.total_returns(), dec!(50));
    }

    #[test]
    fn reprice_only_reports_real_changes() {
        let mut portfolio = Portfolio::new("gina", dec!(1000));
        buy(&mut portfolio, "BTC", dec!(2), dec!(100)).unwrap();

        let same = HashMap::from([("BTC".to_string(), dec!(100))]);
        assert!(!portfolio.reprice(&same).unwrap());

        let unrelated = HashMap::from([("ETH".to_string(), dec!(5)), ("BTC".to_string(), dec!(0))]);
        assert!(!portfolio.reprice(&unrelated).unwrap());

        let moved = HashMap::from([("btc".to_string(), dec!(80))]);
        assert!(portfolio.reprice(&moved).unwrap());
        let holding = portfolio.holding("BTC").unwrap();
        assert_eq!(holding.current_price(), dec!(80));
        assert_eq!(holding.total_value(), dec!(160));
        assert_eq!(holding.gain_loss(), dec!(-40));
        assert_eq!(holding.gain_loss_percent(), dec!(-20));
        assert_eq!(holding.average_buy_price(), dec!(100));
    }

    #[test]
    fn reprice_ignores_keys_that_match_no_holding() {
        let mut portfolio = Portfolio::new("hana", dec!(1000));
        buy(&mut portfolio, "BTC", dec!(1), dec!(100)).unwrap();

        let prices = HashMap::from([
            ("BTC".to_string(), dec!(120)),
            ("".to_string(), dec!(1)),
            ("   ".to_string(), dec!(2)),
        ]);
        assert!(portfolio.reprice(&prices).unwrap());
        assert_eq!(portfolio.holding("BTC").unwrap().current_price(), dec!(120));
    }

    #[test]
    fn reprice_resolves_case_variants_deterministically() {
        let mut portfolio = Portfolio::new("ivan", dec!(1000));
        buy(&mut portfolio, "BTC", dec!(1), dec!(100)).unwrap();

        let prices = HashMap::from([("btc".to_string(), dec!(130)), ("BTC".to_string(), dec!(120))]);
        assert!(portfolio.reprice(&prices).unwrap());
        assert_eq!(portfolio.holding("BTC").unwrap().current_price(), dec!(120));

        let prices = HashMap::from([("btc".to_string(), dec!(130)), ("Btc".to_string(), dec!(125))]);
        assert!(portfolio.reprice(&prices).unwrap());
        assert_eq!(portfolio.holding("BTC").unwrap().current_price(), dec!(125));
    }

    #[test]
    fn summary_adds_cash_and_marked_holdings() {
        let mut portfolio = Portfolio::new("hank", dec!(1000));
        buy(&mut portfolio, "BTC", dec!(1), dec!(100)).unwrap();
        buy(&mut portfolio, "ETH", dec!(2), dec!(50)).unwrap();
        portfolio
            .reprice(&HashMap::from([("BTC".to_string(), dec!(150))]))
            .unwrap();

        let summary = portfolio.summary().unwrap();
        assert_eq!(summary.account_balance, dec!(800));
        assert_eq!(summary.holdings_value, dec!(250));
        assert_eq!(summary.total_portfolio_value, dec!(1050));
        assert_eq!(summary.total_holdings, 2);
    }

    #[test]
    fn restore_rejects_duplicate_symbols() {
        let now = Utc::now();
        let holding = Holding::open("BTC", dec!(1), dec!(1)).unwrap();
        let snapshot = PortfolioSnapshot {
            user_id: "ivy".to_string(),
            account_balance: dec!(1),
            total_invested: dec!(2),
            total_returns: Decimal::ZERO,
            holdings: vec![holding.clone(), holding],
            version: 3,
            created_at: now,
            updated_at: now,
        };
        assert!(Portfolio::restore(snapshot).is_err());
    }

    #[test]
    fn serializes_holdings_as_a_list() {
        let mut portfolio = Portfolio::new("jo", dec!(1000));
        buy(&mut portfolio, "BTC", dec!(1), dec!(100)).unwrap();
        let json = serde_json::to_value(&portfolio).unwrap();
        assert_eq!(json["holdings"][0]["cryptoSymbol"], "BTC");
        assert_eq!(json["accountBalance"], "900");
    }
}
