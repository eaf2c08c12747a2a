use crate::enums::{TradeStatus, TradeType};
use crate::error::CoreError;
use crate::money;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trims and uppercases a ticker, rejecting empty input.
pub fn normalize_symbol(symbol: &str) -> Result<String, CoreError> {
    let symbol = symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(CoreError::invalid("cryptoSymbol", "symbol must not be empty"));
    }
    Ok(symbol)
}

// ==============================================================================
// Holding
// ==============================================================================

/// A position in a single symbol, embedded in a portfolio.
///
/// The quantity is always strictly positive: the only constructors reject a zero or
/// negative amount, and `reduce` hands back `None` instead of an empty holding.
/// `total_value`, `gain_loss` and `gain_loss_percent` are derived and recomputed on
/// every change of amount or price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "HoldingRecord")]
pub struct Holding {
    crypto_symbol: String,
    amount: Decimal,
    average_buy_price: Decimal,
    current_price: Decimal,
    total_value: Decimal,
    gain_loss: Decimal,
    gain_loss_percent: Decimal,
}

/// The persisted shape of a holding. Derived fields are ignored on input.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoldingRecord {
    crypto_symbol: String,
    amount: Decimal,
    average_buy_price: Decimal,
    current_price: Decimal,
}

impl TryFrom<HoldingRecord> for Holding {
    type Error = CoreError;

    fn try_from(record: HoldingRecord) -> Result<Self, Self::Error> {
        Holding::restore(
            &record.crypto_symbol,
            record.amount,
            record.average_buy_price,
            record.current_price,
        )
    }
}

impl Holding {
    /// Opens a new holding bought at `price`.
    pub fn open(symbol: &str, amount: Decimal, price: Decimal) -> Result<Self, CoreError> {
        Self::restore(symbol, amount, price, price)
    }

    /// Rebuilds a holding from stored state, re-deriving its valuation fields.
    pub fn restore(
        symbol: &str,
        amount: Decimal,
        average_buy_price: Decimal,
        current_price: Decimal,
    ) -> Result<Self, CoreError> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::invalid("amount", "holding amount must be positive"));
        }
        if average_buy_price <= Decimal::ZERO {
            return Err(CoreError::invalid("averageBuyPrice", "must be positive"));
        }
        if current_price <= Decimal::ZERO {
            return Err(CoreError::invalid("currentPrice", "must be positive"));
        }

        let mut holding = Self {
            crypto_symbol: normalize_symbol(symbol)?,
            amount,
            average_buy_price,
            current_price,
            total_value: Decimal::ZERO,
            gain_loss: Decimal::ZERO,
            gain_loss_percent: Decimal::ZERO,
        };
        holding.revalue(current_price)?;
        Ok(holding)
    }

    pub fn crypto_symbol(&self) -> &str {
        &self.crypto_symbol
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn average_buy_price(&self) -> Decimal {
        self.average_buy_price
    }

    pub fn current_price(&self) -> Decimal {
        self.current_price
    }

    pub fn total_value(&self) -> Decimal {
        self.total_value
    }

    pub fn gain_loss(&self) -> Decimal {
        self.gain_loss
    }

    pub fn gain_loss_percent(&self) -> Decimal {
        self.gain_loss_percent
    }

    /// Cost basis of the units currently held.
    pub fn cost_basis(&self) -> Result<Decimal, CoreError> {
        money::mul(self.amount, self.average_buy_price)
    }

    /// Adds `amount` units bought at `price`, folding them into the weighted average cost.
    pub fn accumulate(&mut self, amount: Decimal, price: Decimal) -> Result<(), CoreError> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::invalid("amount", "purchase amount must be positive"));
        }
        if price <= Decimal::ZERO {
            return Err(CoreError::invalid("price", "purchase price must be positive"));
        }
        let total_amount = money::add(self.amount, amount)?;
        let total_cost = money::add(self.cost_basis()?, money::mul(amount, price)?)?;
        // total_amount > 0 because both terms are positive.
        let average = money::ratio_or_zero(total_cost, total_amount)?;

        self.amount = total_amount;
        self.average_buy_price = average;
        self.revalue(price)
    }

    /// Removes `amount` units sold at `price`.
    ///
    /// Returns `Ok(None)` when the holding is exhausted. The average buy price is
    /// left untouched by a sale.
    pub fn reduce(mut self, amount: Decimal, price: Decimal) -> Result<Option<Self>, CoreError> {
        if amount > self.amount {
            return Err(CoreError::invalid("amount", "cannot reduce below zero"));
        }
        let remaining = money::sub(self.amount, amount)?;
        if remaining.is_zero() {
            return Ok(None);
        }
        self.amount = remaining;
        self.revalue(price)?;
        Ok(Some(self))
    }

    /// Marks the holding to `price` and recomputes value and unrealized gain/loss.
    pub fn revalue(&mut self, price: Decimal) -> Result<(), CoreError> {
        if price <= Decimal::ZERO {
            return Err(CoreError::invalid("currentPrice", "must be positive"));
        }
        let total_value = money::mul(self.amount, price)?;
        let gain_loss = money::mul(self.amount, money::sub(price, self.average_buy_price)?)?;
        let gain_loss_percent = money::percent_or_zero(gain_loss, self.cost_basis()?)?;

        self.current_price = price;
        self.total_value = total_value;
        self.gain_loss = gain_loss;
        self.gain_loss_percent = gain_loss_percent;
        Ok(())
    }
}

// ==============================================================================
// Trade requests and records
// ==============================================================================

/// An inbound request to buy or sell at a caller-supplied price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    #[serde(rename = "type")]
    pub trade_type: TradeType,
    pub crypto_symbol: String,
    pub amount: Decimal,
    pub price_per_unit: Decimal,
}

impl TradeRequest {
    pub fn new(
        trade_type: TradeType,
        crypto_symbol: impl Into<String>,
        amount: Decimal,
        price_per_unit: Decimal,
    ) -> Self {
        Self {
            trade_type,
            crypto_symbol: crypto_symbol.into(),
            amount,
            price_per_unit,
        }
    }

    pub fn buy(symbol: impl Into<String>, amount: Decimal, price_per_unit: Decimal) -> Self {
        Self::new(TradeType::Buy, symbol, amount, price_per_unit)
    }

    pub fn sell(symbol: impl Into<String>, amount: Decimal, price_per_unit: Decimal) -> Self {
        Self::new(TradeType::Sell, symbol, amount, price_per_unit)
    }

    /// Checks the request and returns it with a normalized symbol.
    ///
    /// `max_trade_value` caps `amount * price_per_unit`.
    pub fn validated(self, max_trade_value: Decimal) -> Result<Self, CoreError> {
        let crypto_symbol = normalize_symbol(&self.crypto_symbol)?;
        if self.amount <= Decimal::ZERO {
            return Err(CoreError::invalid("amount", "must be greater than zero"));
        }
        if self.price_per_unit <= Decimal::ZERO {
            return Err(CoreError::invalid("pricePerUnit", "must be greater than zero"));
        }
        let total_value = self.total_value()?;
        if total_value <= Decimal::ZERO {
            return Err(CoreError::invalid("amount", "trade value must be greater than zero"));
        }
        if total_value > max_trade_value {
            return Err(CoreError::invalid(
                "amount",
                format!("trade value {} exceeds the limit of {}", total_value, max_trade_value),
            ));
        }
        Ok(Self { crypto_symbol, ..self })
    }

    /// `amount * price_per_unit`, computed exactly or not at all.
    pub fn total_value(&self) -> Result<Decimal, CoreError> {
        money::mul_exact(self.amount, self.price_per_unit)
    }
}

/// An executed transaction. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub trade_type: TradeType,
    pub crypto_symbol: String,
    pub amount: Decimal,
    pub price_per_unit: Decimal,
    pub total_value: Decimal,
    pub status: TradeStatus,
    pub transaction_id: String,
    pub created_at: DateTime<Utc>,
}

impl Trade {
    /// Builds the completed record for an already validated request.
    pub fn completed(user_id: &str, request: &TradeRequest, total_value: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            trade_type: request.trade_type,
            crypto_symbol: request.crypto_symbol.clone(),
            amount: request.amount,
            price_per_unit: request.price_per_unit,
            total_value,
            status: TradeStatus::Completed,
            transaction_id: new_transaction_id(),
            created_at: Utc::now(),
        }
    }
}

/// `TXN` followed by 16 uppercase hex digits of a random v4 UUID.
pub fn new_transaction_id() -> String {
    format!("TXN{:016X}", Uuid::new_v4().as_u128() as u64)
}

// ==============================================================================
// Trade history
// ==============================================================================

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 50;

/// A page request over one user's trade log, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeQuery {
    pub user_id: String,
    pub trade_type: Option<TradeType>,
    pub page: u32,
    pub limit: u32,
}

impl TradeQuery {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            trade_type: None,
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn with_type(mut self, trade_type: Option<TradeType>) -> Self {
        self.trade_type = trade_type;
        self
    }

    /// Pages are 1-based; zero is treated as the first page.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradePage {
    pub trades: Vec<Trade>,
    pub page: u32,
    pub limit: u32,
    pub total_items: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl TradePage {
    pub fn new(trades: Vec<Trade>, query: &TradeQuery, total_items: u64) -> Self {
        let limit = u64::from(query.limit.max(1));
        let total_pages = total_items.div_ceil(limit);
        Self {
            trades,
            page: query.page,
            limit: query.limit,
            total_items,
            total_pages,
            has_next: u64::from(query.page) < total_pages,
            has_prev: query.page > 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn holding_rejects_non_positive_amounts() {
        assert!(Holding::open("BTC", Decimal::ZERO, dec!(100)).is_err());
        assert!(Holding::open("BTC", dec!(-1), dec!(100)).is_err());
        assert!(Holding::open("BTC", dec!(1), Decimal::ZERO).is_err());
    }

    #[test]
    fn new_holding_has_no_gain_or_loss() {
        let holding = Holding::open("btc", dec!(2), dec!(100)).unwrap();
        assert_eq!(holding.crypto_symbol(), "BTC");
        assert_eq!(holding.average_buy_price(), dec!(100));
        assert_eq!(holding.total_value(), dec!(200));
        assert_eq!(holding.gain_loss(), Decimal::ZERO);
        assert_eq!(holding.gain_loss_percent(), Decimal::ZERO);
    }

    #[test]
    fn accumulate_uses_amount_weighted_average() {
        let mut holding = Holding::open("ETH", dec!(1), dec!(100)).unwrap();
        holding.accumulate(dec!(3), dec!(200)).unwrap();

        assert_eq!(holding.amount(), dec!(4));
        assert_eq!(holding.average_buy_price(), dec!(175));
        assert_eq!(holding.current_price(), dec!(200));
        assert_eq!(holding.total_value(), dec!(800));
        assert_eq!(holding.gain_loss(), dec!(100));
        assert_eq!(holding.gain_loss_percent().round_dp(6), dec!(14.285714));
    }

    #[test]
    fn reduce_to_zero_yields_nothing() {
        let holding = Holding::open("SOL", dec!(1.5), dec!(20)).unwrap();
        assert_eq!(holding.reduce(dec!(1.5), dec!(25)).unwrap(), None);
    }

    #[test]
    fn partial_reduce_keeps_average_price() {
        let holding = Holding::open("SOL", dec!(2), dec!(20)).unwrap();
        let rest = holding.reduce(dec!(0.5), dec!(30)).unwrap().unwrap();
        assert_eq!(rest.amount(), dec!(1.5));
        assert_eq!(rest.average_buy_price(), dec!(20));
        assert_eq!(rest.gain_loss(), dec!(15));
        assert_eq!(rest.gain_loss_percent(), dec!(50));
    }

    #[test]
    fn deserializing_a_zero_holding_fails() {
        let json = r#"{"cryptoSymbol":"BTC","amount":"0","averageBuyPrice":"1","currentPrice":"1"}"#;
        assert!(serde_json::from_str::<Holding>(json).is_err());

        let json = r#"{"cryptoSymbol":"btc","amount":"2","averageBuyPrice":"10","currentPrice":"15","gainLoss":"999"}"#;
        let holding: Holding = serde_json::from_str(json).unwrap();
        assert_eq!(holding.crypto_symbol(), "BTC");
        assert_eq!(holding.gain_loss(), dec!(10));
    }

    #[test]
    fn validation_normalizes_and_rejects() {
        let request = TradeRequest::buy(" eth ", dec!(1), dec!(10))
            .validated(dec!(1000000))
            .unwrap();
        assert_eq!(request.crypto_symbol, "ETH");

        assert!(TradeRequest::buy("ETH", Decimal::ZERO, dec!(10)).validated(dec!(100)).is_err());
        assert!(TradeRequest::sell("ETH", dec!(1), dec!(-1)).validated(dec!(100)).is_err());
        assert!(TradeRequest::buy("", dec!(1), dec!(1)).validated(dec!(100)).is_err());
        assert!(TradeRequest::buy("BTC", dec!(2), dec!(60)).validated(dec!(100)).is_err());
    }

    #[test]
    fn validation_rejects_values_that_would_round_to_nothing() {
        let request = TradeRequest::buy("BTC", dec!(0.0000000000000001), dec!(0.000000000000001));
        assert_eq!(
            request.validated(dec!(1000000)),
            Err(CoreError::Inexact("multiplication"))
        );

        // Trailing zeros do not count against the precision budget.
        let request = TradeRequest::buy("BTC", dec!(0.50000000000000000000), dec!(20.000000000))
            .validated(dec!(1000000))
            .unwrap();
        assert_eq!(request.total_value().unwrap(), dec!(10));
    }

    #[test]
    fn accumulate_names_the_offending_field() {
        let mut holding = Holding::open("BTC", dec!(1), dec!(100)).unwrap();
        assert_eq!(
            holding.accumulate(dec!(1), Decimal::ZERO),
            Err(CoreError::InvalidInput("price".to_string(), "purchase price must be positive".to_string()))
        );
        assert!(matches!(
            holding.accumulate(dec!(-1), dec!(100)),
            Err(CoreError::InvalidInput(field, _)) if field == "amount"
        ));
        assert_eq!(holding.amount(), dec!(1));
    }

    #[test]
    fn transaction_ids_have_the_expected_shape() {
        let id = new_transaction_id();
        assert_eq!(id.len(), 19);
        assert!(id.starts_with("TXN"));
        assert!(id[3..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(id, new_transaction_id());
    }

    #[test]
    fn query_limits_are_clamped() {
        let query = TradeQuery::new("u1").with_page(0).with_limit(500);
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, MAX_PAGE_LIMIT);
        assert_eq!(TradeQuery::new("u1").with_page(3).with_limit(10).offset(), 20);
    }

    #[test]
    fn page_metadata() {
        let query = TradeQuery::new("u1").with_page(2).with_limit(10);
        let page = TradePage::new(Vec::new(), &query, 25);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next);
        assert!(page.has_prev);

        let empty = TradePage::new(Vec::new(), &TradeQuery::new("u1"), 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);
        assert!(!empty.has_prev);
    }
}
