//! Property-based tests for ledger invariants.
//!
//! Random sequences of buys and sells are pushed through the engine; after every
//! step the stored portfolio must keep a non-negative balance, strictly positive
//! holdings, and counters that move by exactly the traded values.

use configuration::LedgerSettings;
use core_types::{TradeRequest, TradeType};
use executor::{ExecutorError, LedgerStore, MemoryStore, PortfolioService};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

const SYMBOLS: [&str; 3] = ["BTC", "ETH", "SOL"];

#[derive(Debug, Clone)]
struct Op {
    trade_type: TradeType,
    symbol: &'static str,
    amount: Decimal,
    price: Decimal,
}

fn arb_op() -> impl Strategy<Value = Op> {
    (
        prop_oneof![Just(TradeType::Buy), Just(TradeType::Sell)],
        0..SYMBOLS.len(),
        1i64..=500,  // hundredths of a unit
        1i64..=4000, // whole dollars
    )
        .prop_map(|(trade_type, symbol, amount, price)| Op {
            trade_type,
            symbol: SYMBOLS[symbol],
            amount: Decimal::new(amount, 2),
            price: Decimal::from(price),
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ledger_invariants_hold_for_any_sequence(ops in proptest::collection::vec(arb_op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let store = Arc::new(MemoryStore::new());
            let service = PortfolioService::new(store.clone(), LedgerSettings::default());
            let mut before = service.get_portfolio("prop").await.unwrap();

            for op in ops {
                let request = TradeRequest::new(op.trade_type, op.symbol, op.amount, op.price);
                let total = op.amount * op.price;
                let held_avg = before.holding(op.symbol).map(|h| h.average_buy_price());

                let result = service.execute_trade("prop", request).await;
                let after = store.load_portfolio("prop").await.unwrap().unwrap();

                match result {
                    Ok(_) => match op.trade_type {
                        TradeType::Buy => {
                            prop_assert_eq!(after.account_balance(), before.account_balance() - total);
                            prop_assert_eq!(after.total_invested(), before.total_invested() + total);
                        }
                        TradeType::Sell => {
                            let avg = held_avg.expect("sold a symbol that was not held");
                            prop_assert_eq!(after.account_balance(), before.account_balance() + total);
                            prop_assert_eq!(
                                after.total_returns(),
                                before.total_returns() + (total - avg * op.amount)
                            );
                        }
                    },
                    Err(
                        ExecutorError::InsufficientFunds { .. }
                        | ExecutorError::HoldingNotFound(_)
                        | ExecutorError::InsufficientHoldings { .. },
                    ) => {
                        prop_assert_eq!(&after, &before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {:?}", other),
                }

                prop_assert!(after.account_balance() >= Decimal::ZERO);
                for holding in after.holdings() {
                    prop_assert!(holding.amount() > Decimal::ZERO);
                }
                before = after;
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
