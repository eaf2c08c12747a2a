pub mod enums;
pub mod error;
pub mod money;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{TradeStatus, TradeType};
pub use error::CoreError;
pub use structs::{
    DEFAULT_PAGE_LIMIT, Holding, MAX_PAGE_LIMIT, Trade, TradePage, TradeQuery, TradeRequest,
    new_transaction_id, normalize_symbol,
};
