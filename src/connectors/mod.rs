//! Connectors to the outside world.
//!
//! Market data comes in through [`MarketDataSource`]; alerts go out through
//! [`NotificationSink`]. Everything fetched here is normalized into
//! `crate::events` types before a watcher sees it.

mod lark;
mod market_data;

pub use lark::{LarkNotifier, NotificationSink, LARK_WEBHOOK_ENV};
pub use market_data::{
    BookLevel,
    BookResponse,
    FetchError,
    HttpMarketDataSource,
    MarketDataSource,
    TradeResponse,
};
