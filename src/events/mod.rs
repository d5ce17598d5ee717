//! Data types shared by connectors, watchers and sinks.
//!
//! Raw exchange JSON never leaves the connector layer; everything past it
//! speaks these normalized types.

mod market_events;

pub use market_events::{
    AlertKind,
    AlertRecord,
    DepthSample,
    MarketKey,
    OrderBookSnapshot,
    PriceLevel,
    Trade,
};
