//! Exchange capability layer: wire types, traits, REST client, paper venue.

pub mod client;
pub mod paper;
pub mod traits;
pub mod types;

pub use client::ExchangeClient;
pub use paper::PaperExchange;
pub use traits::{ExecutionClient, MarketData};
pub use types::*;

#[cfg(test)]
pub use traits::{MockExecutionClient, MockMarketData};
