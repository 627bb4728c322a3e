pub mod client;
pub mod config;
pub mod error;
pub mod option;
pub mod screener;
pub mod stock;
pub mod stream;
pub mod wire;

#[cfg(test)]
pub(crate) mod test_server;

// Re-export commonly used items
pub use client::{AlpacaClient, Api, Paginated};
pub use config::AlpacaConfig;
pub use error::{AlpacaError, AlpacaResult};
pub use option::{exchange_date, exchange_today, ChainQuery, ContractQuery, OptionsDataCollector};
pub use screener::{ActiveBy, ScreenerClient};
pub use stock::StockDataCollector;
pub use stream::{MarketDataStream, StreamCallback, StreamEvent, StreamHandlers, StreamKind};
