pub mod alpaca;
pub mod collector;
pub mod processing;
pub mod provider;

// Re-export commonly used items
pub use alpaca::{AlpacaClient, AlpacaConfig, AlpacaError};
pub use collector::{CollectedData, CollectionReport, CollectorConfig, MarketDataCollector};
pub use processing::{align_data, AlignmentConfig, ChainFilter, DataProcessor};
pub use provider::{AlpacaProvider, MarketDataProvider, StaticProvider};
