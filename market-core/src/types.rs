pub mod aligned;
pub mod asset;
pub mod bar;
pub mod option;
pub mod quote;
pub mod screener;
pub mod timeframe;
pub mod watchlist;

// Re-export common types
pub use aligned::{AlignedBarRow, AlignedBars, AlignedChain, AlignedOptionRow, AlignmentStats};
pub use asset::Asset;
pub use bar::{Bar, BarSeries};
pub use option::{
    ContractStatus, ExerciseStyle, Greeks, OptionChain, OptionContract, OptionQuote,
    OptionSnapshot, OptionSymbol, OptionTrade, OptionType,
};
pub use quote::{StockQuote, StockTrade};
pub use screener::{MarketMovers, MostActive, Mover};
pub use timeframe::{TimeFrame, TimeFrameUnit};
pub use watchlist::{Watchlist, WatchlistEntry, WatchlistSource};

