use serde::{Deserialize, Serialize};

/// Row of the most-actives screener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MostActive {
    pub symbol: String,
    pub volume: f64,
    pub trade_count: u64,
}

/// Row of the market-movers screener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mover {
    pub symbol: String,
    pub percent_change: f64,
    pub change: f64,
    pub price: f64,
}

/// Top gainers and losers of the session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketMovers {
    pub gainers: Vec<Mover>,
    pub losers: Vec<Mover>,
}
