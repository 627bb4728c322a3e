use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stock trade print
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockTrade {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
    pub exchange: Option<String>,
    pub conditions: Vec<String>,
    pub id: Option<u64>,
    pub tape: Option<String>,
}

/// Top-of-book stock quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockQuote {
    pub timestamp: DateTime<Utc>,
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_price: f64,
    pub ask_size: f64,
    pub bid_exchange: Option<String>,
    pub ask_exchange: Option<String>,
    pub conditions: Vec<String>,
    pub tape: Option<String>,
}

impl StockQuote {
    /// Quote midpoint, `None` when either side is empty
    pub fn mid(&self) -> Option<f64> {
        if self.bid_price > 0.0 && self.ask_price > 0.0 {
            Some((self.bid_price + self.ask_price) / 2.0)
        } else {
            None
        }
    }

    pub fn spread(&self) -> Option<f64> {
        self.mid().map(|_| self.ask_price - self.bid_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(bid: f64, ask: f64) -> StockQuote {
        StockQuote {
            timestamp: Utc::now(),
            bid_price: bid,
            bid_size: 1.0,
            ask_price: ask,
            ask_size: 1.0,
            bid_exchange: None,
            ask_exchange: None,
            conditions: vec![],
            tape: None,
        }
    }

    #[test]
    fn test_mid_and_spread() {
        let q = quote(99.0, 101.0);
        assert_eq!(q.mid(), Some(100.0));
        assert_eq!(q.spread(), Some(2.0));
    }

    #[test]
    fn test_one_sided_quote_has_no_mid() {
        let q = quote(0.0, 101.0);
        assert_eq!(q.mid(), None);
        assert_eq!(q.spread(), None);
    }
}
