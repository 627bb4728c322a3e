use crate::error::CoreError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::Call => "call",
            OptionType::Put => "put",
        }
    }
}

impl FromStr for OptionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "call" | "c" => Ok(OptionType::Call),
            "put" | "p" => Ok(OptionType::Put),
            other => Err(CoreError::InvalidOptionSymbol {
                symbol: other.to_string(),
                reason: "option type must be call or put".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseStyle {
    American,
    European,
}

impl ExerciseStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExerciseStyle::American => "american",
            ExerciseStyle::European => "european",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Active,
    Inactive,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Active => "active",
            ContractStatus::Inactive => "inactive",
        }
    }
}

/// Parsed OCC option symbol.
///
/// Layout: root (1-6 chars, optionally space padded) + expiration `YYMMDD`
/// + `C`/`P` + strike in thousandths, zero padded to 8 digits.
/// `AAPL240119C00100000` is the AAPL 2024-01-19 100.0 call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSymbol {
    pub root: String,
    pub expiration: NaiveDate,
    pub option_type: OptionType,
    pub strike: f64,
}

const OCC_SUFFIX_LEN: usize = 15;

impl OptionSymbol {
    pub fn parse(symbol: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidOptionSymbol {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = symbol.trim();
        if !trimmed.is_ascii() {
            return Err(invalid("non-ASCII characters"));
        }
        if trimmed.len() <= OCC_SUFFIX_LEN {
            return Err(invalid("too short"));
        }

        let (root, suffix) = trimmed.split_at(trimmed.len() - OCC_SUFFIX_LEN);
        let root = root.trim_end();
        if root.is_empty() || root.len() > 6 {
            return Err(invalid("root must be 1-6 characters"));
        }

        let (date_part, rest) = suffix.split_at(6);
        let (type_part, strike_part) = rest.split_at(1);

        if !date_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expiration is not YYMMDD"));
        }
        let expiration = NaiveDate::parse_from_str(&format!("20{}", date_part), "%Y%m%d")
            .map_err(|_| invalid("expiration is not a calendar date"))?;

        let option_type = match type_part {
            "C" => OptionType::Call,
            "P" => OptionType::Put,
            _ => return Err(invalid("type must be C or P")),
        };

        if !strike_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("strike is not numeric"));
        }
        let strike_thousandths: u64 = strike_part
            .parse()
            .map_err(|_| invalid("strike is not numeric"))?;

        Ok(Self {
            root: root.to_string(),
            expiration,
            option_type,
            strike: strike_thousandths as f64 / 1000.0,
        })
    }

    /// Compact OCC form without root padding
    pub fn to_occ(&self) -> String {
        format!(
            "{}{}{}{:08}",
            self.root,
            self.expiration.format("%y%m%d"),
            match self.option_type {
                OptionType::Call => 'C',
                OptionType::Put => 'P',
            },
            (self.strike * 1000.0).round() as u64
        )
    }
}

impl fmt::Display for OptionSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_occ())
    }
}

impl FromStr for OptionSymbol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub timestamp: DateTime<Utc>,
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_price: f64,
    pub ask_size: f64,
    pub bid_exchange: Option<String>,
    pub ask_exchange: Option<String>,
    pub condition: Option<String>,
}

impl OptionQuote {
    pub fn mid(&self) -> Option<f64> {
        if self.bid_price >= 0.0 && self.ask_price > 0.0 && self.ask_price >= self.bid_price {
            Some((self.bid_price + self.ask_price) / 2.0)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTrade {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
    pub exchange: Option<String>,
    pub condition: Option<String>,
}

/// Greeks as reported by the data feed (never computed locally)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub rho: Option<f64>,
}

/// Latest state of one contract in an option chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSnapshot {
    pub symbol: OptionSymbol,
    pub latest_quote: Option<OptionQuote>,
    pub latest_trade: Option<OptionTrade>,
    pub greeks: Option<Greeks>,
    pub implied_volatility: Option<f64>,
}

impl OptionSnapshot {
    pub fn new(symbol: OptionSymbol) -> Self {
        Self {
            symbol,
            latest_quote: None,
            latest_trade: None,
            greeks: None,
            implied_volatility: None,
        }
    }

    /// Quote midpoint, falling back to the last trade price
    pub fn mid(&self) -> Option<f64> {
        self.latest_quote
            .as_ref()
            .and_then(|q| q.mid())
            .or_else(|| self.latest_trade.as_ref().map(|t| t.price))
    }

    /// Most recent of the quote and trade timestamps
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        let quote_ts = self.latest_quote.as_ref().map(|q| q.timestamp);
        let trade_ts = self.latest_trade.as_ref().map(|t| t.timestamp);
        quote_ts.max(trade_ts)
    }
}

/// Option contract definition from the trading API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub status: ContractStatus,
    pub tradable: bool,
    pub expiration_date: NaiveDate,
    pub root_symbol: String,
    pub underlying_symbol: String,
    pub option_type: OptionType,
    pub style: ExerciseStyle,
    pub strike_price: f64,
    pub size: f64,
    pub open_interest: Option<u64>,
    pub open_interest_date: Option<NaiveDate>,
    pub close_price: Option<f64>,
    pub close_price_date: Option<NaiveDate>,
}

/// Snapshots of every listed contract for one underlying
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChain {
    pub underlying: String,
    pub snapshots: Vec<OptionSnapshot>,
}

impl OptionChain {
    pub fn new(underlying: impl Into<String>, snapshots: Vec<OptionSnapshot>) -> Self {
        Self {
            underlying: underlying.into(),
            snapshots,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Distinct expirations, ascending
    pub fn expirations(&self) -> Vec<NaiveDate> {
        self.snapshots
            .iter()
            .map(|s| s.symbol.expiration)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct strikes, ascending
    pub fn strikes(&self) -> Vec<f64> {
        let mut strikes: Vec<f64> = self.snapshots.iter().map(|s| s.symbol.strike).collect();
        strikes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        strikes.dedup();
        strikes
    }

    /// Mean strike over all contracts in the chain
    pub fn average_strike(&self) -> Option<f64> {
        if self.snapshots.is_empty() {
            return None;
        }
        let total: f64 = self.snapshots.iter().map(|s| s.symbol.strike).sum();
        Some(total / self.snapshots.len() as f64)
    }

    /// Sort by expiration, then strike, then calls before puts
    pub fn sort(&mut self) {
        self.snapshots.sort_by(|a, b| {
            a.symbol
                .expiration
                .cmp(&b.symbol.expiration)
                .then(
                    a.symbol
                        .strike
                        .partial_cmp(&b.symbol.strike)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.symbol.option_type.cmp(&b.symbol.option_type))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_occ_symbol() {
        let sym = OptionSymbol::parse("AAPL240119C00100000").unwrap();
        assert_eq!(sym.root, "AAPL");
        assert_eq!(sym.expiration, NaiveDate::from_ymd_opt(2024, 1, 19).unwrap());
        assert_eq!(sym.option_type, OptionType::Call);
        assert_eq!(sym.strike, 100.0);
    }

    #[test]
    fn test_parse_fractional_strike_and_padded_root() {
        let sym = OptionSymbol::parse("SPY   250321P00452500").unwrap();
        assert_eq!(sym.root, "SPY");
        assert_eq!(sym.option_type, OptionType::Put);
        assert_eq!(sym.strike, 452.5);
        assert_eq!(sym.to_occ(), "SPY250321P00452500");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(OptionSymbol::parse("AAPL").is_err());
        assert!(OptionSymbol::parse("AAPL240119X00100000").is_err());
        assert!(OptionSymbol::parse("AAPL241319C00100000").is_err()); // month 13
        assert!(OptionSymbol::parse("AAPL240119C0010000A").is_err());
        assert!(OptionSymbol::parse("TOOLONGROOT240119C00100000").is_err());
        assert!(OptionSymbol::parse("240119C00100000").is_err());
    }

    #[test]
    fn test_snapshot_mid_falls_back_to_trade() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 10, 15, 0, 0).unwrap();
        let mut snap = OptionSnapshot::new(OptionSymbol::parse("AAPL240119C00100000").unwrap());
        assert_eq!(snap.mid(), None);
        assert_eq!(snap.observed_at(), None);

        snap.latest_trade = Some(OptionTrade {
            timestamp: ts,
            price: 2.5,
            size: 1.0,
            exchange: None,
            condition: None,
        });
        assert_eq!(snap.mid(), Some(2.5));

        snap.latest_quote = Some(OptionQuote {
            timestamp: ts + chrono::Duration::minutes(5),
            bid_price: 2.0,
            bid_size: 10.0,
            ask_price: 2.2,
            ask_size: 10.0,
            bid_exchange: None,
            ask_exchange: None,
            condition: None,
        });
        assert!((snap.mid().unwrap() - 2.1).abs() < 1e-12);
        assert_eq!(snap.observed_at(), Some(ts + chrono::Duration::minutes(5)));
    }

    #[test]
    fn test_chain_summary() {
        let chain = OptionChain::new(
            "AAPL",
            vec![
                OptionSnapshot::new(OptionSymbol::parse("AAPL240216P00110000").unwrap()),
                OptionSnapshot::new(OptionSymbol::parse("AAPL240119C00100000").unwrap()),
                OptionSnapshot::new(OptionSymbol::parse("AAPL240119P00100000").unwrap()),
            ],
        );

        assert_eq!(chain.strikes(), vec![100.0, 110.0]);
        assert_eq!(chain.expirations().len(), 2);
        let avg = chain.average_strike().unwrap();
        assert!((avg - 310.0 / 3.0).abs() < 1e-9);

        let mut sorted = chain.clone();
        sorted.sort();
        assert_eq!(sorted.snapshots[0].symbol.to_occ(), "AAPL240119C00100000");
        assert_eq!(sorted.snapshots[1].symbol.to_occ(), "AAPL240119P00100000");
        assert_eq!(sorted.snapshots[2].symbol.to_occ(), "AAPL240216P00110000");
    }
}
