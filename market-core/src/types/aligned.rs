use crate::types::{Bar, Greeks, OptionType};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One option snapshot joined with the underlying bar in effect when it was observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedOptionRow {
    // ═══════════════════════════════════════════════════
    // CONTRACT
    // ═══════════════════════════════════════════════════
    pub option_symbol: String,
    pub option_type: OptionType,
    pub strike: f64,
    pub expiration: NaiveDate,

    // ═══════════════════════════════════════════════════
    // TIMING
    // ═══════════════════════════════════════════════════
    pub observed_at: DateTime<Utc>,
    pub bar_timestamp: DateTime<Utc>,
    pub lag_ms: i64, // observed_at - bar_timestamp, always >= 0

    // ═══════════════════════════════════════════════════
    // UNDERLYING
    // ═══════════════════════════════════════════════════
    pub underlying_close: f64,
    pub underlying_return: Option<f64>, // vs previous bar close

    // ═══════════════════════════════════════════════════
    // OPTION PRICES
    // ═══════════════════════════════════════════════════
    pub option_mid: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub spread: Option<f64>,
    pub spread_pct: Option<f64>,

    // ═══════════════════════════════════════════════════
    // DERIVED FEATURES
    // ═══════════════════════════════════════════════════
    pub intrinsic_value: f64,
    pub extrinsic_value: f64,
    pub moneyness: Option<f64>, // spot / strike
    pub in_the_money: bool,
    pub days_to_expiry: i64,

    // ═══════════════════════════════════════════════════
    // FEED-REPORTED ANALYTICS (passthrough)
    // ═══════════════════════════════════════════════════
    pub greeks: Option<Greeks>,
    pub implied_volatility: Option<f64>,
}

/// Counters describing how many snapshots could be joined.
///
/// `total == matched + unmatched_no_price + unmatched_no_bar + unmatched_stale`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentStats {
    pub total: usize,
    pub matched: usize,
    /// No quote/trade price or observation time
    pub unmatched_no_price: usize,
    /// Observed before the first bar
    pub unmatched_no_bar: usize,
    /// Latest earlier bar is older than the tolerance
    pub unmatched_stale: usize,
}

impl AlignmentStats {
    pub fn unmatched(&self) -> usize {
        self.unmatched_no_price + self.unmatched_no_bar + self.unmatched_stale
    }

    pub fn match_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.matched as f64 / self.total as f64
        }
    }
}

/// Option chain aligned against an underlying bar series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedChain {
    pub underlying: String,
    pub rows: Vec<AlignedOptionRow>,
    pub stats: AlignmentStats,
}

impl AlignedChain {
    pub fn calls(&self) -> impl Iterator<Item = &AlignedOptionRow> {
        self.rows.iter().filter(|r| r.option_type == OptionType::Call)
    }

    pub fn puts(&self) -> impl Iterator<Item = &AlignedOptionRow> {
        self.rows.iter().filter(|r| r.option_type == OptionType::Put)
    }

    pub fn in_the_money(&self) -> impl Iterator<Item = &AlignedOptionRow> {
        self.rows.iter().filter(|r| r.in_the_money)
    }
}

/// Point on a shared timeline; either side may be missing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedBarRow {
    pub timestamp: DateTime<Utc>,
    pub underlying: Option<Bar>,
    pub option: Option<Bar>,
}

impl AlignedBarRow {
    pub fn is_complete(&self) -> bool {
        self.underlying.is_some() && self.option.is_some()
    }
}

/// Historical option bars and underlying bars on the union of their timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedBars {
    pub underlying_symbol: String,
    pub option_symbol: String,
    pub rows: Vec<AlignedBarRow>,
}

impl AlignedBars {
    /// Rows where both sides printed a bar
    pub fn complete_rows(&self) -> impl Iterator<Item = &AlignedBarRow> {
        self.rows.iter().filter(|r| r.is_complete())
    }
}
