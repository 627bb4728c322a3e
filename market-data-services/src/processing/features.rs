//! Per-contract features derived from prices only.
//!
//! Nothing here models volatility or time value; Greeks and IV are passed
//! through from the data feed.

use chrono::NaiveDate;
use market_core::OptionType;

/// Payoff if exercised now
pub fn intrinsic_value(option_type: OptionType, spot: f64, strike: f64) -> f64 {
    match option_type {
        OptionType::Call => (spot - strike).max(0.0),
        OptionType::Put => (strike - spot).max(0.0),
    }
}

/// Spot over strike
pub fn moneyness(spot: f64, strike: f64) -> Option<f64> {
    (strike > 0.0).then(|| spot / strike)
}

pub fn is_in_the_money(option_type: OptionType, spot: f64, strike: f64) -> bool {
    match option_type {
        OptionType::Call => spot > strike,
        OptionType::Put => spot < strike,
    }
}

/// Premium above intrinsic value. Negative when the quote sits below parity.
pub fn extrinsic_value(mid: f64, intrinsic: f64) -> f64 {
    mid - intrinsic
}

/// Bid/ask spread relative to the midpoint
pub fn spread_pct(bid: f64, ask: f64) -> Option<f64> {
    let mid = (bid + ask) / 2.0;
    (mid > 0.0).then(|| (ask - bid) / mid)
}

/// Calendar days until expiration; negative once expired
pub fn days_to_expiry(expiration: NaiveDate, as_of: NaiveDate) -> i64 {
    (expiration - as_of).num_days()
}

/// Simple return between two closes
pub fn underlying_return(prev_close: f64, close: f64) -> Option<f64> {
    (prev_close > 0.0).then(|| (close - prev_close) / prev_close)
}
