//! Time alignment of option data against underlying bars.
//!
//! Two joins live here:
//! - [`align_data`]: as-of (backward) join of a chain snapshot onto the
//!   underlying bar in effect when each contract was last observed.
//! - [`align_bar_series`]: historical option bars and underlying bars placed
//!   on the union of their timestamps. Missing sides stay `None`; prices are
//!   never forward filled.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::America::New_York;
use market_core::{
    AlignedBarRow, AlignedBars, AlignedChain, AlignedOptionRow, AlignmentStats, Bar, BarSeries,
    OptionChain, OptionSnapshot, TimeFrame,
};
use std::collections::{BTreeMap, BTreeSet};

use super::features;

/// How far an observation may trail the bar it is joined to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentConfig {
    pub tolerance: Duration,
}

impl AlignmentConfig {
    pub fn new(tolerance: Duration) -> Self {
        Self { tolerance }
    }

    /// One bar duration. Daily and longer bars get an extra day so a
    /// snapshot taken the morning after a close still matches it.
    pub fn for_timeframe(timeframe: TimeFrame) -> Self {
        let mut tolerance = timeframe.duration();
        if timeframe.is_daily_or_longer() {
            tolerance = tolerance + Duration::days(1);
        }
        Self { tolerance }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self::for_timeframe(TimeFrame::day())
    }
}

/// Reason a snapshot could not be joined
enum Unmatched {
    NoPrice,
    NoBar,
    Stale,
}

/// As-of join of every snapshot in `chain` onto `bars`.
///
/// A snapshot observed at `t` is joined to the latest bar with
/// `timestamp <= t`, provided `t - timestamp <= config.tolerance`.
pub fn align_data(bars: &BarSeries, chain: &OptionChain, config: &AlignmentConfig) -> AlignedChain {
    let mut stats = AlignmentStats {
        total: chain.len(),
        ..Default::default()
    };
    let mut rows = Vec::with_capacity(chain.len());

    for snapshot in &chain.snapshots {
        match align_snapshot(bars, snapshot, config) {
            Ok(row) => {
                stats.matched += 1;
                rows.push(row);
            }
            Err(Unmatched::NoPrice) => stats.unmatched_no_price += 1,
            Err(Unmatched::NoBar) => stats.unmatched_no_bar += 1,
            Err(Unmatched::Stale) => stats.unmatched_stale += 1,
        }
    }

    rows.sort_by(|a, b| {
        a.expiration
            .cmp(&b.expiration)
            .then(
                a.strike
                    .partial_cmp(&b.strike)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.option_type.cmp(&b.option_type))
    });

    if stats.unmatched() > 0 {
        tracing::debug!(
            "Alignment for {}: {}/{} matched (no_price={}, no_bar={}, stale={})",
            chain.underlying,
            stats.matched,
            stats.total,
            stats.unmatched_no_price,
            stats.unmatched_no_bar,
            stats.unmatched_stale
        );
    }

    AlignedChain {
        underlying: chain.underlying.clone(),
        rows,
        stats,
    }
}

fn align_snapshot(
    bars: &BarSeries,
    snapshot: &OptionSnapshot,
    config: &AlignmentConfig,
) -> Result<AlignedOptionRow, Unmatched> {
    let (observed_at, option_mid) = match (snapshot.observed_at(), snapshot.mid()) {
        (Some(t), Some(mid)) => (t, mid),
        _ => return Err(Unmatched::NoPrice),
    };

    let bar = bars
        .latest_at_or_before(observed_at)
        .ok_or(Unmatched::NoBar)?;

    let lag = observed_at - bar.timestamp;
    if lag > config.tolerance {
        return Err(Unmatched::Stale);
    }

    Ok(build_row(bars, bar, snapshot, observed_at, option_mid, lag))
}

fn build_row(
    bars: &BarSeries,
    bar: &Bar,
    snapshot: &OptionSnapshot,
    observed_at: DateTime<Utc>,
    option_mid: f64,
    lag: Duration,
) -> AlignedOptionRow {
    let symbol = &snapshot.symbol;
    let spot = bar.close;

    let (bid, ask) = match &snapshot.latest_quote {
        Some(q) => (Some(q.bid_price), Some(q.ask_price)),
        None => (None, None),
    };
    let spread = bid.zip(ask).map(|(b, a)| a - b);
    let spread_pct = bid.zip(ask).and_then(|(b, a)| features::spread_pct(b, a));

    let intrinsic = features::intrinsic_value(symbol.option_type, spot, symbol.strike);
    let as_of = observed_at.with_timezone(&New_York).date_naive();

    AlignedOptionRow {
        option_symbol: symbol.to_occ(),
        option_type: symbol.option_type,
        strike: symbol.strike,
        expiration: symbol.expiration,

        observed_at,
        bar_timestamp: bar.timestamp,
        lag_ms: lag.num_milliseconds(),

        underlying_close: spot,
        underlying_return: bars
            .previous_of(bar.timestamp)
            .and_then(|prev| features::underlying_return(prev.close, spot)),

        option_mid,
        bid,
        ask,
        spread,
        spread_pct,

        intrinsic_value: intrinsic,
        extrinsic_value: features::extrinsic_value(option_mid, intrinsic),
        moneyness: features::moneyness(spot, symbol.strike),
        in_the_money: features::is_in_the_money(symbol.option_type, spot, symbol.strike),
        days_to_expiry: features::days_to_expiry(symbol.expiration, as_of),

        greeks: snapshot.greeks.clone(),
        implied_volatility: snapshot.implied_volatility,
    }
}

/// Place option bars and underlying bars on one timeline
pub fn align_bar_series(underlying: &BarSeries, option: &BarSeries) -> AlignedBars {
    // Union of both timelines
    let timestamps: BTreeSet<DateTime<Utc>> = underlying
        .bars
        .iter()
        .chain(option.bars.iter())
        .map(|b| b.timestamp)
        .collect();

    let underlying_by_ts: BTreeMap<DateTime<Utc>, &Bar> =
        underlying.bars.iter().map(|b| (b.timestamp, b)).collect();
    let option_by_ts: BTreeMap<DateTime<Utc>, &Bar> =
        option.bars.iter().map(|b| (b.timestamp, b)).collect();

    let rows = timestamps
        .into_iter()
        .map(|ts| AlignedBarRow {
            timestamp: ts,
            underlying: underlying_by_ts.get(&ts).map(|b| (*b).clone()),
            option: option_by_ts.get(&ts).map(|b| (*b).clone()),
        })
        .collect();

    AlignedBars {
        underlying_symbol: underlying.symbol.clone(),
        option_symbol: option.symbol.clone(),
        rows,
    }
}
