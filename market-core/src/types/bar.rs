use crate::error::CoreError;
use crate::types::TimeFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar for a stock or option contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Number of trades in the window. Not reported for every feed.
    pub trade_count: Option<u64>,
    /// Volume-weighted average price. Not reported for every feed.
    pub vwap: Option<f64>,
}

impl Bar {
    /// Create a bar without trade count / VWAP metadata
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            trade_count: None,
            vwap: None,
        }
    }

    /// Check OHLC consistency
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |reason: &str| CoreError::InvalidBar {
            timestamp: self.timestamp.to_rfc3339(),
            reason: reason.to_string(),
        };

        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(invalid("non-finite price"));
        }
        if prices.iter().any(|p| *p < 0.0) {
            return Err(invalid("negative price"));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(invalid("negative or non-finite volume"));
        }
        if self.high < self.low {
            return Err(invalid("high below low"));
        }
        if self.open < self.low || self.open > self.high {
            return Err(invalid("open outside high/low range"));
        }
        if self.close < self.low || self.close > self.high {
            return Err(invalid("close outside high/low range"));
        }

        Ok(())
    }

    /// Midpoint of the high/low range
    pub fn mid(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Simple return of this close against a previous bar's close
    pub fn return_from(&self, previous: &Bar) -> Option<f64> {
        if previous.close.abs() < 1e-12 {
            None
        } else {
            Some((self.close - previous.close) / previous.close)
        }
    }
}

/// Time-ordered bars for one symbol.
///
/// Timestamps are strictly increasing; construct through [`BarSeries::from_raw`]
/// to get that guarantee from unsorted API output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub bars: Vec<Bar>,
}

impl BarSeries {
    pub fn empty(symbol: impl Into<String>, timeframe: TimeFrame) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bars: Vec::new(),
        }
    }

    /// Build a series from raw bars: sort by time, keep the last bar for a
    /// repeated timestamp and drop bars failing [`Bar::validate`].
    ///
    /// Returns the series and the number of bars removed.
    pub fn from_raw(
        symbol: impl Into<String>,
        timeframe: TimeFrame,
        mut raw: Vec<Bar>,
    ) -> (Self, usize) {
        let symbol = symbol.into();
        let input_len = raw.len();

        // Stable sort keeps API order among equal timestamps so "last wins" holds
        raw.sort_by_key(|b| b.timestamp);

        let mut bars: Vec<Bar> = Vec::with_capacity(raw.len());
        for bar in raw {
            if let Err(e) = bar.validate() {
                tracing::warn!("Dropping bar for {}: {}", symbol, e);
                continue;
            }
            match bars.last_mut() {
                Some(last) if last.timestamp == bar.timestamp => *last = bar,
                _ => bars.push(bar),
            }
        }

        let dropped = input_len - bars.len();
        (
            Self {
                symbol,
                timeframe,
                bars,
            },
            dropped,
        )
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.bars.iter().map(|b| b.timestamp).collect()
    }

    /// Latest bar whose timestamp is `<= ts`
    pub fn latest_at_or_before(&self, ts: DateTime<Utc>) -> Option<&Bar> {
        let idx = self.bars.partition_point(|b| b.timestamp <= ts);
        if idx == 0 {
            None
        } else {
            self.bars.get(idx - 1)
        }
    }

    /// Bar immediately preceding the one at `ts`, if any
    pub fn previous_of(&self, ts: DateTime<Utc>) -> Option<&Bar> {
        let idx = self.bars.partition_point(|b| b.timestamp < ts);
        if idx == 0 {
            None
        } else {
            self.bars.get(idx - 1)
        }
    }
}
